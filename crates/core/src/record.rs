// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Structured log records produced by parsing tailed lines.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity of a log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Fatal,
    #[default]
    Unknown,
}

impl LogLevel {
    /// Map a level token from raw log text to a level.
    ///
    /// Case-insensitive; common abbreviations (`WARN`, `ERR`, `CRIT`) are
    /// accepted. Unrecognized tokens map to `Unknown`.
    pub fn from_token(token: &str) -> Self {
        match token.to_ascii_uppercase().as_str() {
            "DEBUG" | "DBG" | "TRACE" => Self::Debug,
            "INFO" | "NOTICE" => Self::Info,
            "WARNING" | "WARN" => Self::Warning,
            "ERROR" | "ERR" => Self::Error,
            "FATAL" | "CRITICAL" | "CRIT" | "PANIC" => Self::Fatal,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
            Self::Fatal => "FATAL",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed, enriched log record.
///
/// Created by a collector and never mutated after emission. The same
/// serde encoding is used for in-flight batches and disk-buffer frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Wall-clock instant the record carries (parsed or time of ingestion)
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub level: LogLevel,
    pub message: String,
    /// Logical source name the collector is bound to
    #[serde(default)]
    pub source: String,
    /// Log-kind tag (e.g. "app", "syslog")
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Original line as read from the file
    #[serde(default)]
    pub raw: String,
    #[serde(default)]
    pub file_path: String,
    /// Monotonic per collector, starting at 1
    #[serde(default)]
    pub line_number: u64,
    /// Structured fields extracted by the parser
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub fields: HashMap<String, serde_json::Value>,
    /// Static labels merged in by the collector; always carries "source"
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
}

impl LogRecord {
    /// A record holding only a message, timestamped now.
    ///
    /// Parsers start from this and fill in what they extract; the
    /// collector supplies source identity, labels, and line numbers.
    pub fn from_message(message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level: LogLevel::Unknown,
            message: message.into(),
            source: String::new(),
            kind: String::new(),
            raw: String::new(),
            file_path: String::new(),
            line_number: 0,
            fields: HashMap::new(),
            labels: HashMap::new(),
        }
    }
}

#[cfg(test)]
#[path = "record_tests.rs"]
mod tests;
