// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stock line parsers.
//!
//! The pipeline only depends on the [`Parser`] capability; these two
//! cover the common cases (free text, JSON lines) and are selected by
//! name in the agent's source configuration.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use shiplog_core::{LogLevel, LogRecord, ParseError, Parser};

/// Level tokens scanned for in free text, most severe first so
/// `"ERROR: retry WARN"` classifies as an error.
const LEVEL_TOKENS: &[(&str, LogLevel)] = &[
    ("FATAL", LogLevel::Fatal),
    ("CRITICAL", LogLevel::Fatal),
    ("PANIC", LogLevel::Fatal),
    ("ERROR", LogLevel::Error),
    ("WARN", LogLevel::Warning),
    ("INFO", LogLevel::Info),
    ("DEBUG", LogLevel::Debug),
    ("TRACE", LogLevel::Debug),
];

/// Treats the whole line as the message, sniffing a severity token.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextParser;

impl Parser for PlainTextParser {
    fn parse(&self, line: &str) -> Result<LogRecord, ParseError> {
        let mut record = LogRecord::from_message(line);
        let upper = line.to_ascii_uppercase();
        record.level = LEVEL_TOKENS
            .iter()
            .find(|(token, _)| upper.contains(token))
            .map(|(_, level)| *level)
            .unwrap_or(LogLevel::Unknown);
        Ok(record)
    }
}

/// Parses one JSON object per line.
///
/// Recognizes `timestamp`/`time`/`ts` (RFC 3339), `level`/`severity`,
/// and `message`/`msg`; all other keys land in `fields`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonLineParser;

impl Parser for JsonLineParser {
    fn parse(&self, line: &str) -> Result<LogRecord, ParseError> {
        let value: serde_json::Value = serde_json::from_str(line)?;
        let serde_json::Value::Object(map) = value else {
            return Err(ParseError::Malformed("not a JSON object".to_string()));
        };

        let mut record = LogRecord::from_message("");
        for (key, value) in map {
            match key.as_str() {
                "timestamp" | "time" | "ts" => {
                    if let Some(ts) = value.as_str().and_then(parse_rfc3339) {
                        record.timestamp = ts;
                    } else {
                        record.fields.insert(key, value);
                    }
                }
                "level" | "severity" => {
                    if let Some(token) = value.as_str() {
                        record.level = LogLevel::from_token(token);
                    } else {
                        record.fields.insert(key, value);
                    }
                }
                "message" | "msg" => {
                    if let Some(text) = value.as_str() {
                        record.message = text.to_string();
                    } else {
                        record.fields.insert(key, value);
                    }
                }
                _ => {
                    record.fields.insert(key, value);
                }
            }
        }

        Ok(record)
    }
}

fn parse_rfc3339(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Look up a stock parser by its configuration name.
pub fn by_name(name: &str) -> Option<Arc<dyn Parser>> {
    match name {
        "plain" | "text" | "" => Some(Arc::new(PlainTextParser)),
        "json" => Some(Arc::new(JsonLineParser)),
        _ => None,
    }
}

#[cfg(test)]
#[path = "parsers_tests.rs"]
mod tests;
