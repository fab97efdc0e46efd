// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Protocol messages exchanged between agent and server.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shiplog_core::{AgentId, LogRecord};

/// One tailed source as declared at registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogSource {
    pub name: String,
    /// Literal path or glob pattern
    pub path: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub follow: bool,
}

/// Agent identity and inventory sent with `Register`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentInfo {
    /// Previously assigned id, empty on first registration
    #[serde(default)]
    pub agent_id: AgentId,
    pub name: String,
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub arch: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<LogSource>,
}

/// Runtime counters piggybacked on heartbeats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentStatus {
    pub entries_processed: u64,
    /// Unread entries in the disk buffer
    pub buffer_size: u64,
    pub active_sources: u32,
    pub memory_bytes: u64,
}

/// Wire unit for log delivery. `sequence` is strictly monotonic per
/// connection, starting at 1; the server treats it as opaque.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogBatch {
    pub agent_id: AgentId,
    pub sequence: u64,
    pub entries: Vec<LogRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub agent: AgentInfo,
}

/// Stream tuning handed to the agent at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    pub max_batch_size: u32,
    pub flush_interval_ms: u64,
    pub compression: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_batch_size: crate::limits::MAX_BATCH_ENTRIES as u32,
            flush_interval_ms: 1000,
            compression: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub success: bool,
    #[serde(default)]
    pub agent_id: AgentId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<StreamConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl RegisterResponse {
    pub fn denied(message: impl Into<String>) -> Self {
        Self {
            success: false,
            agent_id: AgentId::default(),
            config: None,
            error_message: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub agent_id: AgentId,
    pub timestamp: DateTime<Utc>,
    pub status: AgentStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub acknowledged: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<ServerCommand>,
}

/// Per-batch acknowledgement. `error` is set when the sink rejected the
/// batch, or carries a terminal reason just before the server closes
/// the stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamResponse {
    pub acked_sequence: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<ServerCommand>,
}

impl StreamResponse {
    pub fn ack(sequence: u64) -> Self {
        Self {
            acked_sequence: sequence,
            error: None,
            command: None,
        }
    }

    pub fn error(sequence: u64, message: impl Into<String>) -> Self {
        Self {
            acked_sequence: sequence,
            error: Some(message.into()),
            command: None,
        }
    }
}

/// Commands the server may push to an agent, over the stream or
/// piggybacked on heartbeat responses. Handlers must be idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerCommand {
    Shutdown,
    Pause,
    Resume,
    ReloadConfig,
}

/// Agent-to-server frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    /// Handshake; must be the first frame on a connection
    Register { agent: AgentInfo },

    /// One batch of log records
    Batch(LogBatch),

    /// Liveness probe with a status snapshot
    Heartbeat(HeartbeatRequest),
}

/// Server-to-agent frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    /// Handshake reply
    Registered(RegisterResponse),

    /// Acknowledgement for one batch
    BatchAck(StreamResponse),

    /// Heartbeat reply
    HeartbeatAck(HeartbeatResponse),
}

#[cfg(test)]
#[path = "types_tests.rs"]
mod tests;
