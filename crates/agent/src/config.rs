// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent configuration (TOML file + validation).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use shiplog_storage::BufferConfig;
use thiserror::Error;

use crate::backoff::BackoffConfig;
use crate::dispatch::DispatchConfig;
use crate::heartbeat::HeartbeatConfig;

/// Errors loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// One tailed source.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    pub name: String,
    /// Literal path or glob pattern
    pub path: String,
    /// Log-kind tag stamped on records of this source
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Stock parser name: "plain" (default) or "json"
    #[serde(default)]
    pub parser: String,
    #[serde(default = "default_true")]
    pub follow: bool,
    #[serde(default)]
    pub must_exist: bool,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

/// Full agent configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    /// host:port of the shiplog server
    pub server_addr: String,
    /// Agent display name; defaults to the hostname
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,

    /// Directory for the overflow disk buffer
    pub buffer_dir: PathBuf,
    #[serde(default = "default_buffer_max_size")]
    pub buffer_max_size_bytes: u64,
    #[serde(default = "default_sync_every")]
    pub buffer_sync_every: u32,
    #[serde(default = "default_compact_threshold")]
    pub buffer_compact_threshold: f64,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    #[serde(default = "default_entries_capacity")]
    pub entries_channel_capacity: usize,

    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_heartbeat_timeout_secs")]
    pub heartbeat_timeout_secs: u64,
    #[serde(default = "default_max_missed")]
    pub max_missed: u32,

    #[serde(default = "default_reconnect_initial_ms")]
    pub reconnect_initial_ms: u64,
    #[serde(default = "default_reconnect_max_secs")]
    pub reconnect_max_secs: u64,
    /// Connect attempts before giving up; 0 retries forever
    #[serde(default)]
    pub max_retries: u32,

    #[serde(rename = "source", default)]
    pub sources: Vec<SourceConfig>,
}

fn default_true() -> bool {
    true
}
fn default_buffer_max_size() -> u64 {
    100 * 1024 * 1024
}
fn default_sync_every() -> u32 {
    100
}
fn default_compact_threshold() -> f64 {
    0.5
}
fn default_batch_size() -> usize {
    100
}
fn default_flush_interval_ms() -> u64 {
    1000
}
fn default_entries_capacity() -> usize {
    1000
}
fn default_heartbeat_interval_secs() -> u64 {
    15
}
fn default_heartbeat_timeout_secs() -> u64 {
    5
}
fn default_max_missed() -> u32 {
    3
}
fn default_reconnect_initial_ms() -> u64 {
    1000
}
fn default_reconnect_max_secs() -> u64 {
    30
}

impl AgentConfig {
    /// Load and validate a TOML config file. Invalid configuration
    /// refuses to start.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Self = toml::from_str(&text)?;
        if config.name.is_empty() {
            config.name = crate::env::hostname();
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server_addr.is_empty() {
            return Err(ConfigError::Invalid("server_addr is required".to_string()));
        }
        if self.sources.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one [[source]] is required".to_string(),
            ));
        }
        let mut names = std::collections::HashSet::new();
        for source in &self.sources {
            if source.name.is_empty() {
                return Err(ConfigError::Invalid("source name is required".to_string()));
            }
            if source.path.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "source {} has no path",
                    source.name
                )));
            }
            if !names.insert(&source.name) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate source name: {}",
                    source.name
                )));
            }
            if shiplog_collect::by_name(&source.parser).is_none() {
                return Err(ConfigError::Invalid(format!(
                    "source {} names unknown parser {:?}",
                    source.name, source.parser
                )));
            }
        }
        if self.batch_size == 0 || self.batch_size > shiplog_proto::limits::MAX_BATCH_ENTRIES {
            return Err(ConfigError::Invalid(format!(
                "batch_size must be 1..={}",
                shiplog_proto::limits::MAX_BATCH_ENTRIES
            )));
        }
        if !(0.0..1.0).contains(&self.buffer_compact_threshold) {
            return Err(ConfigError::Invalid(
                "buffer_compact_threshold must be in [0, 1)".to_string(),
            ));
        }
        if self.buffer_max_size_bytes == 0 {
            return Err(ConfigError::Invalid(
                "buffer_max_size_bytes must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn buffer_config(&self) -> BufferConfig {
        BufferConfig {
            dir: self.buffer_dir.clone(),
            max_size_bytes: self.buffer_max_size_bytes,
            sync_every: self.buffer_sync_every,
            compact_threshold: self.buffer_compact_threshold,
        }
    }

    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            batch_size: self.batch_size,
            flush_interval: Duration::from_millis(self.flush_interval_ms),
            entries_capacity: self.entries_channel_capacity,
        }
    }

    pub fn heartbeat_config(&self) -> HeartbeatConfig {
        HeartbeatConfig {
            interval: Duration::from_secs(self.heartbeat_interval_secs),
            timeout: Duration::from_secs(self.heartbeat_timeout_secs),
            max_missed: self.max_missed,
        }
    }

    pub fn backoff_config(&self) -> BackoffConfig {
        BackoffConfig {
            initial: Duration::from_millis(self.reconnect_initial_ms),
            max: Duration::from_secs(self.reconnect_max_secs),
            ..BackoffConfig::default()
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
