// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Server configuration (TOML file + validation).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

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

/// Full server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Directory for the JSONL sink
    #[serde(default)]
    pub data_dir: PathBuf,

    #[serde(default = "default_agent_ttl_secs")]
    pub agent_ttl_secs: u64,
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
    #[serde(default = "default_stream_idle_timeout_ms")]
    pub stream_idle_timeout_ms: u64,

    #[serde(default = "default_register_rate")]
    pub register_rate: f64,
    #[serde(default = "default_register_burst")]
    pub register_burst: f64,
    #[serde(default = "default_max_batch_entries")]
    pub max_batch_entries: usize,
}

fn default_listen_addr() -> String {
    "0.0.0.0:9400".to_string()
}
fn default_agent_ttl_secs() -> u64 {
    30 * 60
}
fn default_cleanup_interval_secs() -> u64 {
    5 * 60
}
fn default_stream_idle_timeout_ms() -> u64 {
    5 * 60 * 1000
}
fn default_register_rate() -> f64 {
    10.0
}
fn default_register_burst() -> f64 {
    50.0
}
fn default_max_batch_entries() -> usize {
    shiplog_proto::limits::MAX_BATCH_ENTRIES
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            data_dir: PathBuf::new(),
            agent_ttl_secs: default_agent_ttl_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            stream_idle_timeout_ms: default_stream_idle_timeout_ms(),
            register_rate: default_register_rate(),
            register_burst: default_register_burst(),
            max_batch_entries: default_max_batch_entries(),
        }
    }
}

impl ServerConfig {
    /// Load and validate a TOML config file. Invalid configuration
    /// refuses to start.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen_addr.is_empty() {
            return Err(ConfigError::Invalid("listen_addr is required".to_string()));
        }
        if self.data_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("data_dir is required".to_string()));
        }
        if self.max_batch_entries == 0 {
            return Err(ConfigError::Invalid(
                "max_batch_entries must be positive".to_string(),
            ));
        }
        if self.register_rate <= 0.0 || self.register_burst < 1.0 {
            return Err(ConfigError::Invalid(
                "register_rate must be positive and register_burst at least 1".to_string(),
            ));
        }
        if self.agent_ttl_secs == 0 || self.cleanup_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "agent_ttl_secs and cleanup_interval_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn agent_ttl(&self) -> Duration {
        Duration::from_secs(self.agent_ttl_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn stream_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.stream_idle_timeout_ms)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
