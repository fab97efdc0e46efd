// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the agent binary.

use std::path::PathBuf;

/// Config file path: SHIPLOG_AGENT_CONFIG > /etc/shiplog/agent.toml
pub fn config_path() -> PathBuf {
    std::env::var("SHIPLOG_AGENT_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/etc/shiplog/agent.toml"))
}

/// Best-effort hostname for agent identity.
pub fn hostname() -> String {
    if let Ok(name) = std::fs::read_to_string("/proc/sys/kernel/hostname") {
        let name = name.trim();
        if !name.is_empty() {
            return name.to_string();
        }
    }
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string())
}
