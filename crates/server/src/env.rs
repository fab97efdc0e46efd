// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the server binary.

use std::path::PathBuf;

/// Config file path: SHIPLOG_SERVER_CONFIG > /etc/shiplog/server.toml
pub fn config_path() -> PathBuf {
    std::env::var("SHIPLOG_SERVER_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/etc/shiplog/server.toml"))
}
