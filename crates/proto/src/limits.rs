// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Server-enforced admission limits.

use std::time::Duration;

/// Maximum entries per batch; streams exceeding it are rejected.
pub const MAX_BATCH_ENTRIES: usize = 100;

/// Maximum hostname length in `AgentInfo`, in bytes.
pub const MAX_HOSTNAME_LEN: usize = 255;

/// Maximum agent name length in `AgentInfo`, in bytes.
pub const MAX_NAME_LEN: usize = 128;

/// Maximum version string length in `AgentInfo`, in bytes.
pub const MAX_VERSION_LEN: usize = 64;

/// Sustained registration rate, per second.
pub const REGISTER_RATE: f64 = 10.0;

/// Registration burst capacity.
pub const REGISTER_BURST: f64 = 50.0;

/// A stream receiving no batch for this long is closed.
pub const STREAM_IDLE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Registry entries idle past this are evicted.
pub const AGENT_TTL: Duration = Duration::from_secs(30 * 60);

/// How often the registry eviction sweep runs.
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(5 * 60);
