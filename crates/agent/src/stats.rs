// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared agent counters, readable lock-free from the heartbeater.

use std::sync::atomic::{AtomicU64, Ordering};

use shiplog_proto::AgentStatus;

/// Lifetime counters for one agent process.
#[derive(Debug, Default)]
pub struct AgentStats {
    /// Records merged from collectors
    pub entries_processed: AtomicU64,
    /// Records the server accepted a send for
    pub entries_sent: AtomicU64,
    /// Transient failures (sends, buffer writes, disconnects)
    pub error_count: AtomicU64,
}

impl AgentStats {
    pub fn add_processed(&self, n: u64) {
        self.entries_processed.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_sent(&self, n: u64) {
        self.entries_sent.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Build a heartbeat status snapshot.
    pub fn snapshot(&self, buffer_size: u64, active_sources: u32) -> AgentStatus {
        AgentStatus {
            entries_processed: self.entries_processed.load(Ordering::Relaxed),
            buffer_size,
            active_sources,
            memory_bytes: resident_memory_bytes(),
        }
    }
}

/// Resident set size of this process, or 0 where unsupported.
#[cfg(target_os = "linux")]
fn resident_memory_bytes() -> u64 {
    let Ok(statm) = std::fs::read_to_string("/proc/self/statm") else {
        return 0;
    };
    let resident_pages: u64 = statm
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);
    resident_pages * 4096
}

#[cfg(not(target_os = "linux"))]
fn resident_memory_bytes() -> u64 {
    0
}
