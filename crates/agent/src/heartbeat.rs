// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Periodic liveness probing.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use shiplog_proto::{HeartbeatRequest, ServerCommand};
use shiplog_storage::DiskBuffer;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::conn::ConnManager;
use crate::stats::AgentStats;

/// Heartbeat tunables.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    pub interval: Duration,
    /// Per-probe reply timeout
    pub timeout: Duration,
    /// Consecutive misses before a reconnect is requested
    pub max_missed: u32,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
            timeout: Duration::from_secs(5),
            max_missed: 3,
        }
    }
}

/// Probes the server on an interval with a status snapshot.
///
/// Probes are skipped (not counted as missed) while the connection is
/// down. Commands piggybacked on replies are forwarded to the
/// dispatcher's command channel.
pub struct Heartbeater {
    pub config: HeartbeatConfig,
    pub conn: Arc<ConnManager>,
    pub stats: Arc<AgentStats>,
    pub buffer: Arc<Mutex<DiskBuffer>>,
    pub active_sources: u32,
    pub commands: mpsc::Sender<ServerCommand>,
}

impl Heartbeater {
    pub async fn run(self, ctx: CancellationToken) {
        let missed = AtomicU32::new(0);
        let mut tick = tokio::time::interval(self.config.interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The immediate first tick; the first probe waits one interval
        tick.tick().await;

        loop {
            tokio::select! {
                _ = ctx.cancelled() => break,
                _ = tick.tick() => self.probe(&missed).await,
            }
        }
    }

    async fn probe(&self, missed: &AtomicU32) {
        if !self.conn.is_connected() {
            return;
        }
        let Some(client) = self.conn.client() else {
            return;
        };

        let buffer_size = self.buffer.lock().len();
        let request = HeartbeatRequest {
            agent_id: self.conn.agent_id(),
            timestamp: chrono::Utc::now(),
            status: self.stats.snapshot(buffer_size, self.active_sources),
        };

        match tokio::time::timeout(self.config.timeout, client.heartbeat(&request)).await {
            Ok(Ok(response)) => {
                missed.store(0, Ordering::Relaxed);
                debug!(buffer_size, "heartbeat acknowledged");
                if let Some(command) = response.command {
                    if self.commands.try_send(command).is_err() {
                        warn!(?command, "command channel full, dropping server command");
                    }
                }
            }
            Ok(Err(e)) => self.miss(missed, &e.to_string()),
            Err(_) => self.miss(missed, "timed out"),
        }
    }

    fn miss(&self, missed: &AtomicU32, reason: &str) {
        let consecutive = missed.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(consecutive, reason, "heartbeat missed");
        if consecutive >= self.config.max_missed {
            missed.store(0, Ordering::Relaxed);
            self.conn.trigger_reconnect("heartbeat misses");
        }
    }
}

#[cfg(test)]
#[path = "heartbeat_tests.rs"]
mod tests;
