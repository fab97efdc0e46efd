// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent registry with TTL eviction.
//!
//! `last_active` lives in an atomic per entry so the heartbeat hot path
//! stores without taking the map's write lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::{Mutex, RwLock};
use shiplog_proto::{AgentInfo, ServerCommand};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// One known agent.
pub struct AgentRegistryEntry {
    pub info: AgentInfo,
    /// Epoch millis of the last registration or heartbeat
    last_active: AtomicU64,
    /// Command to hand the agent on its next heartbeat
    pending_command: Mutex<Option<ServerCommand>>,
}

impl AgentRegistryEntry {
    fn new(info: AgentInfo) -> Self {
        Self {
            info,
            last_active: AtomicU64::new(now_ms()),
            pending_command: Mutex::new(None),
        }
    }

    pub fn touch(&self) {
        self.last_active.store(now_ms(), Ordering::Relaxed);
    }

    pub fn last_active_ms(&self) -> u64 {
        self.last_active.load(Ordering::Relaxed)
    }

    /// Queue a command for delivery on the next heartbeat.
    pub fn queue_command(&self, command: ServerCommand) {
        *self.pending_command.lock() = Some(command);
    }

    pub fn take_command(&self) -> Option<ServerCommand> {
        self.pending_command.lock().take()
    }

    #[cfg(test)]
    fn backdate(&self, age: Duration) {
        self.last_active
            .store(now_ms().saturating_sub(age.as_millis() as u64), Ordering::Relaxed);
    }
}

/// Concurrent map of known agents.
pub struct AgentRegistry {
    agents: RwLock<HashMap<String, Arc<AgentRegistryEntry>>>,
    ttl: Duration,
}

impl AgentRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Insert or overwrite the entry for `info.agent_id`, marking it
    /// active now.
    pub fn upsert(&self, info: AgentInfo) -> Arc<AgentRegistryEntry> {
        let agent_id = info.agent_id.as_str().to_string();
        let entry = Arc::new(AgentRegistryEntry::new(info));
        self.agents.write().insert(agent_id, Arc::clone(&entry));
        entry
    }

    pub fn get(&self, agent_id: &str) -> Option<Arc<AgentRegistryEntry>> {
        self.agents.read().get(agent_id).cloned()
    }

    /// Mark an agent active. Returns false for unknown agents (already
    /// evicted or never registered).
    pub fn touch(&self, agent_id: &str) -> bool {
        match self.agents.read().get(agent_id) {
            Some(entry) => {
                entry.touch();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.agents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.read().is_empty()
    }

    /// Remove entries idle past the TTL. Returns how many went.
    pub fn evict_idle(&self) -> usize {
        let cutoff = now_ms().saturating_sub(self.ttl.as_millis() as u64);
        let mut agents = self.agents.write();
        let before = agents.len();
        agents.retain(|agent_id, entry| {
            let keep = entry.last_active_ms() >= cutoff;
            if !keep {
                info!(agent_id, "evicting inactive agent");
            }
            keep
        });
        before - agents.len()
    }

    /// Periodic eviction sweep until cancelled.
    pub async fn run_eviction(&self, interval: Duration, ctx: CancellationToken) {
        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tick.tick().await;

        loop {
            tokio::select! {
                _ = ctx.cancelled() => break,
                _ = tick.tick() => {
                    let evicted = self.evict_idle();
                    if evicted > 0 {
                        debug!(evicted, remaining = self.len(), "eviction sweep");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
