// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! shiplog-agent: the agent-side reliability core.
//!
//! Collectors feed a merging dispatcher that batches records and ships
//! them over one managed connection. When the connection is down or a
//! send fails, batches divert to a persistent disk buffer and are
//! replayed in FIFO order on reconnect, giving at-least-once delivery
//! across network faults and agent restarts.

pub mod agent;
pub mod backoff;
pub mod client;
pub mod config;
pub mod conn;
pub mod dispatch;
pub mod env;
pub mod heartbeat;
pub mod stats;

#[cfg(test)]
mod test_support;

pub use agent::{Agent, AgentError};
pub use backoff::{Backoff, BackoffConfig};
pub use client::Client;
pub use config::{AgentConfig, ConfigError, SourceConfig};
pub use conn::{ConnConfig, ConnError, ConnManager, ConnState};
pub use dispatch::{DispatchConfig, Dispatcher};
pub use heartbeat::{HeartbeatConfig, Heartbeater};
pub use stats::AgentStats;
