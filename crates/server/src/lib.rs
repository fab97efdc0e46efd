// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! shiplog-server: ingest endpoint for shiplog agents.
//!
//! Accepts agent connections, admission-controls registrations, acks
//! log batches per sequence, tracks agent liveness in a TTL-evicted
//! registry, and fans records out to a [`sink::LogSink`].

pub mod admission;
pub mod config;
pub mod env;
pub mod registry;
pub mod server;
pub mod sink;
pub mod stream;

pub use admission::{validate_agent, RateLimiter};
pub use config::{ConfigError, ServerConfig};
pub use registry::{AgentRegistry, AgentRegistryEntry};
pub use server::{Server, ServerError, ServerStats};
pub use sink::{JsonlSink, LogSink, SinkError};

#[cfg(any(test, feature = "test-support"))]
pub use sink::MemorySink;
