// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! shiplog-proto: agent/server wire protocol.
//!
//! One TCP connection carries a whole agent session: a register
//! handshake, then a full-duplex stream of log batches (agent to server)
//! and acknowledgements (server to agent), with heartbeats multiplexed
//! over the same connection. Frames are length-prefixed JSON.

pub mod limits;
pub mod types;
pub mod wire;

pub use types::{
    AgentInfo, AgentStatus, ClientFrame, HeartbeatRequest, HeartbeatResponse, LogBatch, LogSource,
    RegisterRequest, RegisterResponse, ServerCommand, ServerFrame, StreamConfig, StreamResponse,
};
pub use wire::{
    decode, encode, read_frame, read_frame_timeout, write_frame, write_frame_timeout,
    ProtocolError, DEFAULT_IO_TIMEOUT, MAX_FRAME_SIZE,
};
