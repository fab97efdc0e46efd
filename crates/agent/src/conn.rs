// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Connection lifecycle management.
//!
//! Owns the transport client and the connection state machine. Peers
//! get snapshot handles via [`ConnManager::client`]; a reconnect
//! invalidates them. Reconnect triggers coalesce through a one-slot
//! channel so concurrent failure reports collapse into one cycle.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use shiplog_core::AgentId;
use shiplog_proto::{AgentInfo, ProtocolError};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backoff::{Backoff, BackoffConfig};
use crate::client::Client;

/// Errors from connection management.
#[derive(Debug, Error)]
pub enum ConnError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("registration refused: {0}")]
    Registration(String),

    #[error("connect timed out")]
    Timeout,

    #[error("not connected")]
    NotConnected,

    #[error("retries exhausted after {0} attempts")]
    RetriesExhausted(u32),

    #[error("shutting down")]
    Cancelled,
}

/// Connection state machine.
///
/// `Connecting → Registering → Connected`, with `Reconnecting` between
/// a drop and the next `Connecting`, and `Disconnected` only on
/// shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Disconnected,
    Connecting,
    Registering,
    Connected,
    Reconnecting,
}

impl ConnState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::Registering,
            3 => Self::Connected,
            4 => Self::Reconnecting,
            _ => Self::Disconnected,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Disconnected => 0,
            Self::Connecting => 1,
            Self::Registering => 2,
            Self::Connected => 3,
            Self::Reconnecting => 4,
        }
    }
}

impl std::fmt::Display for ConnState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Registering => "registering",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        };
        f.write_str(name)
    }
}

/// Connection tunables and identity.
#[derive(Debug, Clone)]
pub struct ConnConfig {
    pub server_addr: String,
    pub info: AgentInfo,
    pub backoff: BackoffConfig,
    /// Connect attempts before giving up; 0 retries forever
    pub max_retries: u32,
    pub connect_timeout: Duration,
}

impl ConnConfig {
    pub fn new(server_addr: impl Into<String>, info: AgentInfo) -> Self {
        Self {
            server_addr: server_addr.into(),
            info,
            backoff: BackoffConfig::default(),
            max_retries: 0,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Hooks fired from the manager's own task.
///
/// They must return quickly and must not install further hooks; signal
/// longer work through channels.
#[derive(Default)]
struct Callbacks {
    on_connected: Option<Box<dyn Fn() + Send + Sync>>,
    on_disconnected: Option<Box<dyn Fn(&str) + Send + Sync>>,
    on_state_change: Option<Box<dyn Fn(ConnState) + Send + Sync>>,
}

/// Owns the transport client and drives connect/reconnect cycles.
pub struct ConnManager {
    config: ConnConfig,
    state: AtomicU8,
    client: Mutex<Option<Arc<Client>>>,
    agent_id: Mutex<AgentId>,
    backoff: Backoff,
    callbacks: Mutex<Callbacks>,
    reconnect_tx: tokio::sync::mpsc::Sender<String>,
    reconnect_rx: Mutex<Option<tokio::sync::mpsc::Receiver<String>>>,
}

impl ConnManager {
    pub fn new(config: ConnConfig) -> Self {
        // One slot: concurrent triggers coalesce
        let (reconnect_tx, reconnect_rx) = tokio::sync::mpsc::channel(1);
        let backoff = Backoff::new(config.backoff.clone());

        Self {
            config,
            state: AtomicU8::new(ConnState::Disconnected.as_u8()),
            client: Mutex::new(None),
            agent_id: Mutex::new(AgentId::default()),
            backoff,
            callbacks: Mutex::new(Callbacks::default()),
            reconnect_tx,
            reconnect_rx: Mutex::new(Some(reconnect_rx)),
        }
    }

    pub fn set_on_connected(&self, hook: impl Fn() + Send + Sync + 'static) {
        self.callbacks.lock().on_connected = Some(Box::new(hook));
    }

    pub fn set_on_disconnected(&self, hook: impl Fn(&str) + Send + Sync + 'static) {
        self.callbacks.lock().on_disconnected = Some(Box::new(hook));
    }

    pub fn set_on_state_change(&self, hook: impl Fn(ConnState) + Send + Sync + 'static) {
        self.callbacks.lock().on_state_change = Some(Box::new(hook));
    }

    pub fn state(&self) -> ConnState {
        ConnState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnState::Connected
    }

    /// Snapshot of the current client handle.
    ///
    /// Valid at the instant of the call only; any operation erroring on
    /// it means a reconnect is underway and a fresh handle is needed.
    pub fn client(&self) -> Option<Arc<Client>> {
        self.client.lock().clone()
    }

    /// Id assigned by the server at the last successful registration.
    pub fn agent_id(&self) -> AgentId {
        self.agent_id.lock().clone()
    }

    /// Request a reconnect cycle. Idempotent: triggers while one is
    /// pending or in progress collapse into it.
    pub fn trigger_reconnect(&self, reason: &str) {
        let _ = self.reconnect_tx.try_send(reason.to_string());
    }

    fn set_state(&self, next: ConnState) {
        let prev = self.state.swap(next.as_u8(), Ordering::AcqRel);
        if prev != next.as_u8() {
            debug!(from = %ConnState::from_u8(prev), to = %next, "connection state change");
            if let Some(hook) = &self.callbacks.lock().on_state_change {
                hook(next);
            }
        }
    }

    /// Dial, register, and open the stream, retrying with backoff.
    ///
    /// Registration refusal is an error like any transport failure and
    /// participates in retry. Returns only on success, cancellation, or
    /// `max_retries` exhaustion.
    pub async fn connect(&self, ctx: &CancellationToken) -> Result<(), ConnError> {
        let mut attempts = 0u32;

        loop {
            if ctx.is_cancelled() {
                return Err(ConnError::Cancelled);
            }

            match self.try_connect(ctx).await {
                Ok(client) => {
                    self.backoff.reset();
                    let agent_id = client.agent_id().clone();
                    *self.agent_id.lock() = agent_id.clone();
                    *self.client.lock() = Some(Arc::new(client));
                    self.set_state(ConnState::Connected);
                    info!(%agent_id, addr = %self.config.server_addr, "connected and registered");
                    if let Some(hook) = &self.callbacks.lock().on_connected {
                        hook();
                    }
                    return Ok(());
                }
                Err(ConnError::Cancelled) => return Err(ConnError::Cancelled),
                Err(e) => {
                    attempts = attempts.saturating_add(1);
                    if self.config.max_retries > 0 && attempts >= self.config.max_retries {
                        self.set_state(ConnState::Disconnected);
                        return Err(ConnError::RetriesExhausted(attempts));
                    }
                    let delay = self.backoff.next();
                    warn!(error = %e, attempts, delay_ms = delay.as_millis() as u64, "connect failed, backing off");
                    tokio::select! {
                        _ = ctx.cancelled() => return Err(ConnError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn try_connect(&self, ctx: &CancellationToken) -> Result<Client, ConnError> {
        self.set_state(ConnState::Connecting);

        let stream = tokio::select! {
            _ = ctx.cancelled() => return Err(ConnError::Cancelled),
            dialed = tokio::time::timeout(
                self.config.connect_timeout,
                TcpStream::connect(&self.config.server_addr),
            ) => match dialed {
                Err(_) => return Err(ConnError::Timeout),
                Ok(Err(e)) => return Err(e.into()),
                Ok(Ok(stream)) => stream,
            },
        };

        self.set_state(ConnState::Registering);

        // Present the previously assigned id so the server can keep it
        let mut info = self.config.info.clone();
        info.agent_id = self.agent_id.lock().clone();

        tokio::select! {
            _ = ctx.cancelled() => Err(ConnError::Cancelled),
            handshake = tokio::time::timeout(
                self.config.connect_timeout,
                Client::handshake(stream, &info),
            ) => match handshake {
                Err(_) => Err(ConnError::Timeout),
                Ok(result) => result,
            },
        }
    }

    /// Service reconnect triggers until cancelled.
    ///
    /// Call at most once; later calls return immediately.
    pub async fn run_reconnect_loop(&self, ctx: &CancellationToken) {
        let Some(mut reconnect_rx) = self.reconnect_rx.lock().take() else {
            warn!("reconnect loop already running");
            return;
        };

        loop {
            let reason = tokio::select! {
                _ = ctx.cancelled() => break,
                maybe = reconnect_rx.recv() => match maybe {
                    Some(reason) => reason,
                    None => break,
                },
            };

            if self.state() == ConnState::Disconnected {
                // Shut down; stale triggers are meaningless now
                continue;
            }

            info!(reason, "reconnecting");
            self.set_state(ConnState::Reconnecting);

            let old = self.client.lock().take();
            if let Some(client) = old {
                client.close().await;
            }
            if let Some(hook) = &self.callbacks.lock().on_disconnected {
                hook(&reason);
            }

            match self.connect(ctx).await {
                Ok(()) => {
                    // Triggers that raced the reconnect refer to the
                    // connection just replaced
                    while reconnect_rx.try_recv().is_ok() {}
                }
                Err(ConnError::Cancelled) => break,
                Err(e) => {
                    error!(error = %e, "reconnect gave up");
                    self.set_state(ConnState::Disconnected);
                }
            }
        }

        // Loop may restart after an early return of a caller's future
        *self.reconnect_rx.lock() = Some(reconnect_rx);
    }

    /// Shut the connection down for good.
    pub async fn close(&self) {
        self.set_state(ConnState::Disconnected);
        let client = self.client.lock().take();
        if let Some(client) = client {
            client.close().await;
        }
    }
}

#[cfg(test)]
#[path = "conn_tests.rs"]
mod tests;
