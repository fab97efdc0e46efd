// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Server lifecycle: bind, accept, drain, shutdown.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::admission::RateLimiter;
use crate::config::ServerConfig;
use crate::registry::AgentRegistry;
use crate::sink::LogSink;
use crate::stream::{handle_connection, StreamCtx, StreamError};

/// Errors that abort the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Ingest counters.
#[derive(Debug, Default)]
pub struct ServerStats {
    pub batches_received: AtomicU64,
    pub records_received: AtomicU64,
}

impl ServerStats {
    pub(crate) fn add_batch(&self, records: usize) {
        self.batches_received.fetch_add(1, Ordering::Relaxed);
        self.records_received
            .fetch_add(records as u64, Ordering::Relaxed);
    }

    pub fn batches(&self) -> u64 {
        self.batches_received.load(Ordering::Relaxed)
    }

    pub fn records(&self) -> u64 {
        self.records_received.load(Ordering::Relaxed)
    }
}

/// A bound, not-yet-running server.
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    ctx: Arc<StreamCtx>,
    registry: Arc<AgentRegistry>,
    stats: Arc<ServerStats>,
    cleanup_interval: Duration,
}

impl Server {
    /// Bind the listener and assemble the shared context.
    ///
    /// Binding eagerly lets callers learn the actual port when the
    /// config asked for `:0`.
    pub async fn bind(config: ServerConfig, sink: Arc<dyn LogSink>) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(&config.listen_addr).await?;
        let local_addr = listener.local_addr()?;

        let registry = Arc::new(AgentRegistry::new(config.agent_ttl()));
        let stats = Arc::new(ServerStats::default());
        let ctx = Arc::new(StreamCtx {
            registry: Arc::clone(&registry),
            limiter: RateLimiter::new(config.register_rate, config.register_burst),
            sink,
            stats: Arc::clone(&stats),
            max_batch_entries: config.max_batch_entries,
            idle_timeout: config.stream_idle_timeout(),
        });

        Ok(Self {
            listener,
            local_addr,
            ctx,
            registry,
            stats,
            cleanup_interval: config.cleanup_interval(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn registry(&self) -> Arc<AgentRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn stats(&self) -> Arc<ServerStats> {
        Arc::clone(&self.stats)
    }

    /// Accept and serve until `ctx` is cancelled, then drain.
    pub async fn run(self, ctx: CancellationToken) -> Result<(), ServerError> {
        let Self {
            listener,
            local_addr,
            ctx: stream_ctx,
            registry,
            stats: _,
            cleanup_interval,
        } = self;

        info!(addr = %local_addr, "listening for agents");

        let eviction = {
            let registry = Arc::clone(&registry);
            let ctx = ctx.child_token();
            tokio::spawn(async move { registry.run_eviction(cleanup_interval, ctx).await })
        };

        let mut streams = JoinSet::new();
        loop {
            tokio::select! {
                _ = ctx.cancelled() => break,

                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let stream_ctx = Arc::clone(&stream_ctx);
                        let cancel = ctx.child_token();
                        streams.spawn(async move {
                            match handle_connection(stream, stream_ctx, cancel).await {
                                Ok(()) => debug!(%peer, "stream closed"),
                                Err(StreamError::Protocol(
                                    shiplog_proto::ProtocolError::ConnectionClosed,
                                )) => debug!(%peer, "client disconnected"),
                                Err(StreamError::IdleTimeout(timeout)) => {
                                    info!(%peer, ?timeout, "stream idle, closed")
                                }
                                Err(e) => warn!(%peer, error = %e, "stream error"),
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "accept failed");
                    }
                },
            }
        }

        // Stop accepting; in-flight streams observe their child tokens
        // and finish the batch at hand
        drop(listener);
        info!("draining streams");
        while streams.join_next().await.is_some() {}
        let _ = eviction.await;

        info!("server stopped");
        Ok(())
    }
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
