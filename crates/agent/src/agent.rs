// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent assembly: buffer, collectors, connection, heartbeat, dispatch.

use std::sync::Arc;

use parking_lot::Mutex;
use shiplog_collect::{by_name, Collector, CollectorConfig, MultiTailer, TailConfig, TailError};
use shiplog_proto::{AgentInfo, LogSource};
use shiplog_storage::{BufferError, DiskBuffer};
use thiserror::Error;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{AgentConfig, ConfigError, SourceConfig};
use crate::conn::{ConnConfig, ConnError, ConnManager};
use crate::dispatch::Dispatcher;
use crate::heartbeat::Heartbeater;
use crate::stats::AgentStats;

/// Errors that abort agent startup.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("buffer error: {0}")]
    Buffer(#[from] BufferError),

    #[error("tail error: {0}")]
    Tail(#[from] TailError),

    #[error("connection error: {0}")]
    Conn(#[from] ConnError),
}

/// One agent process: tails configured sources and ships records to the
/// server until `ctx` is cancelled.
pub struct Agent {
    config: AgentConfig,
}

impl Agent {
    pub fn new(config: AgentConfig) -> Self {
        Self { config }
    }

    pub async fn run(self, ctx: CancellationToken) -> Result<(), AgentError> {
        let config = self.config;

        let buffer = DiskBuffer::open(config.buffer_config())?;
        if !buffer.is_empty() {
            info!(
                count = buffer.len(),
                "disk buffer holds records persisted across restarts"
            );
        }
        let buffer = Arc::new(Mutex::new(buffer));

        let stats = Arc::new(AgentStats::default());
        let info = build_agent_info(&config);
        let conn = Arc::new(ConnManager::new(ConnConfig {
            server_addr: config.server_addr.clone(),
            info,
            backoff: config.backoff_config(),
            max_retries: config.max_retries,
            connect_timeout: shiplog_proto::DEFAULT_IO_TIMEOUT,
        }));

        // The dispatcher installs its reconnect hooks, so it exists
        // before the first connect
        let dispatcher = Dispatcher::new(
            Arc::clone(&conn),
            Arc::clone(&buffer),
            Arc::clone(&stats),
            config.dispatch_config(),
        );

        match conn.connect(&ctx).await {
            Ok(()) => {}
            Err(ConnError::Cancelled) => {
                let _ = buffer.lock().close();
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }

        let heartbeater = Heartbeater {
            config: config.heartbeat_config(),
            conn: Arc::clone(&conn),
            stats: Arc::clone(&stats),
            buffer: Arc::clone(&buffer),
            active_sources: config.sources.len() as u32,
            commands: dispatcher.command_sender(),
        };

        let mut tasks = JoinSet::new();
        {
            let conn = Arc::clone(&conn);
            let ctx = ctx.clone();
            tasks.spawn(async move { conn.run_reconnect_loop(&ctx).await });
        }
        tasks.spawn(heartbeater.run(ctx.clone()));

        let collectors = start_collectors(&config.sources, &ctx)?;
        info!(sources = collectors.len(), "collectors started");
        tasks.spawn(dispatcher.run(collectors, ctx.clone()));

        ctx.cancelled().await;
        info!("shutting down");

        // The dispatcher's final flush lands in the buffer before we
        // fsync it one last time
        while tasks.join_next().await.is_some() {}
        conn.close().await;
        if let Err(e) = buffer.lock().close() {
            warn!(error = %e, "final buffer fsync failed");
        }

        info!("agent stopped");
        Ok(())
    }
}

fn build_agent_info(config: &AgentConfig) -> AgentInfo {
    AgentInfo {
        agent_id: shiplog_core::AgentId::default(),
        name: config.name.clone(),
        project_id: config.project_id.clone(),
        hostname: crate::env::hostname(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        os: std::env::consts::OS.to_string(),
        arch: std::env::consts::ARCH.to_string(),
        labels: config.labels.clone(),
        sources: config
            .sources
            .iter()
            .map(|source| LogSource {
                name: source.name.clone(),
                path: source.path.clone(),
                kind: source.kind.clone(),
                follow: source.follow,
            })
            .collect(),
    }
}

fn start_collectors(
    sources: &[SourceConfig],
    ctx: &CancellationToken,
) -> Result<Vec<Collector>, AgentError> {
    let mut collectors = Vec::with_capacity(sources.len());

    for source in sources {
        let parser = by_name(&source.parser).ok_or_else(|| {
            ConfigError::Invalid(format!("unknown parser {:?}", source.parser))
        })?;
        let tail_config = TailConfig {
            follow: source.follow,
            must_exist: source.must_exist,
            // Live sources start at the end; one-shot reads start at 0
            from_end: source.follow,
            ..TailConfig::default()
        };
        let multi = MultiTailer::start(std::slice::from_ref(&source.path), tail_config)?;
        collectors.push(Collector::start(
            multi,
            parser,
            CollectorConfig {
                source: source.name.clone(),
                kind: source.kind.clone(),
                labels: source.labels.clone(),
            },
            ctx.child_token(),
        ));
    }

    Ok(collectors)
}
