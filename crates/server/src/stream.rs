// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-connection stream handling.
//!
//! A connection starts with a register handshake, then becomes a
//! full-duplex stream: batches and heartbeats inbound, acks and
//! heartbeat replies outbound. Inbound frames are read on a side task
//! so the idle timer can preempt a silent peer. Only batches reset the
//! idle timer; a heartbeating but silent agent is still cut after the
//! idle timeout.

use std::sync::Arc;
use std::time::Duration;

use shiplog_core::AgentId;
use shiplog_proto::{
    read_frame, read_frame_timeout, write_frame, write_frame_timeout, ClientFrame, ProtocolError,
    RegisterResponse, ServerFrame, StreamConfig, StreamResponse, DEFAULT_IO_TIMEOUT,
};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::admission::{validate_agent, RateLimiter};
use crate::registry::AgentRegistry;
use crate::server::ServerStats;
use crate::sink::LogSink;

/// Shared context for every connection handler.
pub(crate) struct StreamCtx {
    pub registry: Arc<AgentRegistry>,
    pub limiter: RateLimiter,
    pub sink: Arc<dyn LogSink>,
    pub stats: Arc<ServerStats>,
    pub max_batch_entries: usize,
    pub idle_timeout: Duration,
}

/// Reasons a stream ends abnormally.
#[derive(Debug, Error)]
pub(crate) enum StreamError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("idle for {0:?}")]
    IdleTimeout(Duration),

    #[error("batch of {0} entries exceeds the limit")]
    BatchTooLarge(usize),
}

/// Handle one agent connection from handshake to close.
pub(crate) async fn handle_connection(
    stream: TcpStream,
    ctx: Arc<StreamCtx>,
    cancel: CancellationToken,
) -> Result<(), StreamError> {
    let (mut reader, mut writer) = stream.into_split();

    let first: ClientFrame = read_frame_timeout(&mut reader, DEFAULT_IO_TIMEOUT).await?;
    let ClientFrame::Register { agent } = first else {
        return Err(ProtocolError::UnexpectedFrame("expected Register").into());
    };

    if !ctx.limiter.allow() {
        debug!(agent = %agent.name, "registration rate limited");
        let denied = ServerFrame::Registered(RegisterResponse::denied(
            "registration rate limit exceeded",
        ));
        write_frame_timeout(&mut writer, &denied, DEFAULT_IO_TIMEOUT).await?;
        return Ok(());
    }

    if let Err(message) = validate_agent(&agent) {
        debug!(agent = %agent.name, message, "registration rejected");
        let denied = ServerFrame::Registered(RegisterResponse::denied(message));
        write_frame_timeout(&mut writer, &denied, DEFAULT_IO_TIMEOUT).await?;
        return Ok(());
    }

    // Keep a client-provided id (re-registration after reconnect);
    // otherwise mint one
    let agent_id = if agent.agent_id.is_empty() {
        AgentId::new(uuid::Uuid::new_v4().to_string())
    } else {
        agent.agent_id.clone()
    };
    let mut info = agent;
    info.agent_id = agent_id.clone();
    ctx.registry.upsert(info);

    let accepted = ServerFrame::Registered(RegisterResponse {
        success: true,
        agent_id: agent_id.clone(),
        config: Some(StreamConfig {
            max_batch_size: ctx.max_batch_entries as u32,
            flush_interval_ms: 1000,
            compression: false,
        }),
        error_message: None,
    });
    write_frame_timeout(&mut writer, &accepted, DEFAULT_IO_TIMEOUT).await?;
    info!(%agent_id, "agent registered");

    // Inbound frames on a side task so the idle timer can preempt
    let (inbound_tx, mut inbound) = mpsc::channel::<Result<ClientFrame, ProtocolError>>(8);
    let reader_task = tokio::spawn(async move {
        loop {
            let result = read_frame::<_, ClientFrame>(&mut reader).await;
            let failed = result.is_err();
            if inbound_tx.send(result).await.is_err() || failed {
                break;
            }
        }
    });

    let idle = tokio::time::sleep(ctx.idle_timeout);
    tokio::pin!(idle);

    let result = loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(%agent_id, "server shutting down, closing stream");
                break Ok(());
            }

            _ = &mut idle => break Err(StreamError::IdleTimeout(ctx.idle_timeout)),

            maybe = inbound.recv() => match maybe {
                None | Some(Err(ProtocolError::ConnectionClosed)) => break Ok(()),
                Some(Err(e)) => break Err(e.into()),

                Some(Ok(ClientFrame::Batch(batch))) => {
                    idle.as_mut().reset(tokio::time::Instant::now() + ctx.idle_timeout);

                    if batch.entries.len() > ctx.max_batch_entries {
                        // The one per-batch failure that rejects the
                        // whole stream
                        let refusal = ServerFrame::BatchAck(StreamResponse::error(
                            batch.sequence,
                            "batch exceeds maximum size",
                        ));
                        let _ = write_frame(&mut writer, &refusal).await;
                        break Err(StreamError::BatchTooLarge(batch.entries.len()));
                    }

                    let sequence = batch.sequence;
                    let count = batch.entries.len();
                    let ack = match ctx.sink.add_batch(batch.entries).await {
                        Ok(()) => {
                            ctx.stats.add_batch(count);
                            StreamResponse::ack(sequence)
                        }
                        Err(e) => {
                            warn!(%agent_id, sequence, error = %e, "sink rejected batch");
                            StreamResponse::error(sequence, e.to_string())
                        }
                    };
                    if let Err(e) = write_frame(&mut writer, &ServerFrame::BatchAck(ack)).await {
                        break Err(e.into());
                    }
                }

                Some(Ok(ClientFrame::Heartbeat(request))) => {
                    let command = match ctx.registry.get(request.agent_id.as_str()) {
                        Some(entry) => {
                            entry.touch();
                            entry.take_command()
                        }
                        // Evicted mid-stream; it re-registers on its
                        // next reconnect
                        None => None,
                    };
                    let reply = ServerFrame::HeartbeatAck(shiplog_proto::HeartbeatResponse {
                        acknowledged: true,
                        command,
                    });
                    if let Err(e) = write_frame(&mut writer, &reply).await {
                        break Err(e.into());
                    }
                }

                Some(Ok(ClientFrame::Register { .. })) => {
                    break Err(ProtocolError::UnexpectedFrame("Register mid-stream").into());
                }
            },
        }
    };

    reader_task.abort();
    result
}

#[cfg(test)]
#[path = "stream_tests.rs"]
mod tests;
