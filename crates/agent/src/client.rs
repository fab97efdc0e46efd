// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Transport client: one registered, full-duplex connection.
//!
//! The write half is shared behind an async mutex (the dispatcher sends
//! batches, the heartbeater sends probes); a reader task demultiplexes
//! server frames into batch acknowledgements and heartbeat replies.

use parking_lot::Mutex;
use serde::Serialize;
use shiplog_core::AgentId;
use shiplog_proto::{
    read_frame, read_frame_timeout, write_frame, write_frame_timeout, AgentInfo, ClientFrame,
    HeartbeatRequest, HeartbeatResponse, LogBatch, ProtocolError, ServerFrame, StreamConfig,
    StreamResponse, DEFAULT_IO_TIMEOUT,
};
use std::sync::Arc;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::conn::ConnError;

/// Buffered server responses before the handler picks them up
const RESPONSE_CHANNEL_CAPACITY: usize = 32;

/// Borrowing frame encoder, so sends do not clone batch payloads.
/// Tags must mirror [`ClientFrame`].
#[derive(Serialize)]
#[serde(tag = "type")]
enum ClientFrameRef<'a> {
    Batch(&'a LogBatch),
    Heartbeat(&'a HeartbeatRequest),
}

type HeartbeatSlot = Arc<Mutex<Option<oneshot::Sender<HeartbeatResponse>>>>;

/// Handle to a live, registered connection.
///
/// Handles handed out by the connection manager are snapshots: a
/// reconnect invalidates them, and operations on a stale handle fail
/// with transport errors.
pub struct Client {
    agent_id: AgentId,
    stream_config: StreamConfig,
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    responses: Mutex<Option<mpsc::Receiver<StreamResponse>>>,
    pending_heartbeat: HeartbeatSlot,
    reader_task: JoinHandle<()>,
}

impl Client {
    /// Register over a fresh TCP stream and start the frame reader.
    pub async fn handshake(stream: TcpStream, info: &AgentInfo) -> Result<Self, ConnError> {
        let (mut read_half, mut write_half) = stream.into_split();

        write_frame_timeout(
            &mut write_half,
            &ClientFrame::Register {
                agent: info.clone(),
            },
            DEFAULT_IO_TIMEOUT,
        )
        .await?;

        let frame: ServerFrame = read_frame_timeout(&mut read_half, DEFAULT_IO_TIMEOUT).await?;
        let response = match frame {
            ServerFrame::Registered(response) => response,
            _ => return Err(ProtocolError::UnexpectedFrame("expected Registered").into()),
        };
        if !response.success {
            return Err(ConnError::Registration(
                response
                    .error_message
                    .unwrap_or_else(|| "registration refused".to_string()),
            ));
        }

        let (responses_tx, responses_rx) = mpsc::channel(RESPONSE_CHANNEL_CAPACITY);
        let pending_heartbeat: HeartbeatSlot = Arc::new(Mutex::new(None));
        let reader_task = tokio::spawn(read_loop(
            read_half,
            responses_tx,
            Arc::clone(&pending_heartbeat),
        ));

        Ok(Self {
            agent_id: response.agent_id,
            stream_config: response.config.unwrap_or_default(),
            writer: tokio::sync::Mutex::new(write_half),
            responses: Mutex::new(Some(responses_rx)),
            pending_heartbeat,
            reader_task,
        })
    }

    pub fn agent_id(&self) -> &AgentId {
        &self.agent_id
    }

    pub fn stream_config(&self) -> StreamConfig {
        self.stream_config
    }

    /// Send one batch. Success means the frame was written; delivery is
    /// confirmed by the ack arriving on the response stream.
    pub async fn send_batch(&self, batch: &LogBatch) -> Result<(), ProtocolError> {
        let mut writer = self.writer.lock().await;
        write_frame(&mut *writer, &ClientFrameRef::Batch(batch)).await
    }

    /// Send a heartbeat and wait for its reply.
    ///
    /// Callers apply their own timeout; only one heartbeat may be in
    /// flight at a time.
    pub async fn heartbeat(
        &self,
        request: &HeartbeatRequest,
    ) -> Result<HeartbeatResponse, ConnError> {
        let (tx, rx) = oneshot::channel();
        *self.pending_heartbeat.lock() = Some(tx);

        {
            let mut writer = self.writer.lock().await;
            write_frame(&mut *writer, &ClientFrameRef::Heartbeat(request)).await?;
        }

        rx.await.map_err(|_| ConnError::NotConnected)
    }

    /// Take the server-to-agent response stream. Yields `None` once;
    /// the response handler owns it for the connection's life.
    pub fn take_responses(&self) -> Option<mpsc::Receiver<StreamResponse>> {
        self.responses.lock().take()
    }

    /// Tear the connection down. Idempotent.
    pub async fn close(&self) {
        self.reader_task.abort();
        let mut writer = self.writer.lock().await;
        let _ = tokio::io::AsyncWriteExt::shutdown(&mut *writer).await;
    }
}

async fn read_loop(
    mut read_half: OwnedReadHalf,
    responses_tx: mpsc::Sender<StreamResponse>,
    pending_heartbeat: HeartbeatSlot,
) {
    loop {
        match read_frame::<_, ServerFrame>(&mut read_half).await {
            Ok(ServerFrame::BatchAck(response)) => {
                // Receiver gone means the handler is re-binding; keep
                // draining so heartbeat replies still get through.
                let _ = responses_tx.send(response).await;
            }
            Ok(ServerFrame::HeartbeatAck(response)) => {
                if let Some(tx) = pending_heartbeat.lock().take() {
                    let _ = tx.send(response);
                } else {
                    warn!("heartbeat reply with no probe in flight");
                }
            }
            Ok(ServerFrame::Registered(_)) => {
                warn!("unexpected Registered frame mid-stream");
            }
            Err(ProtocolError::ConnectionClosed) => {
                debug!("server closed the stream");
                break;
            }
            Err(e) => {
                debug!(error = %e, "stream read failed");
                break;
            }
        }
    }
    // Dropping responses_tx closes the response stream, which the
    // response handler treats as a reconnect signal.
}
