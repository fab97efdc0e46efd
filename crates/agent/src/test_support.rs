// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process fake server for agent unit tests.

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use shiplog_core::AgentId;
use shiplog_proto::{
    read_frame, write_frame, ClientFrame, HeartbeatRequest, HeartbeatResponse, LogBatch,
    RegisterResponse, ServerCommand, ServerFrame, StreamConfig, StreamResponse,
};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// What the fake server should do with a session.
#[derive(Debug, Clone, Default)]
pub struct FakeBehavior {
    /// Refuse every registration with this message
    pub refuse_registration: Option<String>,
    /// Accept and ack this many batches, then drop the connection on
    /// the next one (after recording it)
    pub fail_after_batches: Option<usize>,
    /// Piggyback this command on every heartbeat reply
    pub command_on_heartbeat: Option<ServerCommand>,
    /// Attach this command to every batch ack
    pub command_on_ack: Option<ServerCommand>,
}

/// Minimal protocol-speaking server capturing what it receives.
pub struct FakeServer {
    addr: SocketAddr,
    batches: Arc<Mutex<Vec<LogBatch>>>,
    heartbeats: Arc<Mutex<Vec<HeartbeatRequest>>>,
    task: JoinHandle<()>,
}

impl FakeServer {
    pub async fn start(behavior: FakeBehavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let batches: Arc<Mutex<Vec<LogBatch>>> = Arc::default();
        let heartbeats: Arc<Mutex<Vec<HeartbeatRequest>>> = Arc::default();

        let task = {
            let batches = Arc::clone(&batches);
            let heartbeats = Arc::clone(&heartbeats);
            tokio::spawn(async move {
                // Sessions live in a JoinSet so aborting the accept task
                // (FakeServer::stop) tears them down too
                let mut sessions = tokio::task::JoinSet::new();
                loop {
                    let Ok((stream, _)) = listener.accept().await else {
                        break;
                    };
                    sessions.spawn(serve_session(
                        stream,
                        behavior.clone(),
                        Arc::clone(&batches),
                        Arc::clone(&heartbeats),
                    ));
                }
            })
        };

        Self {
            addr,
            batches,
            heartbeats,
            task,
        }
    }

    pub fn addr(&self) -> String {
        self.addr.to_string()
    }

    pub fn batches(&self) -> Vec<LogBatch> {
        self.batches.lock().clone()
    }

    pub fn received_messages(&self) -> Vec<String> {
        self.batches
            .lock()
            .iter()
            .flat_map(|batch| batch.entries.iter().map(|r| r.message.clone()))
            .collect()
    }

    pub fn heartbeats(&self) -> Vec<HeartbeatRequest> {
        self.heartbeats.lock().clone()
    }

    /// Stop accepting; established sessions die with their tasks.
    pub fn stop(&self) {
        self.task.abort();
    }
}

async fn serve_session(
    stream: TcpStream,
    behavior: FakeBehavior,
    batches: Arc<Mutex<Vec<LogBatch>>>,
    heartbeats: Arc<Mutex<Vec<HeartbeatRequest>>>,
) {
    let (mut reader, mut writer) = stream.into_split();

    let Ok(ClientFrame::Register { agent }) = read_frame(&mut reader).await else {
        return;
    };

    if let Some(message) = &behavior.refuse_registration {
        let _ = write_frame(
            &mut writer,
            &ServerFrame::Registered(RegisterResponse::denied(message.clone())),
        )
        .await;
        return;
    }

    let agent_id = if agent.agent_id.is_empty() {
        AgentId::new("fake-agent")
    } else {
        agent.agent_id
    };
    let accepted = ServerFrame::Registered(RegisterResponse {
        success: true,
        agent_id,
        config: Some(StreamConfig::default()),
        error_message: None,
    });
    if write_frame(&mut writer, &accepted).await.is_err() {
        return;
    }

    let mut batch_count = 0usize;
    loop {
        match read_frame::<_, ClientFrame>(&mut reader).await {
            Ok(ClientFrame::Batch(batch)) => {
                batch_count += 1;
                let sequence = batch.sequence;
                batches.lock().push(batch);

                if behavior
                    .fail_after_batches
                    .is_some_and(|n| batch_count > n)
                {
                    // Simulated stream fault: batch received, never acked
                    return;
                }

                let ack = ServerFrame::BatchAck(StreamResponse {
                    acked_sequence: sequence,
                    error: None,
                    command: behavior.command_on_ack,
                });
                if write_frame(&mut writer, &ack).await.is_err() {
                    return;
                }
            }
            Ok(ClientFrame::Heartbeat(request)) => {
                heartbeats.lock().push(request);
                let reply = ServerFrame::HeartbeatAck(HeartbeatResponse {
                    acknowledged: true,
                    command: behavior.command_on_heartbeat,
                });
                if write_frame(&mut writer, &reply).await.is_err() {
                    return;
                }
            }
            Ok(ClientFrame::Register { .. }) | Err(_) => return,
        }
    }
}
