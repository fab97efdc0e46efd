// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Batching dispatcher: merge, batch, send or buffer, replay.
//!
//! The integration point of the agent. Collector outputs fan into one
//! bounded channel; the batch sender flushes by size or interval; a
//! flush either ships a batch over the current client or diverts it to
//! the disk buffer; reconnects trigger a FIFO replay of the buffer.
//!
//! Every record that reaches the dispatcher is in exactly one place at
//! any time: the in-memory batch, the disk buffer, or acknowledged to
//! the transport. Loss happens only through the buffer's oldest-drop
//! eviction at its size bound.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use shiplog_collect::Collector;
use shiplog_core::LogRecord;
use shiplog_proto::{LogBatch, ServerCommand};
use shiplog_storage::DiskBuffer;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::conn::ConnManager;
use crate::stats::AgentStats;

/// Poll cadence while waiting for a fresh client after a stream loss
const REBIND_DELAY: Duration = Duration::from_millis(100);

/// Server commands queued between the response/heartbeat paths and the
/// command loop
const COMMAND_CHANNEL_CAPACITY: usize = 8;

/// Dispatcher tunables.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Records per batch
    pub batch_size: usize,
    /// Flush cadence for partial batches
    pub flush_interval: Duration,
    /// Bound of the merged entries channel
    pub entries_capacity: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            flush_interval: Duration::from_secs(1),
            entries_capacity: 1000,
        }
    }
}

/// State shared by the dispatcher's tasks.
struct Shared {
    conn: Arc<ConnManager>,
    buffer: Arc<Mutex<DiskBuffer>>,
    stats: Arc<AgentStats>,
    config: DispatchConfig,
    /// Set by the PAUSE command; flushes divert to disk while set
    paused: AtomicBool,
    /// Last used batch sequence; reset on every reconnect
    sequence: AtomicU64,
}

impl Shared {
    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Owns the send/buffer/replay pipeline for one agent.
pub struct Dispatcher {
    shared: Arc<Shared>,
    command_tx: mpsc::Sender<ServerCommand>,
    command_rx: mpsc::Receiver<ServerCommand>,
    replay_rx: mpsc::Receiver<()>,
}

impl Dispatcher {
    /// Wire the dispatcher to the connection manager.
    ///
    /// Installs `on_connected` (sequence reset + replay trigger) and
    /// `on_disconnected` (error counter) hooks, so it must be created
    /// before the first `connect`.
    pub fn new(
        conn: Arc<ConnManager>,
        buffer: Arc<Mutex<DiskBuffer>>,
        stats: Arc<AgentStats>,
        config: DispatchConfig,
    ) -> Self {
        let shared = Arc::new(Shared {
            conn: Arc::clone(&conn),
            buffer,
            stats: Arc::clone(&stats),
            config,
            paused: AtomicBool::new(false),
            sequence: AtomicU64::new(0),
        });

        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (replay_tx, replay_rx) = mpsc::channel(1);

        {
            let shared = Arc::clone(&shared);
            conn.set_on_connected(move || {
                // Sequences are per connection, starting at 1
                shared.sequence.store(0, Ordering::Relaxed);
                let _ = replay_tx.try_send(());
            });
        }
        conn.set_on_disconnected(move |reason| {
            debug!(reason, "connection lost");
            stats.record_error();
        });

        Self {
            shared,
            command_tx,
            command_rx,
            replay_rx,
        }
    }

    /// Sender for server commands (shared with the heartbeater).
    pub fn command_sender(&self) -> mpsc::Sender<ServerCommand> {
        self.command_tx.clone()
    }

    /// Run until `ctx` is cancelled.
    ///
    /// Spawns the merger, batch sender, replay task, and response
    /// handler, and services server commands inline. On cancellation
    /// the batch sender performs a final flush (to disk if offline)
    /// before this returns.
    pub async fn run(self, collectors: Vec<Collector>, ctx: CancellationToken) {
        let Self {
            shared,
            command_tx,
            mut command_rx,
            replay_rx,
        } = self;

        let (entries_tx, entries_rx) = mpsc::channel(shared.config.entries_capacity);

        let mut tasks = JoinSet::new();

        for collector in collectors {
            tasks.spawn(forward_entries(
                collector,
                entries_tx.clone(),
                Arc::clone(&shared.stats),
                ctx.clone(),
            ));
        }
        // The sender side lives only in the forwarders now; when every
        // collector is done the entries channel closes and the batch
        // sender performs its final flush.
        drop(entries_tx);

        tasks.spawn(run_sender(Arc::clone(&shared), entries_rx, ctx.clone()));
        tasks.spawn(run_replay(Arc::clone(&shared), replay_rx, ctx.clone()));
        tasks.spawn(run_responses(
            Arc::clone(&shared),
            command_tx,
            ctx.clone(),
        ));

        loop {
            tokio::select! {
                _ = ctx.cancelled() => break,
                maybe = command_rx.recv() => match maybe {
                    Some(command) => apply_command(&shared, command, &ctx),
                    None => break,
                },
            }
        }

        while tasks.join_next().await.is_some() {}
    }
}

/// Apply one server command. Idempotent: commands may arrive from both
/// the stream and heartbeat replies.
fn apply_command(shared: &Shared, command: ServerCommand, ctx: &CancellationToken) {
    match command {
        ServerCommand::Pause => {
            if !shared.paused.swap(true, Ordering::Relaxed) {
                info!("paused by server command, diverting to disk buffer");
            }
        }
        ServerCommand::Resume => {
            if shared.paused.swap(false, Ordering::Relaxed) {
                info!("resumed by server command");
            }
        }
        ServerCommand::Shutdown => {
            info!("shutdown requested by server");
            ctx.cancel();
        }
        ServerCommand::ReloadConfig => {
            // Config is immutable for the process's life; a supervisor
            // restart picks up changes
            info!("config reload requested by server, restart to apply");
        }
    }
}

/// Fan one collector's records into the merged entries channel.
async fn forward_entries(
    mut collector: Collector,
    entries_tx: mpsc::Sender<LogRecord>,
    stats: Arc<AgentStats>,
    ctx: CancellationToken,
) {
    loop {
        let record = tokio::select! {
            _ = ctx.cancelled() => break,
            maybe = collector.recv() => match maybe {
                Some(record) => record,
                None => break,
            },
        };

        stats.add_processed(1);
        if entries_tx.send(record).await.is_err() {
            break;
        }
    }

    let parse_errors = collector.parse_errors();
    if parse_errors > 0 {
        info!(source = collector.source(), parse_errors, "collector finished");
    }
    collector.stop().await;
}

/// Batch sender: accumulate, flush by size or tick, final flush on exit.
async fn run_sender(
    shared: Arc<Shared>,
    mut entries_rx: mpsc::Receiver<LogRecord>,
    ctx: CancellationToken,
) {
    let mut batch: Vec<LogRecord> = Vec::with_capacity(shared.config.batch_size);
    let mut tick = tokio::time::interval(shared.config.flush_interval);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ctx.cancelled() => break,

            _ = tick.tick() => {
                if !batch.is_empty() {
                    flush(&shared, &mut batch).await;
                }
            }

            maybe = entries_rx.recv() => match maybe {
                Some(record) => {
                    batch.push(record);
                    if batch.len() >= shared.config.batch_size {
                        flush(&shared, &mut batch).await;
                    }
                }
                None => break,
            },
        }
    }

    // Drain whatever the collectors managed to hand over before the
    // channel closed, then flush; offline this lands on disk, not lost.
    while let Ok(record) = entries_rx.try_recv() {
        batch.push(record);
        if batch.len() >= shared.config.batch_size {
            flush(&shared, &mut batch).await;
        }
    }
    flush(&shared, &mut batch).await;
}

/// Ship the current batch, or divert it to the disk buffer.
async fn flush(shared: &Shared, batch: &mut Vec<LogRecord>) {
    if batch.is_empty() {
        return;
    }
    let records = std::mem::take(batch);

    if shared.paused.load(Ordering::Relaxed) {
        buffer_records(shared, &records);
        return;
    }

    if shared.conn.is_connected() {
        if let Some(client) = shared.conn.client() {
            let log_batch = LogBatch {
                agent_id: shared.conn.agent_id(),
                sequence: shared.next_sequence(),
                entries: records,
            };
            match client.send_batch(&log_batch).await {
                Ok(()) => {
                    shared.stats.add_sent(log_batch.entries.len() as u64);
                }
                Err(e) => {
                    shared.stats.record_error();
                    warn!(error = %e, sequence = log_batch.sequence, "batch send failed, buffering to disk");
                    buffer_records(shared, &log_batch.entries);
                    shared.conn.trigger_reconnect("batch send failed");
                }
            }
            return;
        }
    }

    buffer_records(shared, &records);
}

fn buffer_records(shared: &Shared, records: &[LogRecord]) {
    let result = shared.buffer.lock().write(records);
    if let Err(e) = result {
        shared.stats.record_error();
        error!(error = %e, dropped = records.len(), "disk buffer write failed");
    }
}

/// Drain the disk buffer into the network after each reconnect.
async fn run_replay(shared: Arc<Shared>, mut replay_rx: mpsc::Receiver<()>, ctx: CancellationToken) {
    loop {
        tokio::select! {
            _ = ctx.cancelled() => break,
            maybe = replay_rx.recv() => match maybe {
                Some(()) => replay(&shared).await,
                None => break,
            },
        }
    }
}

/// Send buffered records in batch-size chunks, FIFO.
///
/// A chunk that fails to send is re-enqueued at the buffer's tail and
/// replay aborts until the next reconnect; those records are delivered
/// late and out of original order, which downstream consumers already
/// tolerate for replays.
async fn replay(shared: &Shared) {
    let pending = shared.buffer.lock().len();
    if pending == 0 {
        return;
    }
    info!(pending, "replaying buffered records");

    let mut replayed = 0u64;
    loop {
        if !shared.conn.is_connected() {
            break;
        }

        let chunk = match shared.buffer.lock().read(shared.config.batch_size) {
            Ok(chunk) => chunk,
            Err(e) => {
                shared.stats.record_error();
                error!(error = %e, "buffer read failed during replay");
                break;
            }
        };
        if chunk.is_empty() {
            break;
        }

        let Some(client) = shared.conn.client() else {
            buffer_records(shared, &chunk);
            break;
        };

        let log_batch = LogBatch {
            agent_id: shared.conn.agent_id(),
            sequence: shared.next_sequence(),
            entries: chunk,
        };
        match client.send_batch(&log_batch).await {
            Ok(()) => {
                replayed += log_batch.entries.len() as u64;
                shared.stats.add_sent(log_batch.entries.len() as u64);
            }
            Err(e) => {
                shared.stats.record_error();
                warn!(error = %e, "replay send failed, re-buffering chunk");
                buffer_records(shared, &log_batch.entries);
                shared.conn.trigger_reconnect("replay send failed");
                break;
            }
        }
    }

    if replayed > 0 {
        info!(replayed, "replay finished");
    }
}

/// Consume server-to-agent responses, dispatch commands, and re-bind
/// to the fresh stream after a reconnect.
async fn run_responses(
    shared: Arc<Shared>,
    command_tx: mpsc::Sender<ServerCommand>,
    ctx: CancellationToken,
) {
    loop {
        let responses = shared.conn.client().and_then(|c| c.take_responses());
        let Some(mut responses) = responses else {
            tokio::select! {
                _ = ctx.cancelled() => return,
                _ = tokio::time::sleep(REBIND_DELAY) => continue,
            }
        };

        loop {
            tokio::select! {
                _ = ctx.cancelled() => return,
                maybe = responses.recv() => match maybe {
                    Some(response) => {
                        if let Some(err) = &response.error {
                            shared.stats.record_error();
                            warn!(sequence = response.acked_sequence, error = %err, "server reported batch error");
                        }
                        if let Some(command) = response.command {
                            let _ = command_tx.try_send(command);
                        }
                    }
                    None => {
                        debug!("response stream ended");
                        shared.conn.trigger_reconnect("response stream closed");
                        break;
                    }
                },
            }
        }

        tokio::select! {
            _ = ctx.cancelled() => return,
            _ = tokio::time::sleep(REBIND_DELAY) => {}
        }
    }
}

#[cfg(test)]
#[path = "dispatch_tests.rs"]
mod tests;
