// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Collector: one source's tailer bound to a parser, with enrichment.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use shiplog_core::{LogRecord, Parser};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::multi::MultiTailer;

/// Capacity of a collector's record channel
const RECORD_CHANNEL_CAPACITY: usize = 100;

/// Identity and labels applied to every record of a source.
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// Logical source name; becomes `record.source` and `labels["source"]`
    pub source: String,
    /// Log-kind tag applied when the parser did not set one
    pub kind: String,
    /// Static labels merged into every record
    pub labels: HashMap<String, String>,
}

/// Emits enriched records for one source.
///
/// Owns its tailer. Records are never mutated after they leave here.
pub struct Collector {
    records: mpsc::Receiver<LogRecord>,
    source: String,
    parse_errors: Arc<AtomicU64>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Collector {
    /// Bind `tailer` to `parser` and start collecting.
    pub fn start(
        tailer: MultiTailer,
        parser: Arc<dyn Parser>,
        config: CollectorConfig,
        cancel: CancellationToken,
    ) -> Self {
        let (records_tx, records_rx) = mpsc::channel(RECORD_CHANNEL_CAPACITY);
        let parse_errors = Arc::new(AtomicU64::new(0));
        let source = config.source.clone();

        let task = tokio::spawn(collect_loop(
            tailer,
            parser,
            config,
            records_tx,
            Arc::clone(&parse_errors),
            cancel.clone(),
        ));

        Self {
            records: records_rx,
            source,
            parse_errors,
            cancel,
            task,
        }
    }

    /// Receive the next record. `None` once the collector has stopped.
    pub async fn recv(&mut self) -> Option<LogRecord> {
        self.records.recv().await
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Lines the parser rejected so far.
    pub fn parse_errors(&self) -> u64 {
        self.parse_errors.load(Ordering::Relaxed)
    }

    /// Stop the tailer and the collect loop.
    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }
}

async fn collect_loop(
    mut tailer: MultiTailer,
    parser: Arc<dyn Parser>,
    config: CollectorConfig,
    records_tx: mpsc::Sender<LogRecord>,
    parse_errors: Arc<AtomicU64>,
    cancel: CancellationToken,
) {
    // Line numbers are per source and start at 1
    let line_number = AtomicU64::new(0);

    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            maybe_line = tailer.recv() => match maybe_line {
                Some(line) => line,
                None => break,
            },
        };

        if let Some(err) = line.err {
            warn!(source = %config.source, error = %err, "tailer reported watcher error");
            continue;
        }
        if line.text.is_empty() {
            continue;
        }

        let mut record = match parser.parse(&line.text) {
            Ok(record) => record,
            Err(e) => {
                parse_errors.fetch_add(1, Ordering::Relaxed);
                debug!(source = %config.source, error = %e, "dropping unparseable line");
                continue;
            }
        };

        record.source = config.source.clone();
        record.file_path = line.file_path.display().to_string();
        record.line_number = line_number.fetch_add(1, Ordering::Relaxed) + 1;
        record.raw = line.text;
        if record.kind.is_empty() {
            record.kind = config.kind.clone();
        }
        for (key, value) in &config.labels {
            record.labels.insert(key.clone(), value.clone());
        }
        record
            .labels
            .insert("source".to_string(), config.source.clone());

        let sent = tokio::select! {
            _ = cancel.cancelled() => break,
            sent = records_tx.send(record) => sent.is_ok(),
        };
        if !sent {
            break;
        }
    }

    tailer.stop().await;
}

#[cfg(test)]
#[path = "collector_tests.rs"]
mod tests;
