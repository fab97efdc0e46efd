// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Downstream storage capability.
//!
//! The stream handler only needs `add_batch`; everything behind it is
//! pluggable. Redelivered batches are stored again under fresh ingest
//! ids, so the sink must be fed by consumers that tolerate duplicates.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Serialize;
use shiplog_core::LogRecord;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Errors a sink can report for a batch.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Unavailable(String),
}

/// Accepts batches of records for storage.
#[async_trait]
pub trait LogSink: Send + Sync {
    async fn add_batch(&self, records: Vec<LogRecord>) -> Result<(), SinkError>;
}

/// Stored form: the record plus a server-assigned ingest id.
#[derive(Serialize)]
struct StoredRecord<'a> {
    ingest_id: String,
    #[serde(flatten)]
    record: &'a LogRecord,
}

/// Appends records as JSONL, one file per source, under a data dir.
pub struct JsonlSink {
    dir: PathBuf,
}

impl JsonlSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn file_for(&self, source: &str) -> PathBuf {
        let name: String = if source.is_empty() {
            "unknown".to_string()
        } else {
            source
                .chars()
                .map(|c| {
                    if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                        c
                    } else {
                        '_'
                    }
                })
                .collect()
        };
        self.dir.join(format!("{name}.jsonl"))
    }
}

#[async_trait]
impl LogSink for JsonlSink {
    async fn add_batch(&self, records: Vec<LogRecord>) -> Result<(), SinkError> {
        tokio::fs::create_dir_all(&self.dir).await?;

        // Batches are small (<=100) and usually single-source; buffer
        // per file and append once per file per batch.
        let mut buffers: std::collections::HashMap<PathBuf, Vec<u8>> =
            std::collections::HashMap::new();
        for record in &records {
            let stored = StoredRecord {
                ingest_id: uuid::Uuid::new_v4().to_string(),
                record,
            };
            let buffer = buffers.entry(self.file_for(&record.source)).or_default();
            serde_json::to_writer(&mut *buffer, &stored)?;
            buffer.push(b'\n');
        }

        for (path, bytes) in buffers {
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await?;
            file.write_all(&bytes).await?;
        }

        debug!(records = records.len(), "batch stored");
        Ok(())
    }
}

/// In-memory sink for tests.
#[cfg(any(test, feature = "test-support"))]
pub struct MemorySink {
    records: parking_lot::Mutex<Vec<LogRecord>>,
    fail_next: std::sync::atomic::AtomicBool,
}

#[cfg(any(test, feature = "test-support"))]
impl MemorySink {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            records: parking_lot::Mutex::new(Vec::new()),
            fail_next: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.records.lock().iter().map(|r| r.message.clone()).collect()
    }

    /// Make the next `add_batch` fail.
    pub fn fail_next(&self) {
        self.fail_next
            .store(true, std::sync::atomic::Ordering::Relaxed);
    }
}

#[cfg(any(test, feature = "test-support"))]
#[async_trait]
impl LogSink for MemorySink {
    async fn add_batch(&self, records: Vec<LogRecord>) -> Result<(), SinkError> {
        if self
            .fail_next
            .swap(false, std::sync::atomic::Ordering::Relaxed)
        {
            return Err(SinkError::Unavailable("sink unavailable".to_string()));
        }
        self.records.lock().extend(records);
        Ok(())
    }
}

#[cfg(test)]
#[path = "sink_tests.rs"]
mod tests;
