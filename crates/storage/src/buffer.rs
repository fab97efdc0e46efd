// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Framed persistent disk buffer used as overflow/replay store.
//!
//! Records are appended as `[4-byte big-endian length][JSON payload]`
//! frames — the same encoding as in-flight batches. Reads are strictly
//! FIFO across process restarts, subject to oldest-drop eviction when
//! the size bound is hit. Consumed bytes are reclaimed by streaming the
//! unread tail to a `.tmp` sibling and renaming it over the original.
//!
//! Single writer, single reader; callers serialize access with their
//! own mutex.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use shiplog_core::LogRecord;
use thiserror::Error;
use tracing::{debug, warn};

/// On-disk file name within the buffer directory
const FILE_NAME: &str = "buffer.dat";

/// Lock file guarding single-writer access across processes
const LOCK_FILE_NAME: &str = "buffer.lock";

/// Chunk size for compaction copies
const COMPACT_CHUNK: usize = 64 * 1024;

/// Errors from disk buffer operations
#[derive(Debug, Error)]
pub enum BufferError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Buffer directory {0} is locked by another process")]
    Locked(PathBuf),
}

/// Disk buffer tunables.
#[derive(Debug, Clone)]
pub struct BufferConfig {
    /// Directory holding `buffer.dat`
    pub dir: PathBuf,
    /// Cap on unread bytes; oldest frames are evicted to stay within it
    pub max_size_bytes: u64,
    /// Writes between fsyncs
    pub sync_every: u32,
    /// Compact when consumed bytes exceed this fraction of the file
    pub compact_threshold: f64,
}

impl BufferConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            max_size_bytes: 100 * 1024 * 1024,
            sync_every: 100,
            compact_threshold: 0.5,
        }
    }
}

/// Append-only framed FIFO backed by a single file.
#[derive(Debug)]
pub struct DiskBuffer {
    file: File,
    path: PathBuf,
    config: BufferConfig,
    // NOTE(lifetime): held to maintain the cross-process exclusive lock;
    // released on drop
    #[allow(dead_code)]
    lock_file: File,
    /// File length in bytes
    size: u64,
    /// Bytes already consumed logically; frames before this are dead
    read_offset: u64,
    /// Complete unread frames in `[read_offset, size)`
    count: u64,
    writes_since_sync: u32,
}

impl DiskBuffer {
    /// Open or create the buffer under `config.dir`.
    ///
    /// Sweeps any existing file counting complete frames; a framing
    /// error truncates the file at the last whole frame (self-heal).
    pub fn open(config: BufferConfig) -> Result<Self, BufferError> {
        std::fs::create_dir_all(&config.dir)?;

        let lock_path = config.dir.join(LOCK_FILE_NAME);
        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(BufferError::Locked(config.dir.clone()));
        }

        let path = config.dir.join(FILE_NAME);
        let mut open_opts = OpenOptions::new();
        open_opts.create(true).truncate(false).read(true).write(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            open_opts.mode(0o600);
        }
        let mut file = open_opts.open(&path)?;

        let (size, count) = Self::sweep(&mut file, config.max_size_bytes)?;
        file.seek(SeekFrom::End(0))?;

        if count > 0 {
            debug!(count, size, path = %path.display(), "opened non-empty disk buffer");
        }

        Ok(Self {
            file,
            path,
            config,
            lock_file,
            size,
            read_offset: 0,
            count,
            writes_since_sync: 0,
        })
    }

    /// Scan the file from the start, counting complete frames.
    ///
    /// Truncates at the first incomplete or implausible frame so a
    /// crash mid-append cannot wedge the buffer. Returns `(size, count)`.
    fn sweep(file: &mut File, max_size_bytes: u64) -> Result<(u64, u64), BufferError> {
        let len = file.metadata()?.len();
        if len == 0 {
            return Ok((0, 0));
        }

        file.seek(SeekFrom::Start(0))?;
        let mut pos = 0u64;
        let mut count = 0u64;
        let mut len_buf = [0u8; 4];

        while pos < len {
            if pos + 4 > len {
                break;
            }
            file.read_exact(&mut len_buf)?;
            let frame_len = u32::from_be_bytes(len_buf) as u64;

            // A zero-length or absurdly long frame means the header
            // bytes are garbage, not a frame.
            if frame_len == 0 || frame_len > max_size_bytes || pos + 4 + frame_len > len {
                break;
            }

            file.seek(SeekFrom::Current(frame_len as i64))?;
            pos += 4 + frame_len;
            count += 1;
        }

        if pos < len {
            warn!(
                valid_bytes = pos,
                file_len = len,
                "disk buffer has a truncated or corrupt trailing frame, discarding it"
            );
            file.set_len(pos)?;
        }

        Ok((pos, count))
    }

    /// Unread bytes currently held.
    pub fn active_size(&self) -> u64 {
        self.size - self.read_offset
    }

    /// Unread entries currently held.
    pub fn len(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Append records, evicting the oldest unread frames first when the
    /// size bound would be exceeded.
    ///
    /// A single record whose frame alone exceeds `max_size_bytes` is
    /// skipped with a warning rather than poisoning the whole batch.
    pub fn write(&mut self, records: &[LogRecord]) -> Result<(), BufferError> {
        self.file.seek(SeekFrom::End(0))?;

        for record in records {
            let payload = serde_json::to_vec(record)?;
            let frame_len = 4 + payload.len() as u64;

            if frame_len > self.config.max_size_bytes {
                warn!(
                    bytes = frame_len,
                    max = self.config.max_size_bytes,
                    "record larger than the whole buffer, dropping it"
                );
                continue;
            }

            if self.active_size() + frame_len > self.config.max_size_bytes {
                self.drop_oldest(frame_len)?;
            }

            self.file
                .write_all(&(payload.len() as u32).to_be_bytes())?;
            self.file.write_all(&payload)?;
            self.size += frame_len;
            self.count += 1;

            self.writes_since_sync += 1;
            if self.writes_since_sync >= self.config.sync_every {
                self.file.sync_data()?;
                self.writes_since_sync = 0;
            }
        }

        Ok(())
    }

    /// Read up to `n` records in FIFO order, consuming them.
    ///
    /// An unparseable payload (complete frame, garbage JSON) is skipped
    /// with a warning so one bad frame cannot wedge replay.
    pub fn read(&mut self, n: usize) -> Result<Vec<LogRecord>, BufferError> {
        let mut records = Vec::with_capacity(n.min(self.count as usize));
        let mut len_buf = [0u8; 4];

        while records.len() < n && self.read_offset < self.size {
            self.file.seek(SeekFrom::Start(self.read_offset))?;
            self.file.read_exact(&mut len_buf)?;
            let frame_len = u32::from_be_bytes(len_buf) as usize;

            let mut payload = vec![0u8; frame_len];
            self.file.read_exact(&mut payload)?;
            self.read_offset += 4 + frame_len as u64;
            self.count -= 1;

            match serde_json::from_slice(&payload) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!(offset = self.read_offset, error = %e, "skipping unparseable buffered record");
                }
            }
        }

        self.maybe_compact()?;
        Ok(records)
    }

    /// Evict whole frames from the head until at least `needed` bytes
    /// are reclaimed (or the buffer is empty).
    fn drop_oldest(&mut self, needed: u64) -> Result<(), BufferError> {
        let mut freed = 0u64;
        let mut dropped = 0u64;
        let mut len_buf = [0u8; 4];

        while freed < needed && self.read_offset < self.size {
            self.file.seek(SeekFrom::Start(self.read_offset))?;
            self.file.read_exact(&mut len_buf)?;
            let frame_len = 4 + u32::from_be_bytes(len_buf) as u64;
            self.read_offset += frame_len;
            freed += frame_len;
            self.count -= 1;
            dropped += 1;
        }

        warn!(dropped, freed, "disk buffer full, evicted oldest records");

        self.maybe_compact()?;
        self.file.seek(SeekFrom::End(0))?;
        Ok(())
    }

    fn maybe_compact(&mut self) -> Result<(), BufferError> {
        if self.size > 0
            && self.read_offset as f64 / self.size as f64 > self.config.compact_threshold
        {
            self.compact_now()?;
        }
        Ok(())
    }

    /// Reclaim consumed bytes by copying the unread tail to a `.tmp`
    /// sibling and renaming it over the original.
    pub fn compact_now(&mut self) -> Result<(), BufferError> {
        if self.read_offset == 0 {
            return Ok(());
        }

        let remaining = self.size - self.read_offset;
        let tmp_path = self.path.with_extension("dat.tmp");

        {
            let mut tmp_opts = OpenOptions::new();
            tmp_opts.create(true).truncate(true).write(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::OpenOptionsExt;
                tmp_opts.mode(0o600);
            }
            let mut tmp = tmp_opts.open(&tmp_path)?;

            self.file.seek(SeekFrom::Start(self.read_offset))?;
            let mut chunk = vec![0u8; COMPACT_CHUNK];
            let mut left = remaining as usize;
            while left > 0 {
                let want = left.min(COMPACT_CHUNK);
                self.file.read_exact(&mut chunk[..want])?;
                tmp.write_all(&chunk[..want])?;
                left -= want;
            }
            tmp.sync_all()?;
        }

        std::fs::rename(&tmp_path, &self.path)?;

        let mut open_opts = OpenOptions::new();
        open_opts.read(true).write(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            open_opts.mode(0o600);
        }
        self.file = open_opts.open(&self.path)?;
        self.file.seek(SeekFrom::End(0))?;

        debug!(
            reclaimed = self.read_offset,
            remaining, "compacted disk buffer"
        );

        self.size = remaining;
        self.read_offset = 0;
        self.writes_since_sync = 0;
        Ok(())
    }

    /// Drop everything, read and unread.
    pub fn clear(&mut self) -> Result<(), BufferError> {
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        self.size = 0;
        self.read_offset = 0;
        self.count = 0;
        self.writes_since_sync = 0;
        Ok(())
    }

    /// Final fsync before shutdown. Dropping the buffer afterwards
    /// releases the cross-process lock.
    pub fn close(&mut self) -> Result<(), BufferError> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Path of the backing file (for logging and tests).
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
#[path = "buffer_tests.rs"]
mod tests;
