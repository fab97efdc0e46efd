// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single-file tailer with rotation and truncation handling.

use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Capacity of a tailer's line channel
pub(crate) const LINE_CHANNEL_CAPACITY: usize = 100;

/// Attempts to reopen a rotated file before giving up on this round
const ROTATE_OPEN_RETRIES: u32 = 10;

/// Delay between rotated-file reopen attempts
const ROTATE_OPEN_DELAY: Duration = Duration::from_millis(100);

/// Errors from tailer and multi-tailer setup.
#[derive(Debug, Error)]
pub enum TailError {
    #[error("log file not found: {0}")]
    NotFound(PathBuf),

    #[error("no files match pattern: {0}")]
    NoMatch(String),

    #[error("invalid pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One line read from a tailed file.
///
/// `err` carries watcher failures as in-band sentinels; such lines have
/// empty text and are skipped by collectors.
#[derive(Debug, Clone, PartialEq)]
pub struct Line {
    pub text: String,
    pub file_path: PathBuf,
    pub time: DateTime<Utc>,
    pub err: Option<String>,
}

impl Line {
    fn text_line(text: String, file_path: PathBuf) -> Self {
        Self {
            text,
            file_path,
            time: Utc::now(),
            err: None,
        }
    }

    fn sentinel(message: String, file_path: PathBuf) -> Self {
        Self {
            text: String::new(),
            file_path,
            time: Utc::now(),
            err: Some(message),
        }
    }
}

/// Tailer tunables.
#[derive(Debug, Clone)]
pub struct TailConfig {
    /// Keep following the file for new data
    pub follow: bool,
    /// Reopen the path when it is replaced with a new inode
    pub reopen: bool,
    /// Fail startup when the path does not exist
    pub must_exist: bool,
    /// Fallback poll cadence when file events are missed
    pub poll_interval: Duration,
    /// Seek to EOF before following (skip pre-existing content)
    pub from_end: bool,
}

impl Default for TailConfig {
    fn default() -> Self {
        Self {
            follow: true,
            reopen: true,
            must_exist: false,
            poll_interval: Duration::from_millis(250),
            from_end: false,
        }
    }
}

/// Follows one file, emitting its lines in file order.
#[derive(Debug)]
pub struct Tailer {
    lines: mpsc::Receiver<Line>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
    path: PathBuf,
}

impl Tailer {
    /// Start tailing `path`.
    ///
    /// With `must_exist`, a missing path fails immediately; otherwise
    /// the tailer waits for the file to appear.
    pub fn start(path: impl Into<PathBuf>, config: TailConfig) -> Result<Self, TailError> {
        let path = path.into();

        if config.must_exist && !path.exists() {
            return Err(TailError::NotFound(path));
        }

        let (lines_tx, lines_rx) = mpsc::channel(LINE_CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let task = tokio::spawn(tail_loop(path.clone(), config, lines_tx, shutdown_rx));

        Ok(Self {
            lines: lines_rx,
            shutdown: Some(shutdown_tx),
            task,
            path,
        })
    }

    /// Receive the next line. `None` once the tailer has stopped.
    pub async fn recv(&mut self) -> Option<Line> {
        self.lines.recv().await
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stop the tail loop and wait for it to finish.
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = self.task.await;
    }
}

/// Open state for the file currently being read.
struct OpenFile {
    file: File,
    ino: u64,
    offset: u64,
}

#[cfg(unix)]
fn inode_of(meta: &std::fs::Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    meta.ino()
}

#[cfg(not(unix))]
fn inode_of(_meta: &std::fs::Metadata) -> u64 {
    0
}

fn open_at(path: &Path, from_end: bool) -> std::io::Result<OpenFile> {
    let file = File::open(path)?;
    let meta = file.metadata()?;
    let offset = if from_end { meta.len() } else { 0 };
    Ok(OpenFile {
        file,
        ino: inode_of(&meta),
        offset,
    })
}

async fn tail_loop(
    path: PathBuf,
    config: TailConfig,
    lines_tx: mpsc::Sender<Line>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let mut current = match open_at(&path, config.from_end) {
        Ok(open) => Some(open),
        // Tolerated when must_exist was off: wait for creation
        Err(_) => None,
    };

    // Watch the parent directory so rotation (remove + create) is seen
    // even between polls. Watch failures degrade to pure polling.
    let (watch_tx, mut watch_rx) = mpsc::channel::<Result<(), String>>(32);
    let _watcher_guard = match create_dir_watcher(&path, watch_tx) {
        Ok(w) => Some(w),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "file watcher failed, falling back to polling");
            let _ = lines_tx
                .send(Line::sentinel(e.to_string(), path.clone()))
                .await;
            None
        }
    };

    loop {
        tokio::select! {
            maybe_event = watch_rx.recv() => {
                match maybe_event {
                    Some(Ok(())) => {
                        if !check_file(&path, &config, &mut current, &lines_tx).await {
                            break;
                        }
                    }
                    Some(Err(message)) => {
                        let _ = lines_tx.send(Line::sentinel(message, path.clone())).await;
                    }
                    None => break,
                }
            }

            _ = tokio::time::sleep(config.poll_interval) => {
                if !check_file(&path, &config, &mut current, &lines_tx).await {
                    break;
                }
                if !config.follow && current.is_some() {
                    // One pass over existing content is all non-follow mode wants
                    break;
                }
            }

            _ = &mut shutdown_rx => {
                debug!(path = %path.display(), "tailer shutdown requested");
                break;
            }
        }
    }
}

fn create_dir_watcher(
    path: &Path,
    tx: mpsc::Sender<Result<(), String>>,
) -> Result<RecommendedWatcher, notify::Error> {
    let watch_dir = path.parent().unwrap_or(Path::new(".")).to_path_buf();
    let target = path.to_path_buf();

    let mut watcher = notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| {
        let message = match res {
            Ok(event) => {
                if event.paths.is_empty() || event.paths.iter().any(|p| p == &target) {
                    let _ = tx.blocking_send(Ok(()));
                }
                return;
            }
            Err(e) => e.to_string(),
        };
        let _ = tx.blocking_send(Err(message));
    })?;

    watcher.watch(&watch_dir, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}

/// React to one signal: open/reopen the file as needed, detect rotation
/// and truncation, and emit any new complete lines.
///
/// Returns `false` when the line receiver is gone and the loop should
/// exit.
async fn check_file(
    path: &Path,
    config: &TailConfig,
    current: &mut Option<OpenFile>,
    lines_tx: &mpsc::Sender<Line>,
) -> bool {
    let meta = match std::fs::metadata(path) {
        Ok(m) => Some(m),
        // Rotated away or not created yet; keep the old handle and wait
        // for the path to reappear.
        Err(_) => None,
    };

    match (current.as_mut(), meta) {
        (None, Some(_)) => {
            // File appeared after startup; read it from the beginning
            match open_at(path, false) {
                Ok(open) => {
                    *current = Some(open);
                }
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "open failed, will retry");
                    return true;
                }
            }
        }

        (Some(open), Some(meta)) => {
            if inode_of(&meta) != open.ino {
                // Rotation: the path now names a different file. Drain
                // what remains of the old one first so its tail is not
                // lost, then switch if configured to.
                if !read_new_lines(open, path, lines_tx).await {
                    return false;
                }
                if config.reopen {
                    match reopen_rotated(path).await {
                        Some(fresh) => {
                            debug!(path = %path.display(), "rotated file reopened");
                            *current = Some(fresh);
                        }
                        None => {
                            warn!(path = %path.display(), "could not reopen rotated file");
                            return true;
                        }
                    }
                } else {
                    return true;
                }
            } else if meta.len() < open.offset {
                // Truncation in place (copytruncate): start over
                debug!(path = %path.display(), "file truncated, resetting to start");
                open.offset = 0;
            }
        }

        (Some(_), None) | (None, None) => return true,
    }

    if let Some(open) = current.as_mut() {
        return read_new_lines(open, path, lines_tx).await;
    }
    true
}

async fn reopen_rotated(path: &Path) -> Option<OpenFile> {
    for _ in 0..ROTATE_OPEN_RETRIES {
        match open_at(path, false) {
            Ok(open) => return Some(open),
            Err(_) => tokio::time::sleep(ROTATE_OPEN_DELAY).await,
        }
    }
    None
}

/// Read forward from the current offset, emitting complete lines.
///
/// A trailing partial line is left unconsumed (the offset is not
/// advanced past it) so it is re-read once the writer completes it.
async fn read_new_lines(open: &mut OpenFile, path: &Path, lines_tx: &mpsc::Sender<Line>) -> bool {
    if open.file.seek(SeekFrom::Start(open.offset)).is_err() {
        return true;
    }
    let mut reader = BufReader::new(&open.file);
    let mut buf = String::new();

    loop {
        buf.clear();
        let n = match reader.read_line(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "read error, stopping tailer");
                return false;
            }
        };

        if !buf.ends_with('\n') {
            // Partial line at EOF; rewind by leaving the offset alone
            break;
        }

        open.offset += n as u64;
        let text = buf.trim_end_matches('\n').trim_end_matches('\r').to_string();
        let line = Line::text_line(text, path.to_path_buf());
        if lines_tx.send(line).await.is_err() {
            return false;
        }
    }

    true
}

#[cfg(test)]
#[path = "tailer_tests.rs"]
mod tests;
