// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Glob-aware multiplexing tailer.
//!
//! Each configured pattern (literal path or glob) is expanded to its
//! current matches, one [`Tailer`] per match. Pattern parent directories
//! are watched so files created later are picked up and tailed from
//! their end. Matching of directory events is done against the full
//! absolute path, the same way startup expansion matches.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::tailer::{Line, TailConfig, TailError, Tailer, LINE_CHANNEL_CAPACITY};

/// Union of all lines produced by the tailers of a set of patterns.
#[derive(Debug)]
pub struct MultiTailer {
    lines: mpsc::Receiver<Line>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl MultiTailer {
    /// Expand `patterns` and start one tailer per existing match.
    ///
    /// With `must_exist`, a pattern with zero matches fails startup.
    pub fn start(patterns: &[String], config: TailConfig) -> Result<Self, TailError> {
        let mut compiled = Vec::with_capacity(patterns.len());
        let mut matched = Vec::new();

        for pattern in patterns {
            let paths: Vec<PathBuf> = glob::glob(pattern)?.filter_map(Result::ok).collect();
            if config.must_exist && paths.is_empty() {
                return Err(TailError::NoMatch(pattern.clone()));
            }
            compiled.push(glob::Pattern::new(pattern)?);
            matched.extend(paths);
        }

        let (lines_tx, lines_rx) = mpsc::channel(LINE_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();

        let mut forwarders = JoinSet::new();
        let mut active: HashSet<PathBuf> = HashSet::new();
        for path in matched {
            if !active.insert(path.clone()) {
                continue;
            }
            let child_config = TailConfig {
                must_exist: false,
                ..config.clone()
            };
            let tailer = Tailer::start(&path, child_config)?;
            forwarders.spawn(forward_lines(tailer, lines_tx.clone(), cancel.clone()));
        }

        // Watch every pattern's parent directory for newly created matches
        let (event_tx, event_rx) = mpsc::channel::<Result<PathBuf, String>>(32);
        let watcher = match create_pattern_watcher(patterns, event_tx) {
            Ok(w) => Some(w),
            Err(e) => {
                warn!(error = %e, "pattern watcher failed, new files will not be discovered");
                None
            }
        };

        let task = tokio::spawn(supervise(SuperviseParams {
            compiled,
            config,
            active,
            forwarders,
            watcher,
            event_rx,
            lines_tx,
            cancel: cancel.clone(),
        }));

        Ok(Self {
            lines: lines_rx,
            cancel,
            task,
        })
    }

    /// Receive the next line from any child tailer.
    pub async fn recv(&mut self) -> Option<Line> {
        self.lines.recv().await
    }

    /// Stop all children, wait for their forwarders, close the output.
    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }
}

struct SuperviseParams {
    compiled: Vec<glob::Pattern>,
    config: TailConfig,
    active: HashSet<PathBuf>,
    forwarders: JoinSet<()>,
    // NOTE(lifetime): dropped when supervision ends, stopping the watch
    watcher: Option<RecommendedWatcher>,
    event_rx: mpsc::Receiver<Result<PathBuf, String>>,
    lines_tx: mpsc::Sender<Line>,
    cancel: CancellationToken,
}

async fn supervise(params: SuperviseParams) {
    let SuperviseParams {
        compiled,
        config,
        mut active,
        mut forwarders,
        watcher: _watcher,
        mut event_rx,
        lines_tx,
        cancel,
    } = params;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            maybe_event = event_rx.recv() => {
                match maybe_event {
                    Some(Ok(path)) => {
                        if !compiled.iter().any(|p| p.matches_path(&path)) {
                            continue;
                        }
                        if !active.insert(path.clone()) {
                            continue;
                        }
                        debug!(path = %path.display(), "new file matches pattern, tailing from end");
                        // Created files are tailed from their end; anything
                        // written before the tailer attaches within the same
                        // instant is part of pre-existing content.
                        let child_config = TailConfig {
                            must_exist: false,
                            from_end: true,
                            ..config.clone()
                        };
                        match Tailer::start(&path, child_config) {
                            Ok(tailer) => {
                                forwarders.spawn(forward_lines(tailer, lines_tx.clone(), cancel.clone()));
                            }
                            Err(e) => {
                                warn!(path = %path.display(), error = %e, "failed to tail new file");
                            }
                        }
                    }
                    Some(Err(message)) => {
                        let _ = lines_tx.send(Line {
                            text: String::new(),
                            file_path: PathBuf::new(),
                            time: chrono::Utc::now(),
                            err: Some(message),
                        }).await;
                    }
                    None => break,
                }
            }
        }
    }

    // Forwarders observe the same cancellation; wait until each has
    // stopped its tailer before the output channel closes.
    while forwarders.join_next().await.is_some() {}
}

async fn forward_lines(mut tailer: Tailer, lines_tx: mpsc::Sender<Line>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            maybe_line = tailer.recv() => {
                match maybe_line {
                    Some(line) => {
                        if lines_tx.send(line).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }
    tailer.stop().await;
}

fn create_pattern_watcher(
    patterns: &[String],
    tx: mpsc::Sender<Result<PathBuf, String>>,
) -> Result<RecommendedWatcher, notify::Error> {
    let mut watcher = notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| {
        match res {
            Ok(event) => {
                if matches!(event.kind, notify::EventKind::Create(_)) {
                    for path in event.paths {
                        let _ = tx.blocking_send(Ok(path));
                    }
                }
            }
            Err(e) => {
                let _ = tx.blocking_send(Err(e.to_string()));
            }
        }
    })?;

    let mut watched: HashSet<PathBuf> = HashSet::new();
    for pattern in patterns {
        let dir = parent_dir(Path::new(pattern));
        if watched.insert(dir.clone()) && dir.is_dir() {
            watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        }
    }

    Ok(watcher)
}

/// Deepest non-glob ancestor of a pattern, used as the watch root.
fn parent_dir(pattern: &Path) -> PathBuf {
    let mut dir = PathBuf::new();
    for component in pattern.components() {
        let text = component.as_os_str().to_string_lossy();
        if text.contains(['*', '?', '[']) {
            break;
        }
        dir.push(component);
    }
    // The last literal component is the file name unless the pattern
    // ended in a glob; watching its parent covers both cases.
    if dir == pattern {
        dir.pop();
    }
    if dir.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        dir
    }
}

#[cfg(test)]
#[path = "multi_tests.rs"]
mod tests;
