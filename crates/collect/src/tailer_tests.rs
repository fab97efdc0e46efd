// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::io::Write;
use std::time::Duration;

fn fast_config() -> TailConfig {
    TailConfig {
        poll_interval: Duration::from_millis(20),
        ..TailConfig::default()
    }
}

fn append(path: &Path, text: &str) {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .unwrap();
    file.write_all(text.as_bytes()).unwrap();
    file.sync_all().unwrap();
}

async fn expect_line(tailer: &mut Tailer) -> Line {
    tokio::time::timeout(Duration::from_secs(5), tailer.recv())
        .await
        .expect("timed out waiting for line")
        .expect("tailer closed unexpectedly")
}

async fn expect_text(tailer: &mut Tailer) -> String {
    loop {
        let line = expect_line(tailer).await;
        if line.err.is_none() {
            return line.text;
        }
    }
}

#[tokio::test]
async fn emits_appended_lines_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a.log");
    append(&path, "one\n");

    let mut tailer = Tailer::start(&path, fast_config()).unwrap();
    assert_eq!(expect_text(&mut tailer).await, "one");

    append(&path, "two\nthree\n");
    assert_eq!(expect_text(&mut tailer).await, "two");
    assert_eq!(expect_text(&mut tailer).await, "three");

    tailer.stop().await;
}

#[tokio::test]
async fn from_end_skips_existing_content() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a.log");
    append(&path, "old-1\nold-2\n");

    let config = TailConfig {
        from_end: true,
        ..fast_config()
    };
    let mut tailer = Tailer::start(&path, config).unwrap();

    append(&path, "new\n");
    assert_eq!(expect_text(&mut tailer).await, "new");

    tailer.stop().await;
}

#[tokio::test]
async fn survives_rotation() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a.log");
    append(&path, "one\n");

    let config = TailConfig {
        from_end: true,
        ..fast_config()
    };
    let mut tailer = Tailer::start(&path, config).unwrap();

    append(&path, "two\n");
    assert_eq!(expect_text(&mut tailer).await, "two");

    std::fs::rename(&path, dir.path().join("a.log.1")).unwrap();
    append(&path, "three\n");
    assert_eq!(expect_text(&mut tailer).await, "three");

    tailer.stop().await;
}

#[tokio::test]
async fn rotation_does_not_lose_the_old_tail() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a.log");
    append(&path, "start\n");

    let config = TailConfig {
        from_end: true,
        ..fast_config()
    };
    let mut tailer = Tailer::start(&path, config).unwrap();
    // Let the tailer catch up to the live end before rotating
    append(&path, "pre-rotate\n");
    assert_eq!(expect_text(&mut tailer).await, "pre-rotate");

    // Rotate immediately; the unread tail of the old file must still
    // arrive before lines of the new one.
    append(&path, "old-tail\n");
    std::fs::rename(&path, dir.path().join("a.log.1")).unwrap();
    append(&path, "new-file\n");

    assert_eq!(expect_text(&mut tailer).await, "old-tail");
    assert_eq!(expect_text(&mut tailer).await, "new-file");

    tailer.stop().await;
}

#[tokio::test]
async fn survives_truncation() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a.log");
    append(&path, "aaaaaaaaaaaaaaaaaaaa");

    let config = TailConfig {
        from_end: true,
        ..fast_config()
    };
    let mut tailer = Tailer::start(&path, config).unwrap();

    // copytruncate-style: shrink in place, then write fresh content
    let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
    file.set_len(0).unwrap();
    drop(file);
    append(&path, "after\n");

    assert_eq!(expect_text(&mut tailer).await, "after");

    tailer.stop().await;
}

#[tokio::test]
async fn partial_line_is_held_until_completed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a.log");
    append(&path, "");

    let mut tailer = Tailer::start(&path, fast_config()).unwrap();

    append(&path, "incompl");
    // Give a few polls the chance to (wrongly) emit the fragment
    tokio::time::sleep(Duration::from_millis(100)).await;
    append(&path, "ete\n");

    assert_eq!(expect_text(&mut tailer).await, "incomplete");

    tailer.stop().await;
}

#[tokio::test]
async fn strips_crlf_endings() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a.log");
    append(&path, "windows\r\nunix\n");

    let mut tailer = Tailer::start(&path, fast_config()).unwrap();
    assert_eq!(expect_text(&mut tailer).await, "windows");
    assert_eq!(expect_text(&mut tailer).await, "unix");

    tailer.stop().await;
}

#[tokio::test]
async fn waits_for_file_to_appear() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("late.log");

    let mut tailer = Tailer::start(&path, fast_config()).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    append(&path, "here\n");

    assert_eq!(expect_text(&mut tailer).await, "here");

    tailer.stop().await;
}

#[tokio::test]
async fn must_exist_fails_on_missing_path() {
    let dir = tempfile::tempdir().unwrap();
    let config = TailConfig {
        must_exist: true,
        ..fast_config()
    };

    let err = Tailer::start(dir.path().join("absent.log"), config).unwrap_err();
    assert!(matches!(err, TailError::NotFound(_)));
}

#[tokio::test]
async fn stop_closes_the_line_stream() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a.log");
    append(&path, "x\n");

    let tailer = Tailer::start(&path, fast_config()).unwrap();
    tailer.stop().await;
}
