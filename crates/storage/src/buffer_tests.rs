// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use shiplog_core::LogRecord;
use std::io::Write as _;
use yare::parameterized;

fn record(message: &str) -> LogRecord {
    let mut r = LogRecord::from_message(message);
    r.source = "test".to_string();
    r
}

fn records(messages: &[&str]) -> Vec<LogRecord> {
    messages.iter().map(|m| record(m)).collect()
}

fn open_in(dir: &Path) -> DiskBuffer {
    DiskBuffer::open(BufferConfig::new(dir)).unwrap()
}

fn messages_of(records: &[LogRecord]) -> Vec<String> {
    records.iter().map(|r| r.message.clone()).collect()
}

#[test]
fn round_trips_records_in_fifo_order() {
    let dir = tempfile::tempdir().unwrap();
    let mut buffer = open_in(dir.path());

    let input = records(&["one", "two", "three"]);
    buffer.write(&input).unwrap();
    assert_eq!(buffer.len(), 3);

    let out = buffer.read(3).unwrap();
    assert_eq!(out, input);
    assert!(buffer.is_empty());
}

#[parameterized(
    single = { 1 },
    pairs = { 2 },
    all_at_once = { 10 },
)]
fn reads_in_chunks_preserve_order(chunk: usize) {
    let dir = tempfile::tempdir().unwrap();
    let mut buffer = open_in(dir.path());

    let input: Vec<LogRecord> = (0..10).map(|i| record(&format!("m{i}"))).collect();
    buffer.write(&input).unwrap();

    let mut out = Vec::new();
    while !buffer.is_empty() {
        out.extend(buffer.read(chunk).unwrap());
    }
    assert_eq!(out, input);
}

#[test]
fn read_on_empty_buffer_returns_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let mut buffer = open_in(dir.path());
    assert!(buffer.read(5).unwrap().is_empty());
}

#[test]
fn persists_across_close_and_reopen() {
    let dir = tempfile::tempdir().unwrap();

    {
        let mut buffer = open_in(dir.path());
        buffer.write(&records(&["p1", "p2"])).unwrap();
        buffer.close().unwrap();
    }

    let mut buffer = open_in(dir.path());
    assert_eq!(buffer.len(), 2);
    let out = buffer.read(2).unwrap();
    assert_eq!(messages_of(&out), vec!["p1", "p2"]);
}

#[test]
fn evicts_oldest_when_full_and_keeps_fifo_tail() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = BufferConfig::new(dir.path());
    config.max_size_bytes = 2000;
    let mut buffer = DiskBuffer::open(config).unwrap();

    let input: Vec<LogRecord> = (0..20)
        .map(|i| record(&format!("padded-message-{i:04}")))
        .collect();
    for r in &input {
        buffer.write(std::slice::from_ref(r)).unwrap();
        assert!(buffer.active_size() <= 2000);
    }

    let survivors = buffer.len();
    assert!(survivors > 0);
    assert!(survivors < 20);

    let out = buffer.read(20).unwrap();
    // Eviction only removes from the head, so what survives is a
    // contiguous tail of the input, still in order.
    let tail = &input[input.len() - out.len()..];
    assert_eq!(out, tail);
}

#[test]
fn compaction_preserves_remaining_records() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = BufferConfig::new(dir.path());
    config.compact_threshold = 0.1;
    let mut buffer = DiskBuffer::open(config).unwrap();

    let input: Vec<LogRecord> = (0..12).map(|i| record(&format!("c{i}"))).collect();
    buffer.write(&input).unwrap();

    // Consuming a third crosses the 10% threshold and compacts.
    let first = buffer.read(4).unwrap();
    assert_eq!(first, input[..4].to_vec());
    assert_eq!(buffer.active_size(), buffer.path().metadata().unwrap().len());

    buffer.write(&records(&["late"])).unwrap();

    let mut rest = Vec::new();
    while !buffer.is_empty() {
        rest.extend(buffer.read(3).unwrap());
    }
    let mut expected = input[4..].to_vec();
    expected.push(record("late"));
    assert_eq!(messages_of(&rest), messages_of(&expected));
}

#[test]
fn explicit_compact_resets_read_offset() {
    let dir = tempfile::tempdir().unwrap();
    let mut buffer = open_in(dir.path());

    buffer.write(&records(&["a", "b", "c"])).unwrap();
    buffer.read(2).unwrap();
    buffer.compact_now().unwrap();

    assert_eq!(buffer.len(), 1);
    let out = buffer.read(1).unwrap();
    assert_eq!(messages_of(&out), vec!["c"]);
}

#[test]
fn truncated_trailing_frame_is_discarded_on_open() {
    let dir = tempfile::tempdir().unwrap();

    {
        let mut buffer = open_in(dir.path());
        buffer.write(&records(&["whole-1", "whole-2"])).unwrap();
        buffer.close().unwrap();
    }

    // Simulate a crash mid-append: a frame header promising more bytes
    // than the file holds.
    let path = dir.path().join("buffer.dat");
    let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(&500u32.to_be_bytes()).unwrap();
    file.write_all(b"partial").unwrap();
    drop(file);

    let mut buffer = open_in(dir.path());
    assert_eq!(buffer.len(), 2);
    let out = buffer.read(2).unwrap();
    assert_eq!(messages_of(&out), vec!["whole-1", "whole-2"]);
}

#[test]
fn garbage_file_heals_to_empty() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path()).unwrap();
    std::fs::write(dir.path().join("buffer.dat"), [0u8; 7]).unwrap();

    let buffer = open_in(dir.path());
    assert!(buffer.is_empty());
    assert_eq!(buffer.active_size(), 0);
}

#[test]
fn clear_drops_everything() {
    let dir = tempfile::tempdir().unwrap();
    let mut buffer = open_in(dir.path());

    buffer.write(&records(&["x", "y"])).unwrap();
    buffer.clear().unwrap();

    assert!(buffer.is_empty());
    assert_eq!(buffer.active_size(), 0);
    assert!(buffer.read(2).unwrap().is_empty());

    buffer.write(&records(&["z"])).unwrap();
    assert_eq!(messages_of(&buffer.read(1).unwrap()), vec!["z"]);
}

#[test]
fn second_open_of_same_dir_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let _first = open_in(dir.path());

    let err = DiskBuffer::open(BufferConfig::new(dir.path())).unwrap_err();
    assert!(matches!(err, BufferError::Locked(_)));
}

#[cfg(unix)]
#[test]
fn buffer_file_is_private() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let mut buffer = open_in(dir.path());
    buffer.write(&records(&["secret"])).unwrap();

    let mode = buffer.path().metadata().unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600);
}
