// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! shiplog-collect: file tailing and record collection.
//!
//! A [`Tailer`] follows a single file across rotation and truncation.
//! A [`MultiTailer`] expands glob patterns, watches for new matches, and
//! multiplexes one tailer per matched file. A [`Collector`] binds the
//! merged line stream to a [`shiplog_core::Parser`] and enriches the
//! parsed records with source identity.

pub mod collector;
pub mod multi;
pub mod parsers;
pub mod tailer;

pub use collector::{Collector, CollectorConfig};
pub use multi::MultiTailer;
pub use parsers::{by_name, JsonLineParser, PlainTextParser};
pub use tailer::{Line, TailConfig, TailError, Tailer};
