// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Parser capability consumed by collectors.

use thiserror::Error;

use crate::record::LogRecord;

/// Errors a parser can report for a single line.
///
/// Parse errors are never fatal to a collector: the line is counted and
/// skipped.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed line: {0}")]
    Malformed(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Turns one raw line into a structured record.
///
/// Implementations must be cheap to call per line and must not block.
/// Source identity, labels, and line numbers are filled in by the
/// collector after a successful parse.
pub trait Parser: Send + Sync {
    fn parse(&self, line: &str) -> Result<LogRecord, ParseError>;
}

impl<P: Parser + ?Sized> Parser for std::sync::Arc<P> {
    fn parse(&self, line: &str) -> Result<LogRecord, ParseError> {
        (**self).parse(line)
    }
}
