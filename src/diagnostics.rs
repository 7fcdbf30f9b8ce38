//! Diagnostics sinks
//!
//! The governor reports through a [`DiagnosticsSink`] instead of calling
//! `tracing` directly, so a host can route messages into its own log. Sinks
//! are fire-and-forget and must not panic.

use std::error::Error as StdError;
use std::fmt::Write as _;
use std::sync::{Mutex, PoisonError};

pub trait DiagnosticsSink: Send + Sync {
    fn info(&self, msg: &str);
    fn warn(&self, msg: &str);
    fn error(&self, msg: &str, err: &(dyn StdError + 'static));
}

/// `msg: err: source: source ...`
pub fn error_chain(msg: &str, err: &(dyn StdError + 'static)) -> String {
    let mut out = format!("{msg}: {err}");
    let mut source = err.source();
    while let Some(inner) = source {
        let _ = write!(out, ": {inner}");
        source = inner.source();
    }
    out
}

/// Default sink forwarding to `tracing` under the `regulador` target
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl DiagnosticsSink for TracingSink {
    fn info(&self, msg: &str) {
        tracing::info!(target: "regulador", "{msg}");
    }

    fn warn(&self, msg: &str) {
        tracing::warn!(target: "regulador", "{msg}");
    }

    fn error(&self, msg: &str, err: &(dyn StdError + 'static)) {
        tracing::error!(target: "regulador", "{}", error_chain(msg, err));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub level: Level,
    pub message: String,
}

/// Sink keeping every message in memory
#[derive(Debug, Default)]
pub struct RecordingSink {
    records: Mutex<Vec<Record>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, level: Level, message: String) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Record { level, message });
    }

    pub fn records(&self) -> Vec<Record> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Messages at `level` containing `needle`
    pub fn count_matching(&self, level: Level, needle: &str) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|r| r.level == level && r.message.contains(needle))
            .count()
    }
}

impl DiagnosticsSink for RecordingSink {
    fn info(&self, msg: &str) {
        self.push(Level::Info, msg.to_string());
    }

    fn warn(&self, msg: &str) {
        self.push(Level::Warn, msg.to_string());
    }

    fn error(&self, msg: &str, err: &(dyn StdError + 'static)) {
        self.push(Level::Error, error_chain(msg, err));
    }
}
