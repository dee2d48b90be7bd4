//! Append-only operator log
//!
//! The scheduler reports line dispatches, completions and failures as
//! timestamped records into an injected [`LogSink`]. Two sinks are provided:
//! - [`MemoryLogSink`] keeps records in memory (previews, tests, UIs)
//! - [`TracingLogSink`] forwards records to `tracing`

use crate::types::{thread_safe_vec, ThreadSafeVec};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity of a log record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    /// Informational progress
    Info,
    /// Something unexpected but recoverable
    Warning,
    /// A failure
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warning => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// A single timestamped line record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    /// When the record was appended
    pub timestamp: DateTime<Utc>,
    /// Severity
    pub level: LogLevel,
    /// The line text
    pub line: String,
}

impl LogRecord {
    /// Create a record stamped with the current time
    pub fn now(level: LogLevel, line: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            line: line.into(),
        }
    }
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
            self.level,
            self.line
        )
    }
}

/// Append-only sink for operator-facing log lines
pub trait LogSink: Send + Sync {
    /// Append one record
    fn append(&self, record: LogRecord);

    /// Append an informational line
    fn info(&self, line: &str) {
        self.append(LogRecord::now(LogLevel::Info, line));
    }

    /// Append a warning line
    fn warn(&self, line: &str) {
        self.append(LogRecord::now(LogLevel::Warning, line));
    }

    /// Append an error line
    fn error(&self, line: &str) {
        self.append(LogRecord::now(LogLevel::Error, line));
    }
}

/// In-memory sink
#[derive(Debug, Clone, Default)]
pub struct MemoryLogSink {
    records: ThreadSafeVec<LogRecord>,
}

impl MemoryLogSink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self {
            records: thread_safe_vec(),
        }
    }

    /// Snapshot of every record appended so far
    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().clone()
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// True when nothing has been appended
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// True when any record line contains `needle`
    pub fn contains(&self, needle: &str) -> bool {
        self.records.lock().iter().any(|r| r.line.contains(needle))
    }
}

impl LogSink for MemoryLogSink {
    fn append(&self, record: LogRecord) {
        self.records.lock().push(record);
    }
}

/// Sink that forwards every record to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn append(&self, record: LogRecord) {
        match record.level {
            LogLevel::Info => tracing::info!(target: "motionkit::oplog", "{}", record.line),
            LogLevel::Warning => tracing::warn!(target: "motionkit::oplog", "{}", record.line),
            LogLevel::Error => tracing::error!(target: "motionkit::oplog", "{}", record.line),
        }
    }
}
