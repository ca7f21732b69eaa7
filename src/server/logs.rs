//! Per-server log buffering.
//!
//! Every line a server prints becomes a [`LogEntry`]. Entries are kept in a
//! bounded ring buffer; when it is full the oldest entry is evicted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Default number of entries kept per server
pub const DEFAULT_LOG_CAPACITY: usize = 1000;

/// Where a log entry came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogSeverity {
    /// Standard output, or a lifecycle note from the manager
    Info,
    /// Standard error, or a supervision failure
    Error,
    /// A console command sent by the user
    Command,
}

/// A single log line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub severity: LogSeverity,
    pub message: String,
}

impl LogEntry {
    /// Create a new entry stamped with the current time
    pub fn new(severity: LogSeverity, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            severity,
            message: message.into(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(LogSeverity::Info, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(LogSeverity::Error, message)
    }
}

/// Ring buffer storing the most recent log lines of one server
#[derive(Debug)]
pub struct LogBuffer {
    entries: VecDeque<LogEntry>,
    capacity: usize,
}

impl LogBuffer {
    /// Create an empty buffer holding at most `capacity` entries
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity.min(DEFAULT_LOG_CAPACITY)),
            capacity,
        }
    }

    /// Add an entry, removing the oldest if at capacity
    pub fn push(&mut self, entry: LogEntry) {
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// The last `max_lines` entries in arrival order
    pub fn tail(&self, max_lines: usize) -> Vec<LogEntry> {
        let skip = self.entries.len().saturating_sub(max_lines);
        self.entries.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}
