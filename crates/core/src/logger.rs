// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory ring logger.
//!
//! Append-only bounded buffer of structured entries, keyed by level and an
//! optional operation id. Every append is forwarded to `tracing`, so the
//! ring is a queryable window over the same stream the subscriber sees.
//! The service manager's snapshot request returns the ring contents.

use crate::clock::epoch_ms;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;

/// Default number of retained entries.
pub const DEFAULT_CAPACITY: usize = 512;

/// Severity of a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

crate::simple_display! {
    LogLevel {
        Debug => "debug",
        Info => "info",
        Warn => "warn",
        Error => "error",
    }
}

/// One structured record in the ring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub seq: u64,
    pub epoch_ms: u64,
    pub level: LogLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub op_id: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<(String, String)>,
}

struct Ring {
    entries: VecDeque<LogEntry>,
    capacity: usize,
    next_seq: u64,
    min_level: LogLevel,
}

/// Bounded in-memory structured logger.
#[derive(Clone)]
pub struct RingLogger {
    inner: Arc<Mutex<Ring>>,
}

impl Default for RingLogger {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl RingLogger {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Ring {
                entries: VecDeque::with_capacity(capacity.min(1024)),
                capacity: capacity.max(1),
                next_seq: 0,
                min_level: LogLevel::Debug,
            })),
        }
    }

    /// Drop appends below `level`.
    pub fn set_min_level(&self, level: LogLevel) {
        self.inner.lock().min_level = level;
    }

    /// Append an entry, evicting the oldest when at capacity.
    pub fn log(&self, level: LogLevel, op_id: Option<&str>, message: impl Into<String>) {
        self.log_with(level, op_id, message, Vec::new());
    }

    /// Append an entry carrying extra key/value fields.
    pub fn log_with(
        &self,
        level: LogLevel,
        op_id: Option<&str>,
        message: impl Into<String>,
        fields: Vec<(String, String)>,
    ) {
        let message = message.into();
        forward_to_tracing(level, op_id, &message, &fields);

        let mut ring = self.inner.lock();
        if level < ring.min_level {
            return;
        }
        let seq = ring.next_seq;
        ring.next_seq += 1;
        if ring.entries.len() == ring.capacity {
            ring.entries.pop_front();
        }
        ring.entries.push_back(LogEntry {
            seq,
            epoch_ms: epoch_ms(),
            level,
            op_id: op_id.map(str::to_string),
            message,
            fields,
        });
    }

    pub fn debug(&self, op_id: Option<&str>, message: impl Into<String>) {
        self.log(LogLevel::Debug, op_id, message);
    }

    pub fn info(&self, op_id: Option<&str>, message: impl Into<String>) {
        self.log(LogLevel::Info, op_id, message);
    }

    pub fn warn(&self, op_id: Option<&str>, message: impl Into<String>) {
        self.log(LogLevel::Warn, op_id, message);
    }

    pub fn error(&self, op_id: Option<&str>, message: impl Into<String>) {
        self.log(LogLevel::Error, op_id, message);
    }

    /// All retained entries, oldest first.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.inner.lock().entries.iter().cloned().collect()
    }

    /// Retained entries for one operation id, oldest first.
    pub fn for_op(&self, op_id: &str) -> Vec<LogEntry> {
        self.inner
            .lock()
            .entries
            .iter()
            .filter(|e| e.op_id.as_deref() == Some(op_id))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    pub fn clear(&self) {
        self.inner.lock().entries.clear();
    }
}

fn forward_to_tracing(level: LogLevel, op_id: Option<&str>, message: &str, fields: &[(String, String)]) {
    let fields = if fields.is_empty() {
        String::new()
    } else {
        let joined =
            fields.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join(" ");
        format!(" {joined}")
    };
    let op = op_id.unwrap_or("-");
    match level {
        LogLevel::Debug => tracing::debug!(op, "{}{}", message, fields),
        LogLevel::Info => tracing::info!(op, "{}{}", message, fields),
        LogLevel::Warn => tracing::warn!(op, "{}{}", message, fields),
        LogLevel::Error => tracing::error!(op, "{}{}", message, fields),
    }
}

#[cfg(test)]
#[path = "logger_tests.rs"]
mod tests;
