//! Run outcome record and the logger that accumulates it.
//!
//! A run produces exactly one terminal [`Record`]: status, latency, the
//! script's printed output as the message, and structured extras (error,
//! trace, artifacts). Diagnostics go to `tracing`; the record is the
//! user-visible outcome.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Mutex;
use std::time::Duration;

/// Terminal status of a run.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Healthy,
    Failure,
    Unknown,
}

/// The single terminal outcome of a scenario run.
#[derive(Clone, Debug, Serialize)]
pub struct Record {
    pub time: DateTime<Utc>,
    pub status: Status,
    pub latency_ms: u64,
    pub message: String,
    #[serde(skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Record {
    /// A failure record for errors raised before any script ran.
    pub fn failed(time: DateTime<Utc>, message: impl Into<String>) -> Record {
        Record {
            time,
            status: Status::Failure,
            latency_ms: 0,
            message: message.into(),
            extra: serde_json::Map::new(),
        }
    }
}

/// Accumulates script output and structured extras while a run executes.
pub struct Logger {
    debug: bool,
    inner: Mutex<Inner>,
}

struct Inner {
    status: Status,
    lines: Vec<String>,
    extra: serde_json::Map<String, serde_json::Value>,
}

impl Logger {
    pub fn new(debug: bool) -> Logger {
        Logger {
            debug,
            inner: Mutex::new(Inner {
                status: Status::Healthy,
                lines: Vec::new(),
                extra: serde_json::Map::new(),
            }),
        }
    }

    pub fn debug_enabled(&self) -> bool {
        self.debug
    }

    /// Append one line of script output.
    pub fn print(&self, line: impl Into<String>) {
        let line = line.into();
        tracing::info!(target: "webrun::script", "{line}");
        self.inner.lock().unwrap().lines.push(line);
    }

    pub fn set_extra(&self, key: &str, value: serde_json::Value) {
        self.inner
            .lock()
            .unwrap()
            .extra
            .insert(key.to_string(), value);
    }

    pub fn fail(&self) {
        self.inner.lock().unwrap().status = Status::Failure;
    }

    pub fn status(&self) -> Status {
        self.inner.lock().unwrap().status
    }

    /// Fold everything accumulated so far into a record.
    pub fn as_record(&self, time: DateTime<Utc>, latency: Duration) -> Record {
        let inner = self.inner.lock().unwrap();
        Record {
            time,
            status: inner.status,
            latency_ms: latency.as_millis() as u64,
            message: inner.lines.join("\n"),
            extra: inner.extra.clone(),
        }
    }
}
