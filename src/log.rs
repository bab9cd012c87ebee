//! Append-only session log shown to the user.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub severity: Severity,
}

struct Inner {
    entries: Mutex<Vec<LogEntry>>,
    live: broadcast::Sender<LogEntry>,
}

/// Cheap to clone; every clone appends to the same sequence.
#[derive(Clone)]
pub struct SessionLog {
    inner: Arc<Inner>,
}

impl Default for SessionLog {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionLog {
    pub fn new() -> Self {
        let (live, _) = broadcast::channel(512);
        Self {
            inner: Arc::new(Inner {
                entries: Mutex::new(Vec::new()),
                live,
            }),
        }
    }

    /// Append a trimmed message. Blank messages are dropped.
    pub fn push(&self, message: impl AsRef<str>, severity: Severity) {
        let message = message.as_ref().trim();
        if message.is_empty() {
            return;
        }

        match severity {
            Severity::Info => tracing::info!(target: "devstage::session", "{message}"),
            Severity::Warn => tracing::warn!(target: "devstage::session", "{message}"),
            Severity::Error => tracing::error!(target: "devstage::session", "{message}"),
        }

        let entry = LogEntry {
            timestamp: Utc::now(),
            message: message.to_string(),
            severity,
        };
        self.lock().push(entry.clone());
        let _ = self.inner.live.send(entry);
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.push(message, Severity::Info);
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        self.push(message, Severity::Warn);
    }

    pub fn error(&self, message: impl AsRef<str>) {
        self.push(message, Severity::Error);
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Bulk clear, on explicit user request only.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Entries appended after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.inner.live.subscribe()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<LogEntry>> {
        self.inner
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
