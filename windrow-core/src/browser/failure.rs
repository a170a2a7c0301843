use std::fs::{create_dir_all, File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::error::{BrowserError, BrowserResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailureKind {
    Fatal,
    Transient,
}

pub struct FailureClassifier;

impl FailureClassifier {
    pub fn classify(error: &BrowserError) -> FailureKind {
        match error {
            BrowserError::SessionClosed(_) => FailureKind::Fatal,
            BrowserError::Launch(_) => FailureKind::Fatal,
            BrowserError::Cdp(err) => {
                let text = err.to_string().to_lowercase();
                if text.contains("disconnected")
                    || text.contains("browser closed")
                    || text.contains("invalid session")
                    || text.contains("websocket")
                    || text.contains("connection reset")
                    || text.contains("channel closed")
                {
                    FailureKind::Fatal
                } else {
                    FailureKind::Transient
                }
            }
            BrowserError::Unexpected(message) => {
                let text = message.to_lowercase();
                if text.contains("disconnected") || text.contains("browser closed") {
                    FailureKind::Fatal
                } else {
                    FailureKind::Transient
                }
            }
            BrowserError::Timeout(_)
            | BrowserError::Io(_)
            | BrowserError::Configuration(_)
            | BrowserError::Extraction(_) => FailureKind::Transient,
        }
    }
}

pub fn classify(error: &BrowserError) -> FailureKind {
    FailureClassifier::classify(error)
}

#[derive(Debug, Clone, Serialize)]
pub struct FailureEntry {
    pub timestamp: DateTime<Utc>,
    pub target_id: String,
    pub url: String,
    pub kind: FailureKind,
    pub error_message: String,
    pub attempt: usize,
}

#[derive(Debug)]
pub struct FailureLog {
    log: Mutex<File>,
}

impl FailureLog {
    pub fn new(log_path: impl AsRef<Path>) -> std::io::Result<Self> {
        let log_path = log_path.as_ref().to_path_buf();
        if let Some(parent) = log_path.parent() {
            create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;
        Ok(Self {
            log: Mutex::new(file),
        })
    }

    pub fn record(&self, entry: &FailureEntry) -> BrowserResult<()> {
        let json = serde_json::to_string(entry)
            .map_err(|err| BrowserError::Unexpected(err.to_string()))?;
        if let Ok(mut guard) = self.log.lock() {
            writeln!(guard, "{json}")?;
            guard.flush()?;
        }
        Ok(())
    }
}

pub fn log_failure(
    log: &FailureLog,
    target_id: &str,
    url: &str,
    error: &BrowserError,
    attempt: usize,
) -> BrowserResult<()> {
    let entry = FailureEntry {
        timestamp: Utc::now(),
        target_id: target_id.to_string(),
        url: url.to_string(),
        kind: classify(error),
        error_message: error.to_string(),
        attempt,
    };
    log.record(&entry)
}
