use std::path::PathBuf;

use thiserror::Error;

use crate::browser::BrowserError;

#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("browser error: {0}")]
    Browser(#[from] BrowserError),
    #[error("download failed: {0}")]
    Download(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("harvest store path not configured")]
    MissingStore,
    #[error("failed to open database at {path}: {source}")]
    OpenDatabase {
        path: PathBuf,
        source: rusqlite::Error,
    },
}

impl From<reqwest::Error> for HarvestError {
    fn from(error: reqwest::Error) -> Self {
        HarvestError::Network(error.to_string())
    }
}

pub type HarvestResult<T> = std::result::Result<T, HarvestError>;
