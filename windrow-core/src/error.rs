use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config directory {path} does not exist")]
    MissingDirectory { path: PathBuf },
    #[error("cannot read config file {path}: {source}")]
    Io { source: io::Error, path: PathBuf },
    #[error("invalid TOML in {path}: {source}")]
    Parse {
        source: toml::de::Error,
        path: PathBuf,
    },
}

pub type Result<T> = std::result::Result<T, ConfigError>;
