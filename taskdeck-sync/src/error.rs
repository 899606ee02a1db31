//! Error types for the sync engine.

use crate::config::ConfigError;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Sync engine is shut down")]
    EngineClosed,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Invalid header value: {0}")]
    InvalidHeader(String),
    #[error("Failed to initialize tracing: {0}")]
    Telemetry(String),
}

pub type SyncResult<T> = Result<T, SyncError>;
