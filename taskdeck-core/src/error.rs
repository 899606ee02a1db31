//! Error types shared across taskdeck crates

use thiserror::Error;

/// Failure reported by the backend for a single attempt.
///
/// Backend errors are data: the orchestrator inspects them to decide whether
/// to retry, and never panics on them.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    /// Network or server-side failure that may succeed on a later attempt.
    #[error("transient backend failure: {0}")]
    Transient(String),

    /// The backend refused the request (validation, not found, conflict).
    /// Retrying would produce the same answer.
    #[error("request rejected by backend: {0}")]
    Rejected(String),
}

impl BackendError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected(message.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Transient(message) | Self::Rejected(message) => message,
        }
    }
}

/// Result type for backend calls.
pub type BackendResult<T> = Result<T, BackendError>;
