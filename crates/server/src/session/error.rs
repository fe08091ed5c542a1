//! Error types for store operations.

use thiserror::Error;

/// Errors that can occur during session store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Input rejected before any side effect.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Wrong or missing owner token, or the session does not exist.
    /// The two causes are deliberately indistinguishable.
    #[error("forbidden")]
    Forbidden,

    /// Session not found.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Thread not found in the referenced session.
    #[error("thread not found: {0}")]
    ThreadNotFound(String),

    /// Message not found in the referenced thread.
    #[error("message not found: {0}")]
    MessageNotFound(String),

    /// Database error.
    #[error("database error: {0}")]
    Database(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Generic error.
    #[error("{0}")]
    Other(String),
}

/// Convenience type alias for Result with StoreError.
pub type StoreResult<T> = Result<T, StoreError>;

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}
