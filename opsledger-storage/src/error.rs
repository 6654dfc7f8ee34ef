//! Error types for the storage layer.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Entity or change not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// IO error (file system).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid data read back from the backend.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Rejected by the model (illegal state transition, bad payload).
    #[error(transparent)]
    Model(#[from] opsledger_model::ModelError),

    /// A blocking flush/load task failed to complete.
    #[error("background task failed: {0}")]
    Task(String),
}
