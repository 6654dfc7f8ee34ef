//! Error types for the sync layer.

use crate::remote::RemoteRecord;
use opsledger_model::ModelError;
use opsledger_storage::StorageError;
use opsledger_types::ChangeId;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors returned by a [`crate::RemoteAuthority`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RemoteError {
    /// The remote holds a different version than the one the push expected.
    /// `current` is `None` when the remote no longer has the record.
    #[error("version mismatch (remote at {})", current.as_ref().map_or(0, |r| r.version))]
    VersionMismatch { current: Option<RemoteRecord> },

    /// Network error, timeout or server failure. Retryable.
    #[error("transport error: {0}")]
    Transport(String),

    /// The remote refused the payload.
    #[error("rejected: {0}")]
    Rejected(String),

    /// The record does not exist remotely.
    #[error("not found")]
    NotFound,
}

/// Errors that can occur in sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A pending change cannot be replayed on the remote record a
    /// resolution would adopt.
    #[error("change {change_id} cannot apply on remote version {remote_version}: {reason}")]
    Conflict {
        change_id: ChangeId,
        remote_version: u64,
        reason: String,
    },

    /// Network error after all retries.
    #[error("transport error: {0}")]
    Transport(String),

    /// The remote refused the change.
    #[error("rejected by remote: {0}")]
    Rejected(String),

    /// Change, entity or conflict not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Storage error.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Model error (illegal transition, unreplayable change).
    #[error(transparent)]
    Model(#[from] ModelError),
}

impl From<RemoteError> for SyncError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Transport(msg) => SyncError::Transport(msg),
            RemoteError::Rejected(msg) => SyncError::Rejected(msg),
            RemoteError::NotFound => SyncError::NotFound("remote record".to_string()),
            RemoteError::VersionMismatch { current } => {
                SyncError::Rejected(format!("unexpected version mismatch: {current:?}"))
            }
        }
    }
}
