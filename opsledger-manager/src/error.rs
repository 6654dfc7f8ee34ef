//! Error types for the manager.

use opsledger_model::ModelError;
use opsledger_storage::StorageError;
use opsledger_sync::SyncError;
use thiserror::Error;

/// Result type for manager operations.
pub type ManagerResult<T> = Result<T, ManagerError>;

/// Errors surfaced to the application.
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("not found: {0}")]
    NotFound(String),

    /// Rejected before anything was written.
    #[error("validation error: {0}")]
    Validation(String),

    /// The operation does not fit the change's current sync state.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("data manager is not initialized")]
    NotInitialized,

    #[error("data manager has been disposed")]
    Disposed,

    #[error("device is offline")]
    Offline,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(StorageError),

    #[error("sync error: {0}")]
    Sync(SyncError),
}

impl ManagerError {
    /// Banner text for the UI.
    pub fn user_message(&self) -> String {
        match self {
            ManagerError::NotFound(_) => "This record no longer exists.".to_string(),
            ManagerError::Validation(msg) => format!("Please check your input: {msg}"),
            ManagerError::Conflict(_) => {
                "This record was changed elsewhere. Review the conflict to continue.".to_string()
            }
            ManagerError::NotInitialized => "Your data is still loading.".to_string(),
            ManagerError::Disposed => "The data session has been closed.".to_string(),
            ManagerError::Offline => {
                "You are offline. Changes are saved on this device and will sync when you reconnect."
                    .to_string()
            }
            ManagerError::Config(msg) => format!("Invalid configuration: {msg}"),
            ManagerError::Storage(_) => "Could not save data on this device.".to_string(),
            ManagerError::Sync(_) => {
                "Sync failed. Your changes are kept and will be retried.".to_string()
            }
        }
    }

    /// Whether retrying the same call later can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ManagerError::Offline | ManagerError::Sync(SyncError::Transport(_)))
    }
}

impl From<ModelError> for ManagerError {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::Validation(msg) => ManagerError::Validation(msg),
            ModelError::InvalidTransition { from, to } => {
                ManagerError::Conflict(format!("change cannot move from {from:?} to {to:?}"))
            }
            other => ManagerError::Storage(StorageError::Model(other)),
        }
    }
}

impl From<StorageError> for ManagerError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(what) => ManagerError::NotFound(what),
            StorageError::Model(model) => model.into(),
            other => ManagerError::Storage(other),
        }
    }
}

impl From<SyncError> for ManagerError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::NotFound(what) => ManagerError::NotFound(what),
            conflict @ SyncError::Conflict { .. } => ManagerError::Conflict(conflict.to_string()),
            SyncError::Storage(storage) => storage.into(),
            SyncError::Model(model) => model.into(),
            other => ManagerError::Sync(other),
        }
    }
}
