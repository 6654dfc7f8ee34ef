//! Error types for the model layer.

use crate::ChangeState;
use thiserror::Error;

/// Result type for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors raised while validating or applying mutations.
#[derive(Debug, Error)]
pub enum ModelError {
    /// Malformed mutation payload; rejected before it reaches the change log.
    #[error("validation error: {0}")]
    Validation(String),

    /// A change was asked to move to a state its current state cannot reach.
    #[error("invalid state transition: {from:?} -> {to:?}")]
    InvalidTransition { from: ChangeState, to: ChangeState },

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ModelError {
    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}
