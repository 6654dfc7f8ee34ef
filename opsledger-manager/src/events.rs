//! Typed publish/subscribe for UI consumers.

use opsledger_types::{ChangeId, EntityId};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::warn;

/// Notifications emitted by [`crate::DataManager`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ManagerEvent {
    EntityCreated {
        entity_id: EntityId,
        entity_type: String,
    },
    EntityUpdated {
        entity_id: EntityId,
        entity_type: String,
    },
    /// The entity is tombstoned locally; removal follows remote confirmation.
    EntityDeleted {
        entity_id: EntityId,
        entity_type: String,
    },
    ChangeAppended {
        change_id: ChangeId,
        entity_id: EntityId,
        seq: u64,
        is_offline: bool,
    },
    SyncStarted {
        pending: usize,
    },
    SyncCompleted {
        applied: usize,
        conflicts: usize,
        errors: usize,
    },
    ConflictDetected {
        change_id: ChangeId,
        entity_id: EntityId,
        fields: Vec<String>,
    },
    ConflictResolved {
        change_id: ChangeId,
        entity_id: EntityId,
    },
    ConnectivityChanged {
        online: bool,
    },
}

/// A live subscription. Dropping it unsubscribes.
pub struct Subscription {
    rx: broadcast::Receiver<ManagerEvent>,
}

impl Subscription {
    pub(crate) fn new(rx: broadcast::Receiver<ManagerEvent>) -> Self {
        Self { rx }
    }

    /// Waits for the next event. Returns `None` once the manager is gone.
    ///
    /// A subscriber that falls more than the buffer behind skips the
    /// events it missed.
    pub async fn recv(&mut self) -> Option<ManagerEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(n)) => warn!("Subscriber lagged, skipped {} events", n),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Returns the next buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<ManagerEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(n)) => warn!("Subscriber lagged, skipped {} events", n),
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    /// Every event currently buffered, oldest first.
    pub fn drain(&mut self) -> Vec<ManagerEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}
