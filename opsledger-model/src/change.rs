//! Change log entries and the per-mutation state machine.

use crate::error::{ModelError, ModelResult};
use opsledger_types::{ChangeId, EntityId, HybridTimestamp};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The mutation a change carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ChangeOp {
    /// Creates the entity with a full payload.
    Create { data: Value },
    /// Overwrites the listed top-level fields.
    SetFields { fields: Map<String, Value> },
    /// Adds `delta` to a numeric field.
    Adjust { field: String, delta: f64 },
    /// Deletes the entity.
    Delete,
}

impl ChangeOp {
    /// Top-level fields this operation writes. Empty for `Delete`.
    pub fn touched_fields(&self) -> Vec<String> {
        match self {
            ChangeOp::Create { data } => data
                .as_object()
                .map(|o| o.keys().cloned().collect())
                .unwrap_or_default(),
            ChangeOp::SetFields { fields } => fields.keys().cloned().collect(),
            ChangeOp::Adjust { field, .. } => vec![field.clone()],
            ChangeOp::Delete => Vec::new(),
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, ChangeOp::Delete)
    }

    pub fn is_create(&self) -> bool {
        matches!(self, ChangeOp::Create { .. })
    }

    /// Short name used in logs and events.
    pub fn kind(&self) -> &'static str {
        match self {
            ChangeOp::Create { .. } => "create",
            ChangeOp::SetFields { .. } => "set_fields",
            ChangeOp::Adjust { .. } => "adjust",
            ChangeOp::Delete => "delete",
        }
    }
}

/// Sync state of a single change.
///
/// ```text
/// Unsynced -> Syncing -> Synced
///             Syncing -> Unsynced                  (transport failure)
///             Syncing -> Conflict -> ManuallyResolved -> Syncing | Synced
///                        Conflict -> Reverted -> Unsynced
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeState {
    Unsynced,
    Syncing,
    Synced,
    Conflict,
    ManuallyResolved,
    Reverted,
}

impl ChangeState {
    /// Whether `self -> to` is an edge of the state machine.
    pub fn can_transition_to(self, to: ChangeState) -> bool {
        use ChangeState::*;
        matches!(
            (self, to),
            (Unsynced, Syncing)
                | (Syncing, Synced)
                | (Syncing, Unsynced)
                | (Syncing, Conflict)
                | (Conflict, ManuallyResolved)
                | (Conflict, Reverted)
                | (ManuallyResolved, Syncing)
                | (ManuallyResolved, Synced)
                | (Reverted, Unsynced)
        )
    }

    /// States a sync pass may pick up and push.
    pub fn is_pushable(self) -> bool {
        matches!(self, ChangeState::Unsynced | ChangeState::ManuallyResolved)
    }
}

/// One mutation intent recorded before the remote confirms it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub id: ChangeId,
    /// Strictly increasing local sequence number, assigned on append.
    pub seq: u64,
    pub entity_id: EntityId,
    pub entity_type: String,
    pub op: ChangeOp,
    /// Entity version the change was made against.
    pub base_version: u64,
    pub timestamp: HybridTimestamp,
    /// True when the device was offline at the time of the mutation.
    pub is_offline: bool,
    pub state: ChangeState,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl Change {
    /// Creates an unsynced change. `seq` is filled in by the change log.
    pub fn new(
        entity_id: EntityId,
        entity_type: impl Into<String>,
        op: ChangeOp,
        base_version: u64,
        timestamp: HybridTimestamp,
        is_offline: bool,
    ) -> Self {
        Self {
            id: ChangeId::new(),
            seq: 0,
            entity_id,
            entity_type: entity_type.into(),
            op,
            base_version,
            timestamp,
            is_offline,
            state: ChangeState::Unsynced,
            attempts: 0,
            last_error: None,
        }
    }

    pub fn is_synced(&self) -> bool {
        self.state == ChangeState::Synced
    }

    /// Moves the change along the state machine.
    pub fn transition(&mut self, to: ChangeState) -> ModelResult<()> {
        if self.state == to {
            return Ok(());
        }
        if !self.state.can_transition_to(to) {
            return Err(ModelError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }
}
