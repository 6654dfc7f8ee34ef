//! Entities: business records with a confirmed base and local sync state.

use opsledger_types::EntityId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Where an entity stands relative to the remote authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntitySyncState {
    /// Local state equals the last state the remote confirmed.
    Synced,
    /// One or more local changes have not been confirmed yet.
    Pending,
    /// A change for this entity is waiting for manual conflict resolution.
    Conflict,
}

/// A business record owned by the local store.
///
/// `data` holds the materialized fields (confirmed base plus every pending
/// change). `base` is the payload the remote last acknowledged at `version`;
/// it is what field-level conflict detection compares against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub entity_type: String,
    pub data: Value,
    /// Last version confirmed by the remote authority. 0 = never confirmed.
    pub version: u64,
    #[serde(default)]
    pub base: Option<Value>,
    pub sync_state: EntitySyncState,
    /// Tombstone kept until the delete is confirmed remotely.
    #[serde(default)]
    pub deleted: bool,
    pub created_at: i64,
    pub modified_at: i64,
}

impl Entity {
    /// Creates a never-synced entity with the given payload.
    pub fn new(id: EntityId, entity_type: impl Into<String>, data: Value, now_ms: i64) -> Self {
        Self {
            id,
            entity_type: entity_type.into(),
            data,
            version: 0,
            base: None,
            sync_state: EntitySyncState::Pending,
            deleted: false,
            created_at: now_ms,
            modified_at: now_ms,
        }
    }

    /// Creates an entity that mirrors a record confirmed by the remote.
    pub fn confirmed(
        id: EntityId,
        entity_type: impl Into<String>,
        data: Value,
        version: u64,
        now_ms: i64,
    ) -> Self {
        Self {
            id,
            entity_type: entity_type.into(),
            base: Some(data.clone()),
            data,
            version,
            sync_state: EntitySyncState::Synced,
            deleted: false,
            created_at: now_ms,
            modified_at: now_ms,
        }
    }

    /// True when the local state matches the remote's last confirmation.
    pub fn is_synced(&self) -> bool {
        self.sync_state == EntitySyncState::Synced
    }

    /// Top-level field lookup.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.data.get(name)
    }

    /// Extract a string value from `data` using a JSON pointer (e.g., "/sku").
    pub fn get_str(&self, pointer: &str) -> Option<&str> {
        self.data.pointer(pointer).and_then(|v| v.as_str())
    }

    /// Extract a boolean value from `data` using a JSON pointer.
    pub fn get_bool(&self, pointer: &str) -> Option<bool> {
        self.data.pointer(pointer).and_then(|v| v.as_bool())
    }

    /// Extract a numeric value from `data` using a JSON pointer.
    pub fn get_number(&self, pointer: &str) -> Option<f64> {
        self.data.pointer(pointer).and_then(|v| v.as_f64())
    }
}
