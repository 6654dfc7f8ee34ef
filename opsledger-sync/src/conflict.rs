//! Conflict records and their persistence.

use opsledger_storage::{KvBackend, StorageError, StorageResult, WriteOp, CONFLICTS_NS};
use opsledger_types::{ChangeId, EntityId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, warn};

/// One field written independently on both sides since the same base.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldConflict {
    pub field: String,
    /// Value at the shared base version. `None` if absent.
    pub base_value: Option<Value>,
    /// Value the local change writes. `None` for a local delete.
    pub local_value: Option<Value>,
    /// Value the remote holds now. `None` if absent or deleted remotely.
    pub remote_value: Option<Value>,
}

/// A change the engine could not reconcile automatically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub change_id: ChangeId,
    pub entity_id: EntityId,
    pub entity_type: String,
    pub fields: Vec<FieldConflict>,
    /// Version both sides started from.
    pub base_version: u64,
    /// Version the remote holds now. 0 when the remote deleted the record.
    pub remote_version: u64,
    /// The remote record's payload, `None` when deleted remotely.
    pub remote_data: Option<Value>,
    /// Detection time, ms since epoch.
    pub detected_at: i64,
}

impl Conflict {
    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.field.as_str()).collect()
    }

    /// True when the remote no longer has the record.
    pub fn remote_deleted(&self) -> bool {
        self.remote_data.is_none()
    }
}

/// How the user settles a [`Conflict`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "resolution", content = "fields", rename_all = "snake_case")]
pub enum Resolution {
    /// Push the local change again on top of the remote version.
    KeepLocal,
    /// Adopt the remote record and close the local change.
    AcceptRemote,
    /// Replace the change with these field values and push them on top of
    /// the remote version.
    Merge(Map<String, Value>),
    /// Dismiss the conflict and return the change to the queue as it was.
    Revert,
}

/// Open conflicts, keyed by change id, persisted in the `conflicts`
/// namespace.
pub struct ConflictStore {
    backend: Arc<dyn KvBackend>,
    cache: RwLock<HashMap<ChangeId, Conflict>>,
    dirty: Mutex<HashSet<ChangeId>>,
}

impl ConflictStore {
    pub fn new(backend: Arc<dyn KvBackend>) -> Self {
        Self {
            backend,
            cache: RwLock::new(HashMap::new()),
            dirty: Mutex::new(HashSet::new()),
        }
    }

    fn mark_dirty(&self, id: ChangeId) {
        self.dirty.lock().unwrap_or_else(|e| e.into_inner()).insert(id);
    }

    pub async fn load(&self) -> StorageResult<usize> {
        let backend = self.backend.clone();
        let rows = tokio::task::spawn_blocking(move || backend.scan(CONFLICTS_NS))
            .await
            .map_err(|e| StorageError::Task(e.to_string()))??;

        let mut loaded = HashMap::with_capacity(rows.len());
        for (_, value) in rows {
            let conflict: Conflict = serde_json::from_str(&value)?;
            loaded.insert(conflict.change_id, conflict);
        }
        let count = loaded.len();
        *self.cache.write().unwrap_or_else(|e| e.into_inner()) = loaded;
        self.dirty.lock().unwrap_or_else(|e| e.into_inner()).clear();
        debug!("Loaded {} open conflicts", count);
        Ok(count)
    }

    pub async fn flush(&self) -> StorageResult<usize> {
        let ids: Vec<ChangeId> = self
            .dirty
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .collect();
        if ids.is_empty() {
            return Ok(0);
        }

        let ops = {
            let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
            ids.iter()
                .map(|id| -> StorageResult<WriteOp> {
                    Ok(match cache.get(id) {
                        Some(c) => WriteOp::put(CONFLICTS_NS, id.to_string(), serde_json::to_string(c)?),
                        None => WriteOp::delete(CONFLICTS_NS, id.to_string()),
                    })
                })
                .collect::<StorageResult<Vec<_>>>()
        };

        let result = match ops {
            Ok(ops) => {
                let backend = self.backend.clone();
                tokio::task::spawn_blocking(move || backend.write_batch(&ops))
                    .await
                    .map_err(|e| StorageError::Task(e.to_string()))
                    .and_then(|r| r)
            }
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            warn!("Conflict flush failed, keeping {} ids dirty: {}", ids.len(), e);
            self.dirty.lock().unwrap_or_else(|e| e.into_inner()).extend(ids);
            return Err(e);
        }
        Ok(ids.len())
    }

    pub fn insert(&self, conflict: Conflict) {
        let id = conflict.change_id;
        self.cache
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, conflict);
        self.mark_dirty(id);
    }

    pub fn get(&self, change_id: &ChangeId) -> Option<Conflict> {
        self.cache
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(change_id)
            .cloned()
    }

    pub fn remove(&self, change_id: &ChangeId) -> Option<Conflict> {
        let removed = self
            .cache
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(change_id);
        if removed.is_some() {
            self.mark_dirty(*change_id);
        }
        removed
    }

    /// Open conflicts, oldest first.
    pub fn list(&self) -> Vec<Conflict> {
        let mut out: Vec<Conflict> = self
            .cache
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        out.sort_by_key(|c| (c.detected_at, c.change_id));
        out
    }

    pub fn has_conflict(&self, entity_id: &EntityId) -> bool {
        self.cache
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .any(|c| c.entity_id == *entity_id)
    }

    pub fn len(&self) -> usize {
        self.cache.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
