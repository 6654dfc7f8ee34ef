//! The Local Store: entities held in memory, persisted on flush.

use crate::backend::{KvBackend, WriteOp};
use crate::error::{StorageError, StorageResult};
use crate::{blocking, ENTITIES_NS};
use opsledger_model::Entity;
use opsledger_types::EntityId;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, warn};

/// Durable entity storage with a synchronous in-memory view.
///
/// Every read and write completes against the cache; writes mark the id
/// dirty and [`EntityStore::flush`] persists all dirty ids in one batch.
pub struct EntityStore {
    backend: Arc<dyn KvBackend>,
    cache: RwLock<HashMap<EntityId, Entity>>,
    dirty: Mutex<HashSet<EntityId>>,
}

impl EntityStore {
    /// Creates an empty store over `backend`. Call [`EntityStore::load`] to
    /// pick up previously persisted entities.
    pub fn new(backend: Arc<dyn KvBackend>) -> Self {
        Self {
            backend,
            cache: RwLock::new(HashMap::new()),
            dirty: Mutex::new(HashSet::new()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<EntityId, Entity>> {
        self.cache.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<EntityId, Entity>> {
        self.cache.write().unwrap_or_else(|e| e.into_inner())
    }

    fn mark_dirty(&self, id: EntityId) {
        self.dirty
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id);
    }

    /// Replaces the cache with the backend's contents. Returns the number of
    /// entities loaded.
    pub async fn load(&self) -> StorageResult<usize> {
        let backend = self.backend.clone();
        let rows = blocking(move || backend.scan(ENTITIES_NS)).await?;

        let mut loaded = HashMap::with_capacity(rows.len());
        for (key, value) in rows {
            let entity: Entity = serde_json::from_str(&value)?;
            if entity.id.to_string() != key {
                return Err(StorageError::InvalidData(format!(
                    "entity stored under {key} has id {}",
                    entity.id
                )));
            }
            loaded.insert(entity.id, entity);
        }

        let count = loaded.len();
        *self.write() = loaded;
        self.dirty.lock().unwrap_or_else(|e| e.into_inner()).clear();
        debug!("Loaded {} entities", count);
        Ok(count)
    }

    /// Persists every dirty entity. Returns the number of keys written.
    ///
    /// On failure the ids stay dirty and the next flush retries them.
    pub async fn flush(&self) -> StorageResult<usize> {
        let ids: Vec<EntityId> = self
            .dirty
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .collect();
        if ids.is_empty() {
            return Ok(0);
        }

        let ops = {
            let cache = self.read();
            ids.iter()
                .map(|id| -> StorageResult<WriteOp> {
                    Ok(match cache.get(id) {
                        Some(entity) => {
                            WriteOp::put(ENTITIES_NS, id.to_string(), serde_json::to_string(entity)?)
                        }
                        None => WriteOp::delete(ENTITIES_NS, id.to_string()),
                    })
                })
                .collect::<StorageResult<Vec<_>>>()
        };

        let result = match ops {
            Ok(ops) => {
                let backend = self.backend.clone();
                blocking(move || backend.write_batch(&ops)).await
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                debug!("Flushed {} entities", ids.len());
                Ok(ids.len())
            }
            Err(e) => {
                warn!("Entity flush failed, keeping {} ids dirty: {}", ids.len(), e);
                let mut dirty = self.dirty.lock().unwrap_or_else(|e| e.into_inner());
                dirty.extend(ids);
                Err(e)
            }
        }
    }

    /// Returns a live (non-deleted) entity.
    pub fn get(&self, id: &EntityId) -> StorageResult<Entity> {
        self.read()
            .get(id)
            .filter(|e| !e.deleted)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("entity {id}")))
    }

    /// Returns an entity even if it is a pending-delete tombstone.
    pub fn get_any(&self, id: &EntityId) -> Option<Entity> {
        self.read().get(id).cloned()
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.read().get(id).is_some_and(|e| !e.deleted)
    }

    /// Live entities matching `filter`, ordered by id.
    pub fn list<F>(&self, filter: F) -> Vec<Entity>
    where
        F: Fn(&Entity) -> bool,
    {
        let mut out: Vec<Entity> = self
            .read()
            .values()
            .filter(|e| !e.deleted && filter(e))
            .cloned()
            .collect();
        out.sort_by_key(|e| e.id);
        out
    }

    /// Every stored entity including tombstones, ordered by id.
    pub fn all(&self) -> Vec<Entity> {
        let mut out: Vec<Entity> = self.read().values().cloned().collect();
        out.sort_by_key(|e| e.id);
        out
    }

    /// Upserts by id.
    pub fn put(&self, entity: Entity) {
        let id = entity.id;
        self.write().insert(id, entity);
        self.mark_dirty(id);
    }

    /// Applies `f` to a stored entity (tombstones included) and returns the
    /// updated copy.
    pub fn update<F>(&self, id: &EntityId, f: F) -> StorageResult<Entity>
    where
        F: FnOnce(&mut Entity),
    {
        let updated = {
            let mut cache = self.write();
            let entity = cache
                .get_mut(id)
                .ok_or_else(|| StorageError::NotFound(format!("entity {id}")))?;
            f(entity);
            entity.clone()
        };
        self.mark_dirty(*id);
        Ok(updated)
    }

    /// Removes an entity (tombstone or live) from the store.
    pub fn delete(&self, id: &EntityId) -> StorageResult<Entity> {
        let removed = self
            .write()
            .remove(id)
            .ok_or_else(|| StorageError::NotFound(format!("entity {id}")))?;
        self.mark_dirty(*id);
        Ok(removed)
    }

    /// Number of live entities.
    pub fn len(&self) -> usize {
        self.read().values().filter(|e| !e.deleted).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of ids waiting for the next flush.
    pub fn dirty_count(&self) -> usize {
        self.dirty.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
