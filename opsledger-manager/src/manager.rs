//! The data manager service object.

use crate::config::ManagerConfig;
use crate::error::{ManagerError, ManagerResult};
use crate::events::{ManagerEvent, Subscription};
use chrono::{DateTime, Utc};
use opsledger_model::{
    Appointment, AppointmentStatus, Change, ChangeOp, Entity, EntitySyncState, InventoryItem,
    SchemaRegistry, APPOINTMENT, INVENTORY_ITEM,
};
use opsledger_query::{
    find_overlaps, AppointmentOverlap, EntityFilter, QueryFacade, SearchOptions, SearchResult,
    Statistics,
};
use opsledger_storage::{ChangeLog, EntityStore, KvBackend};
use opsledger_sync::{Conflict, ConflictStore, RemoteAuthority, Resolution, SyncEngine, SyncReport};
use opsledger_types::{ChangeId, EntityId, HybridClock};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Created,
    Ready,
    Disposed,
}

/// Offline-first data manager.
///
/// Mutations apply to the local store immediately and are recorded in the
/// change log; [`DataManager::sync`] pushes them to the remote authority.
/// All methods take `&self`; share the manager behind an `Arc`.
pub struct DataManager {
    config: ManagerConfig,
    schemas: SchemaRegistry,
    store: EntityStore,
    log: ChangeLog,
    conflicts: ConflictStore,
    engine: SyncEngine,
    clock: HybridClock,
    online: AtomicBool,
    lifecycle: RwLock<Lifecycle>,
    last_sync_at: RwLock<Option<DateTime<Utc>>>,
    events: broadcast::Sender<ManagerEvent>,
}

impl DataManager {
    /// Creates a manager with the built-in inventory and appointment schemas.
    /// Starts offline; call [`DataManager::init`] before use.
    pub fn new(config: ManagerConfig, backend: Arc<dyn KvBackend>, remote: Arc<dyn RemoteAuthority>) -> Self {
        Self::with_schemas(config, backend, remote, SchemaRegistry::with_builtin())
    }

    pub fn with_schemas(
        config: ManagerConfig,
        backend: Arc<dyn KvBackend>,
        remote: Arc<dyn RemoteAuthority>,
        schemas: SchemaRegistry,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_buffer.max(1));
        let engine = SyncEngine::new(config.sync.clone(), remote).with_schemas(schemas.clone());
        Self {
            schemas,
            store: EntityStore::new(backend.clone()),
            log: ChangeLog::new(backend.clone()),
            conflicts: ConflictStore::new(backend),
            engine,
            clock: HybridClock::new(),
            online: AtomicBool::new(false),
            lifecycle: RwLock::new(Lifecycle::Created),
            last_sync_at: RwLock::new(None),
            events,
            config,
        }
    }

    /// Validates `config` and opens the backend it names.
    pub fn open(config: ManagerConfig, remote: Arc<dyn RemoteAuthority>) -> ManagerResult<Self> {
        config.validate()?;
        let backend = config.storage.open()?;
        Ok(Self::new(config, backend, remote))
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn schemas(&self) -> &SchemaRegistry {
        &self.schemas
    }

    // ── Lifecycle ───────────────────────────────────────────────

    fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.read().unwrap_or_else(|e| e.into_inner())
    }

    fn set_lifecycle(&self, to: Lifecycle) {
        *self.lifecycle.write().unwrap_or_else(|e| e.into_inner()) = to;
    }

    fn ensure_ready(&self) -> ManagerResult<()> {
        match self.lifecycle() {
            Lifecycle::Ready => Ok(()),
            Lifecycle::Created => Err(ManagerError::NotInitialized),
            Lifecycle::Disposed => Err(ManagerError::Disposed),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.lifecycle() == Lifecycle::Ready
    }

    /// Loads entities, the change log and open conflicts from the backend.
    /// Changes left mid-push by a previous process go back to the queue.
    /// Calling it again once ready is a no-op.
    pub async fn init(&self) -> ManagerResult<()> {
        let _guard = self.engine.lock_local().await;
        match self.lifecycle() {
            Lifecycle::Ready => return Ok(()),
            Lifecycle::Disposed => return Err(ManagerError::Disposed),
            Lifecycle::Created => {}
        }

        let entities = self.store.load().await?;
        let changes = self.log.load().await?;
        let conflicts = self.conflicts.load().await?;

        if let Some(latest) = self.log.all().iter().map(|c| c.timestamp).max() {
            self.clock.observe(latest);
        }
        let requeued = self.engine.recover_interrupted(&self.log)?;
        if requeued > 0 {
            self.log.flush().await?;
        }

        self.set_lifecycle(Lifecycle::Ready);
        info!(
            device = %self.config.device_name,
            "Data manager ready: {} entities, {} changes ({} pending), {} conflicts",
            entities,
            changes,
            self.log.pending_count(),
            conflicts
        );
        Ok(())
    }

    /// Flushes everything and shuts the manager down. Every later call
    /// fails with [`ManagerError::Disposed`].
    pub async fn dispose(&self) -> ManagerResult<()> {
        let _guard = self.engine.lock_local().await;
        match self.lifecycle() {
            Lifecycle::Disposed => return Err(ManagerError::Disposed),
            Lifecycle::Ready => self.persist().await?,
            Lifecycle::Created => {}
        }
        self.set_lifecycle(Lifecycle::Disposed);
        info!(device = %self.config.device_name, "Data manager disposed");
        Ok(())
    }

    async fn persist(&self) -> ManagerResult<()> {
        self.log.flush().await?;
        self.store.flush().await?;
        self.conflicts.flush().await?;
        Ok(())
    }

    // ── Events & connectivity ───────────────────────────────────

    pub fn subscribe(&self) -> Subscription {
        Subscription::new(self.events.subscribe())
    }

    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }

    fn emit(&self, event: ManagerEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Records connectivity. Mutations made while offline are flagged in
    /// the change log; `sync()` refuses to run offline.
    pub fn set_online(&self, online: bool) {
        let was = self.online.swap(online, Ordering::SeqCst);
        if was != online {
            info!("Connectivity changed: {}", if online { "online" } else { "offline" });
            self.emit(ManagerEvent::ConnectivityChanged { online });
        }
    }

    // ── Mutations ───────────────────────────────────────────────

    /// Creates an entity of any registered (or free-form) type.
    pub async fn create(&self, entity_type: &str, data: Value) -> ManagerResult<Entity> {
        self.ensure_ready()?;
        let _guard = self.engine.lock_local().await;

        self.schemas.validate(entity_type, &data)?;
        let id = EntityId::new();
        let entity = Entity::new(id, entity_type, data.clone(), now_ms());
        self.store.put(entity.clone());
        self.record(&entity, ChangeOp::Create { data }, 0).await?;

        self.emit(ManagerEvent::EntityCreated {
            entity_id: id,
            entity_type: entity_type.to_string(),
        });
        Ok(entity)
    }

    /// Overwrites the given fields, leaving the others untouched.
    pub async fn update(&self, id: &EntityId, fields: Map<String, Value>) -> ManagerResult<Entity> {
        self.mutate(id, ChangeOp::SetFields { fields }).await
    }

    /// Adds `delta` to a numeric field. Concurrent adjustments made on other
    /// devices are combined during sync rather than overwritten.
    pub async fn adjust(&self, id: &EntityId, field: &str, delta: f64) -> ManagerResult<Entity> {
        self.mutate(
            id,
            ChangeOp::Adjust {
                field: field.to_string(),
                delta,
            },
        )
        .await
    }

    /// Tombstones an entity. It disappears from reads immediately and is
    /// removed from the store once the remote confirms the delete.
    pub async fn delete(&self, id: &EntityId) -> ManagerResult<()> {
        let entity = self.mutate(id, ChangeOp::Delete).await?;
        self.emit(ManagerEvent::EntityDeleted {
            entity_id: entity.id,
            entity_type: entity.entity_type,
        });
        Ok(())
    }

    async fn mutate(&self, id: &EntityId, op: ChangeOp) -> ManagerResult<Entity> {
        self.ensure_ready()?;
        let _guard = self.engine.lock_local().await;

        let current = self.store.get(id)?;
        let next = self
            .schemas
            .validate_op(&current.entity_type, Some(&current.data), &op)?;

        let now = now_ms();
        let updated = self.store.update(id, |e| {
            match next {
                Some(data) => e.data = data,
                None => e.deleted = true,
            }
            if e.sync_state != EntitySyncState::Conflict {
                e.sync_state = EntitySyncState::Pending;
            }
            e.modified_at = now;
        })?;
        let is_delete = op.is_delete();
        self.record(&updated, op, current.version).await?;

        if !is_delete {
            self.emit(ManagerEvent::EntityUpdated {
                entity_id: updated.id,
                entity_type: updated.entity_type.clone(),
            });
        }
        Ok(updated)
    }

    /// Appends the change for an already-applied mutation and persists both.
    async fn record(&self, entity: &Entity, op: ChangeOp, base_version: u64) -> ManagerResult<Change> {
        let is_offline = !self.is_online();
        let change = self.log.append(Change::new(
            entity.id,
            entity.entity_type.clone(),
            op,
            base_version,
            self.clock.tick(),
            is_offline,
        ));
        if let Err(e) = self.persist().await {
            // Already applied in memory; the next successful flush retries.
            warn!("Persisting change {} failed: {}", change.id, e);
            return Err(e);
        }

        self.emit(ManagerEvent::ChangeAppended {
            change_id: change.id,
            entity_id: change.entity_id,
            seq: change.seq,
            is_offline,
        });
        Ok(change)
    }

    pub async fn add_item(&self, item: &InventoryItem) -> ManagerResult<Entity> {
        self.create(INVENTORY_ITEM, item.to_data()?).await
    }

    /// Adjusts an inventory item's quantity. Stock cannot go negative.
    pub async fn adjust_stock(&self, id: &EntityId, delta: i64) -> ManagerResult<Entity> {
        let item = self.store.get(id)?;
        if item.entity_type != INVENTORY_ITEM {
            return Err(ManagerError::Validation(format!(
                "{id} is a {}, not an inventory item",
                item.entity_type
            )));
        }
        self.adjust(id, "quantity", delta as f64).await
    }

    /// Books an appointment. Double-bookings are allowed; they are logged
    /// and reported by [`DataManager::overlapping_appointments`].
    pub async fn book_appointment(&self, appointment: &Appointment) -> ManagerResult<Entity> {
        let entity = self.create(APPOINTMENT, appointment.to_data()?).await?;
        let same_staff = self.store.list(|e| {
            e.entity_type == APPOINTMENT && e.get_str("/staff_id") == Some(appointment.staff_id.as_str())
        });
        let clashes = find_overlaps(&same_staff)
            .into_iter()
            .filter(|o| o.first == entity.id || o.second == entity.id)
            .count();
        if clashes > 0 {
            info!(
                "Appointment {} for staff {} overlaps {} existing booking(s)",
                entity.id, appointment.staff_id, clashes
            );
        }
        Ok(entity)
    }

    pub async fn set_appointment_status(&self, id: &EntityId, status: AppointmentStatus) -> ManagerResult<Entity> {
        let mut fields = Map::new();
        fields.insert("status".to_string(), Value::from(status.as_str()));
        self.update(id, fields).await
    }

    // ── Reads ───────────────────────────────────────────────────

    pub fn get(&self, id: &EntityId) -> ManagerResult<Entity> {
        self.ensure_ready()?;
        Ok(self.store.get(id)?)
    }

    /// Live entities of one type, ordered by id.
    pub fn list(&self, entity_type: &str) -> ManagerResult<Vec<Entity>> {
        self.ensure_ready()?;
        Ok(self.store.list(|e| e.entity_type == entity_type))
    }

    /// Read-only facade over the current state.
    pub fn query(&self) -> ManagerResult<QueryFacade<'_>> {
        self.ensure_ready()?;
        Ok(QueryFacade::new(&self.store, &self.log, &self.conflicts, &self.schemas)
            .with_last_sync(self.last_sync_at()))
    }

    pub fn search(&self, filter: &EntityFilter, options: &SearchOptions) -> ManagerResult<SearchResult> {
        Ok(self.query()?.search(filter, options))
    }

    pub fn statistics(&self) -> ManagerResult<Statistics> {
        Ok(self.query()?.statistics())
    }

    pub fn overlapping_appointments(&self) -> ManagerResult<Vec<AppointmentOverlap>> {
        Ok(self.query()?.overlapping_appointments())
    }

    /// Changes not yet confirmed, in append order.
    pub fn pending_changes(&self) -> ManagerResult<Vec<Change>> {
        self.ensure_ready()?;
        Ok(self.log.pending())
    }

    pub fn conflicts(&self) -> ManagerResult<Vec<Conflict>> {
        self.ensure_ready()?;
        Ok(self.conflicts.list())
    }

    /// Completion time of the last sync pass that finished without errors.
    pub fn last_sync_at(&self) -> Option<DateTime<Utc>> {
        *self.last_sync_at.read().unwrap_or_else(|e| e.into_inner())
    }

    // ── Sync ────────────────────────────────────────────────────

    /// Pushes pending changes to the remote authority.
    ///
    /// Mutations may run while a pass waits on the network; the engine
    /// writes remote outcomes back under the same guard mutations hold.
    ///
    /// Per-change failures and conflicts are reported in the returned
    /// [`SyncReport`]; only an offline device, lifecycle errors or a local
    /// persistence failure make the call itself fail. A second call while
    /// one is running supersedes the first.
    pub async fn sync(&self) -> ManagerResult<SyncReport> {
        self.ensure_ready()?;
        if !self.is_online() {
            return Err(ManagerError::Offline);
        }

        let pending = self.log.pending_count();
        self.emit(ManagerEvent::SyncStarted { pending });

        let report = self.engine.sync(&self.store, &self.log, &self.conflicts).await;
        if self.config.archive_synced_changes {
            self.log.archive_synced();
        }
        self.persist().await?;

        if report.errors.is_empty() {
            *self.last_sync_at.write().unwrap_or_else(|e| e.into_inner()) = Some(Utc::now());
        }
        for conflict in &report.conflicts {
            self.emit(ManagerEvent::ConflictDetected {
                change_id: conflict.change_id,
                entity_id: conflict.entity_id,
                fields: conflict.field_names().into_iter().map(str::to_string).collect(),
            });
        }
        self.emit(ManagerEvent::SyncCompleted {
            applied: report.applied,
            conflicts: report.conflicts.len(),
            errors: report.errors.len(),
        });
        info!(
            "Sync pass {} finished: {} applied, {} conflicts, {} errors, {} still pending",
            report.generation,
            report.applied,
            report.conflicts.len(),
            report.errors.len(),
            self.log.pending_count()
        );
        Ok(report)
    }

    /// Settles an open conflict. Merge values are validated against the
    /// remote record before anything changes.
    pub async fn resolve_conflict(&self, change_id: &ChangeId, resolution: Resolution) -> ManagerResult<Conflict> {
        self.ensure_ready()?;
        let _guard = self.engine.lock_local().await;

        let open = self
            .conflicts
            .get(change_id)
            .ok_or_else(|| ManagerError::NotFound(format!("conflict for change {change_id}")))?;
        if let Resolution::Merge(ref fields) = resolution
            && let Some(ref remote) = open.remote_data
        {
            self.schemas.validate_op(
                &open.entity_type,
                Some(remote),
                &ChangeOp::SetFields { fields: fields.clone() },
            )?;
        }

        let resolved = self.engine.resolve_conflict(
            change_id,
            resolution,
            &self.store,
            &self.log,
            &self.conflicts,
        )?;
        self.persist().await?;
        debug!("Resolved conflict for change {}", change_id);

        self.emit(ManagerEvent::ConflictResolved {
            change_id: resolved.change_id,
            entity_id: resolved.entity_id,
        });
        self.emit(ManagerEvent::EntityUpdated {
            entity_id: resolved.entity_id,
            entity_type: resolved.entity_type.clone(),
        });
        Ok(resolved)
    }

    /// Pulls the remote copy of one entity. Entities with pending changes
    /// are left alone. Returns whether local state changed.
    pub async fn refresh(&self, entity_type: &str, id: &EntityId) -> ManagerResult<bool> {
        self.ensure_ready()?;
        if !self.is_online() {
            return Err(ManagerError::Offline);
        }

        let changed = self.engine.refresh(entity_type, id, &self.store, &self.log).await?;
        if changed {
            self.persist().await?;
            self.emit(ManagerEvent::EntityUpdated {
                entity_id: *id,
                entity_type: entity_type.to_string(),
            });
        }
        Ok(changed)
    }

    /// Drops synced entries from the change log. Returns how many.
    pub async fn archive_synced_changes(&self) -> ManagerResult<usize> {
        self.ensure_ready()?;
        let removed = self.log.archive_synced();
        self.log.flush().await?;
        Ok(removed)
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
