//! Sync engine: pushes the change log to the remote authority.
//!
//! The engine owns no entity state. Every pass reads the store, log and
//! conflict set it is handed, and writes its outcome back into them; the
//! caller decides when to flush.
//!
//! Rewrites of local state (rebases, resolutions) are planned as a draft
//! first: the entity's pending changes are replayed on the new base and
//! validated, and nothing is written unless that succeeds.

use crate::config::SyncConfig;
use crate::conflict::{Conflict, ConflictStore, FieldConflict, Resolution};
use crate::error::{RemoteError, SyncError, SyncResult};
use crate::remote::{PushAck, PushOp, PushRequest, RemoteAuthority, RemoteRecord};
use crate::report::{ChangeFailure, SyncReport};
use futures::future::join_all;
use opsledger_model::{
    apply_op, Change, ChangeOp, ChangeState, Entity, EntitySyncState, ModelError, ModelResult, SchemaRegistry,
};
use opsledger_storage::{ChangeLog, EntityStore, StorageError};
use opsledger_types::{ChangeId, EntityId};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// The local structures one pass works against.
#[derive(Clone, Copy)]
struct Local<'a> {
    store: &'a EntityStore,
    log: &'a ChangeLog,
    conflicts: &'a ConflictStore,
}

enum PushOutcome {
    Applied,
    Conflict(Conflict),
    /// The result arrived after the change or entity moved on.
    Stale,
}

enum Reconcile {
    /// The remote already reflects the change.
    AlreadyApplied,
    /// No competing writes; replay the change on the remote record.
    Rebase,
    Conflict(Vec<FieldConflict>),
}

/// One entity's local state rebuilt on a new confirmed base.
struct Draft {
    base: Option<Value>,
    version: u64,
    /// Pending changes in append order, rewritten ops in place.
    pending: Vec<Change>,
    data: Option<Value>,
}

/// The pending change a draft could not replay.
struct Blocked {
    change_id: ChangeId,
    error: ModelError,
}

impl Blocked {
    fn into_error(self, remote_version: u64) -> SyncError {
        SyncError::Conflict {
            change_id: self.change_id,
            remote_version,
            reason: self.error.to_string(),
        }
    }
}

/// Reconciles the change log with a [`RemoteAuthority`].
pub struct SyncEngine {
    config: SyncConfig,
    remote: Arc<dyn RemoteAuthority>,
    schemas: SchemaRegistry,
    generation: AtomicU64,
    local_writes: Mutex<()>,
}

impl SyncEngine {
    /// Creates an engine that only requires payloads to be JSON objects.
    /// Use [`SyncEngine::with_schemas`] to check rebased state against
    /// entity schemas.
    pub fn new(config: SyncConfig, remote: Arc<dyn RemoteAuthority>) -> Self {
        Self {
            config,
            remote,
            schemas: SchemaRegistry::new(),
            generation: AtomicU64::new(0),
            local_writes: Mutex::new(()),
        }
    }

    pub fn with_schemas(mut self, schemas: SchemaRegistry) -> Self {
        self.schemas = schemas;
        self
    }

    pub fn schemas(&self) -> &SchemaRegistry {
        &self.schemas
    }

    /// Serializes writes to local entity state.
    ///
    /// A caller that reads an entity and appends a change derived from it
    /// holds this guard across both steps. The engine takes it before
    /// writing a remote outcome back, and [`SyncEngine::refresh`] takes it
    /// too; [`SyncEngine::resolve_conflict`] expects the caller to hold it.
    pub async fn lock_local(&self) -> MutexGuard<'_, ()> {
        self.local_writes.lock().await
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn remote(&self) -> &Arc<dyn RemoteAuthority> {
        &self.remote
    }

    /// Generation number of the most recently started pass.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation() == generation
    }

    /// Returns changes left in `Syncing` by an interrupted process to
    /// `Unsynced`. Call once after loading the log.
    pub fn recover_interrupted(&self, log: &ChangeLog) -> SyncResult<usize> {
        let stuck = log.in_state(ChangeState::Syncing);
        for change in &stuck {
            log.transition(&change.id, ChangeState::Unsynced)?;
        }
        if !stuck.is_empty() {
            info!("Requeued {} changes interrupted mid-sync", stuck.len());
        }
        Ok(stuck.len())
    }

    // ── Sync pass ────────────────────────────────────────────────

    /// Runs one sync pass over the pending changes.
    ///
    /// Starting a pass supersedes any pass still running: the older pass
    /// stops each lane before its next request.
    pub async fn sync(&self, store: &EntityStore, log: &ChangeLog, conflicts: &ConflictStore) -> SyncReport {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let local = Local {
            store,
            log,
            conflicts,
        };

        let pending: Vec<Change> = log.pending().into_iter().take(self.config.batch_size).collect();
        let total = pending.len();

        let mut order = Vec::new();
        let mut lanes: HashMap<EntityId, Vec<Change>> = HashMap::new();
        for change in pending {
            let entity_id = change.entity_id;
            lanes
                .entry(entity_id)
                .or_insert_with(|| {
                    order.push(entity_id);
                    Vec::new()
                })
                .push(change);
        }

        info!(
            "Sync pass {} started: {} changes across {} entities",
            generation,
            total,
            lanes.len()
        );

        let lane_reports = join_all(
            order
                .into_iter()
                .filter_map(|id| lanes.remove(&id))
                .map(|lane| self.run_lane(generation, lane, local)),
        )
        .await;

        let mut report = SyncReport::new(generation);
        for lane_report in lane_reports {
            report.merge(lane_report);
        }

        info!(
            "Sync pass {} finished: {} applied, {} conflicts, {} errors, {} skipped, {} superseded",
            generation,
            report.applied,
            report.conflicts.len(),
            report.errors.len(),
            report.skipped,
            report.superseded
        );
        report
    }

    async fn run_lane(&self, generation: u64, lane: Vec<Change>, local: Local<'_>) -> SyncReport {
        let mut report = SyncReport::new(generation);
        let total = lane.len();

        for (idx, queued) in lane.iter().enumerate() {
            let remaining = total - idx;
            if !self.is_current(generation) {
                debug!(
                    "Pass {} superseded, leaving {} changes for entity {}",
                    generation, remaining, queued.entity_id
                );
                report.superseded += remaining;
                break;
            }

            // Re-read: the change may have moved since the pass was planned.
            let Ok(change) = local.log.get(&queued.id) else {
                continue;
            };
            if change.is_synced() {
                continue;
            }
            if !change.state.is_pushable() {
                debug!(
                    "Lane for entity {} blocked by change {} ({:?})",
                    change.entity_id, change.id, change.state
                );
                report.skipped += remaining;
                break;
            }

            let (change_id, entity_id) = (change.id, change.entity_id);
            match self.push_change(generation, change, local).await {
                Ok(PushOutcome::Applied) => report.applied += 1,
                Ok(PushOutcome::Conflict(conflict)) => {
                    report.conflicts.push(conflict);
                    report.skipped += remaining - 1;
                    break;
                }
                Ok(PushOutcome::Stale) => {
                    report.superseded += remaining;
                    break;
                }
                Err(error) => {
                    warn!("Change {} for entity {} not synced: {}", change_id, entity_id, error);
                    release(local.log, &change_id, error.to_string());
                    report.errors.push(ChangeFailure {
                        change_id,
                        entity_id,
                        error,
                    });
                    report.skipped += remaining - 1;
                    break;
                }
            }
        }

        if let Some(first) = lane.first() {
            let _local = self.lock_local().await;
            if let Err(e) = refresh_entity(local, &first.entity_id) {
                warn!("Failed to refresh sync state of entity {}: {}", first.entity_id, e);
            }
        }
        report
    }

    async fn push_change(&self, generation: u64, change: Change, local: Local<'_>) -> SyncResult<PushOutcome> {
        local.log.transition(&change.id, ChangeState::Syncing)?;
        let mut rebased = false;

        loop {
            let entity = local
                .store
                .get_any(&change.entity_id)
                .ok_or_else(|| SyncError::NotFound(format!("entity {}", change.entity_id)))?;
            let current = local.log.get(&change.id)?;
            let request = build_request(&entity, &current)?;
            let expected = entity.version;

            let result = self.push_with_retry(&request, local.log).await;
            let _local = self.lock_local().await;

            if !still_current(local, &current.id, &entity.id, expected) {
                warn!(
                    "Discarding stale push result for change {} (pass {})",
                    current.id, generation
                );
                release(local.log, &current.id, "superseded while in flight".to_string());
                return Ok(PushOutcome::Stale);
            }

            match result {
                Ok(ack) => {
                    confirm(local, &current, request.op, ack)?;
                    return Ok(PushOutcome::Applied);
                }
                Err(RemoteError::NotFound) if current.op.is_delete() => {
                    debug!("Entity {} already gone remotely", current.entity_id);
                    confirm(local, &current, PushOp::Delete, PushAck { version: expected })?;
                    return Ok(PushOutcome::Applied);
                }
                Err(RemoteError::VersionMismatch { current: remote }) => {
                    let local_post = match &request.op {
                        PushOp::Upsert { data } => Some(data),
                        PushOp::Delete => None,
                    };
                    match reconcile(&current.op, entity.base.as_ref(), local_post, remote.as_ref()) {
                        Reconcile::AlreadyApplied => {
                            confirm(local, &current, PushOp::Delete, PushAck { version: expected })?;
                            return Ok(PushOutcome::Applied);
                        }
                        Reconcile::Rebase if !rebased => {
                            debug!(
                                "Rebasing change {} from v{} onto remote v{}",
                                current.id,
                                expected,
                                remote.as_ref().map_or(0, |r| r.version)
                            );
                            match self.plan_rebase(local, &current, &entity, remote.as_ref(), current.op.clone()) {
                                Ok(draft) => {
                                    commit_rebase(local, &current.id, draft)?;
                                    rebased = true;
                                }
                                Err(blocked) => {
                                    debug!(
                                        "Rebase of change {} blocked by change {}: {}",
                                        current.id, blocked.change_id, blocked.error
                                    );
                                    let latest = local.store.get_any(&entity.id).unwrap_or(entity);
                                    let fields = blocked_fields(local, &blocked, &latest, remote.as_ref());
                                    let conflict = record_conflict(local, &current, &latest, remote, fields)?;
                                    return Ok(PushOutcome::Conflict(conflict));
                                }
                            }
                        }
                        Reconcile::Rebase => {
                            return Err(SyncError::Rejected(
                                "remote record changed again during rebase".to_string(),
                            ));
                        }
                        Reconcile::Conflict(fields) => {
                            let conflict = record_conflict(local, &current, &entity, remote, fields)?;
                            return Ok(PushOutcome::Conflict(conflict));
                        }
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn push_with_retry(&self, request: &PushRequest, log: &ChangeLog) -> Result<PushAck, RemoteError> {
        let policy = &self.config.retry;
        let mut attempt = 0;
        loop {
            if let Err(e) = log.update(&request.change_id, |c| {
                c.attempts += 1;
                Ok(())
            }) {
                warn!("Failed to count attempt for change {}: {}", request.change_id, e);
            }

            let result =
                match tokio::time::timeout(self.config.request_timeout(), self.remote.push(request.clone())).await {
                    Ok(result) => result,
                    Err(_) => Err(RemoteError::Transport(format!(
                        "push timed out after {} ms",
                        self.config.request_timeout_ms
                    ))),
                };

            match result {
                Err(RemoteError::Transport(msg)) if attempt < policy.max_retries => {
                    let delay = policy.delay_for(attempt);
                    warn!(
                        "Push of change {} failed ({}), retry {} in {:?}",
                        request.change_id,
                        msg,
                        attempt + 1,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    // ── Conflict resolution ──────────────────────────────────────

    /// Settles an open conflict. Returns the conflict that was closed.
    ///
    /// The entity's other pending changes must still replay on the state
    /// the resolution produces. If one does not, nothing changes and
    /// [`SyncError::Conflict`] names the change in the way. The caller
    /// holds [`SyncEngine::lock_local`].
    pub fn resolve_conflict(
        &self,
        change_id: &ChangeId,
        resolution: Resolution,
        store: &EntityStore,
        log: &ChangeLog,
        conflicts: &ConflictStore,
    ) -> SyncResult<Conflict> {
        let local = Local {
            store,
            log,
            conflicts,
        };
        let conflict = conflicts
            .get(change_id)
            .ok_or_else(|| SyncError::NotFound(format!("conflict for change {change_id}")))?;
        let change = log.get(change_id)?;
        if change.state != ChangeState::Conflict {
            return Err(ModelError::InvalidTransition {
                from: change.state,
                to: ChangeState::ManuallyResolved,
            }
            .into());
        }
        let entity = store
            .get_any(&change.entity_id)
            .ok_or_else(|| SyncError::NotFound(format!("entity {}", change.entity_id)))?;
        let remote = conflict.remote_data.clone().map(|data| RemoteRecord {
            id: conflict.entity_id,
            version: conflict.remote_version,
            data,
        });

        match &resolution {
            Resolution::KeepLocal => {
                let draft = self
                    .plan_rebase(local, &change, &entity, remote.as_ref(), change.op.clone())
                    .map_err(|b| b.into_error(conflict.remote_version))?;
                commit_rebase(local, change_id, draft)?;
            }
            Resolution::Merge(fields) => {
                if fields.is_empty() {
                    return Err(ModelError::Validation("merge must set at least one field".into()).into());
                }
                let op = ChangeOp::SetFields {
                    fields: fields.clone(),
                };
                let draft = self
                    .plan_rebase(local, &change, &entity, remote.as_ref(), op)
                    .map_err(|b| b.into_error(conflict.remote_version))?;
                commit_rebase(local, change_id, draft)?;
            }
            Resolution::AcceptRemote => {
                let remaining = if conflict.remote_deleted() {
                    Vec::new()
                } else {
                    log.pending_for(&entity.id)
                        .into_iter()
                        .filter(|c| c.id != *change_id)
                        .collect()
                };
                let draft = self
                    .plan(
                        &entity.entity_type,
                        conflict.remote_data.clone(),
                        conflict.remote_version,
                        remaining,
                    )
                    .map_err(|b| b.into_error(conflict.remote_version))?;

                log.update(change_id, |c| {
                    c.transition(ChangeState::ManuallyResolved)?;
                    c.transition(ChangeState::Synced)?;
                    c.last_error = None;
                    Ok(())
                })?;
                if conflict.remote_deleted() {
                    for other in log.pending_for(&entity.id) {
                        warn!(
                            "Dropping change {} for entity {} deleted remotely",
                            other.id, entity.id
                        );
                        log.remove(&other.id)?;
                        conflicts.remove(&other.id);
                    }
                }
                write_draft(local, &entity.id, draft)?;
            }
            Resolution::Revert => {
                log.update(change_id, |c| {
                    c.transition(ChangeState::Reverted)?;
                    c.transition(ChangeState::Unsynced)?;
                    c.last_error = None;
                    Ok(())
                })?;
            }
        }

        conflicts.remove(change_id);
        refresh_entity(local, &change.entity_id)?;
        info!(
            "Resolved conflict on change {} for entity {} ({:?})",
            change_id, change.entity_id, resolution
        );
        Ok(conflict)
    }

    // ── Drafts ───────────────────────────────────────────────────

    /// Replays `pending` on `base`, validating every intermediate state.
    fn plan(
        &self,
        entity_type: &str,
        base: Option<Value>,
        version: u64,
        pending: Vec<Change>,
    ) -> Result<Draft, Blocked> {
        let mut data = base.clone();
        for change in &pending {
            data = self
                .apply_checked(entity_type, data, &change.op)
                .map_err(|error| Blocked {
                    change_id: change.id,
                    error,
                })?;
        }
        Ok(Draft {
            base,
            version,
            pending,
            data,
        })
    }

    fn apply_checked(&self, entity_type: &str, data: Option<Value>, op: &ChangeOp) -> ModelResult<Option<Value>> {
        let next = apply_op(data, op)?;
        if let Some(next) = &next {
            self.schemas.validate(entity_type, next)?;
        }
        Ok(next)
    }

    /// Plans moving `change` onto `remote` with `op` as its new payload.
    fn plan_rebase(
        &self,
        local: Local<'_>,
        change: &Change,
        entity: &Entity,
        remote: Option<&RemoteRecord>,
        op: ChangeOp,
    ) -> Result<Draft, Blocked> {
        let new_op = rebase_op(op, entity.base.as_ref(), remote).map_err(|error| Blocked {
            change_id: change.id,
            error,
        })?;
        let mut pending = local.log.pending_for(&change.entity_id);
        for queued in pending.iter_mut().filter(|c| c.id == change.id) {
            queued.op = new_op.clone();
        }
        self.plan(
            &change.entity_type,
            remote.map(|r| r.data.clone()),
            remote.map_or(0, |r| r.version),
            pending,
        )
    }

    // ── Pull ─────────────────────────────────────────────────────

    /// Fetches the remote record and adopts it when the entity has no
    /// local changes waiting. Returns whether the local copy changed.
    pub async fn refresh(
        &self,
        entity_type: &str,
        id: &EntityId,
        store: &EntityStore,
        log: &ChangeLog,
    ) -> SyncResult<bool> {
        let record = self.remote.fetch(entity_type, id).await?;
        let _local = self.lock_local().await;

        if !log.pending_for(id).is_empty() {
            debug!("Entity {} has pending changes, not refreshing", id);
            return Ok(false);
        }

        let existing = store.get_any(id);
        match record {
            None => match existing {
                Some(_) => {
                    store.delete(id)?;
                    debug!("Entity {} removed remotely", id);
                    Ok(true)
                }
                None => Ok(false),
            },
            Some(record) => {
                if existing
                    .as_ref()
                    .is_some_and(|e| e.version == record.version && !e.deleted)
                {
                    return Ok(false);
                }
                let now = now_ms();
                let mut entity = Entity::confirmed(record.id, entity_type, record.data, record.version, now);
                if let Some(existing) = existing {
                    entity.created_at = existing.created_at;
                }
                store.put(entity);
                debug!("Entity {} refreshed to remote v{}", id, record.version);
                Ok(true)
            }
        }
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Builds the push for `change`: the entity's confirmed base with the change
/// applied.
fn build_request(entity: &Entity, change: &Change) -> SyncResult<PushRequest> {
    let op = match apply_op(entity.base.clone(), &change.op)? {
        Some(data) => PushOp::Upsert { data },
        None => PushOp::Delete,
    };
    Ok(PushRequest {
        entity_type: change.entity_type.clone(),
        entity_id: change.entity_id,
        change_id: change.id,
        op,
        expected_version: entity.version,
    })
}

fn still_current(local: Local<'_>, change_id: &ChangeId, entity_id: &EntityId, expected: u64) -> bool {
    local
        .log
        .get(change_id)
        .is_ok_and(|c| c.state == ChangeState::Syncing)
        && local
            .store
            .get_any(entity_id)
            .is_some_and(|e| e.version == expected)
}

/// Returns a change stuck in `Syncing` to the queue, recording why.
fn release(log: &ChangeLog, change_id: &ChangeId, reason: String) {
    let result = log.update(change_id, |c| {
        if c.state == ChangeState::Syncing {
            c.transition(ChangeState::Unsynced)?;
        }
        c.last_error = Some(reason);
        Ok(())
    });
    if let Err(e) = result {
        warn!("Failed to requeue change {}: {}", change_id, e);
    }
}

fn confirm(local: Local<'_>, change: &Change, op: PushOp, ack: PushAck) -> SyncResult<()> {
    local.log.mark_synced(&change.id)?;
    match op {
        PushOp::Upsert { data } => {
            local.store.update(&change.entity_id, |e| {
                e.base = Some(data);
                e.version = ack.version;
            })?;
        }
        PushOp::Delete => {
            if local.log.pending_for(&change.entity_id).is_empty() {
                match local.store.delete(&change.entity_id) {
                    Ok(_) | Err(StorageError::NotFound(_)) => {}
                    Err(e) => return Err(e.into()),
                }
            } else {
                local.store.update(&change.entity_id, |e| {
                    e.base = None;
                    e.version = ack.version;
                })?;
            }
        }
    }
    debug!(
        "Change {} ({}) confirmed at v{}",
        change.id,
        change.op.kind(),
        ack.version
    );
    Ok(())
}

/// Compares the fields a change writes with what the remote did since the
/// shared base.
fn reconcile(
    op: &ChangeOp,
    base: Option<&Value>,
    local_post: Option<&Value>,
    remote: Option<&RemoteRecord>,
) -> Reconcile {
    let Some(remote) = remote else {
        if op.is_delete() {
            return Reconcile::AlreadyApplied;
        }
        let fields = op
            .touched_fields()
            .into_iter()
            .map(|field| FieldConflict {
                base_value: field_of(base, &field),
                local_value: field_of(local_post, &field),
                remote_value: None,
                field,
            })
            .collect();
        return Reconcile::Conflict(fields);
    };

    let remote_data = Some(&remote.data);
    let fields: Vec<FieldConflict> = match op {
        // Deltas commute with whatever the remote did.
        ChangeOp::Adjust { .. } => Vec::new(),
        ChangeOp::Create { .. } | ChangeOp::SetFields { .. } => op
            .touched_fields()
            .into_iter()
            .filter_map(|field| {
                let base_value = field_of(base, &field);
                let local_value = field_of(local_post, &field);
                let remote_value = field_of(remote_data, &field);
                (remote_value != base_value && remote_value != local_value).then(|| FieldConflict {
                    field,
                    base_value,
                    local_value,
                    remote_value,
                })
            })
            .collect(),
        ChangeOp::Delete => changed_fields(base, &remote.data)
            .into_iter()
            .map(|field| FieldConflict {
                base_value: field_of(base, &field),
                local_value: None,
                remote_value: field_of(remote_data, &field),
                field,
            })
            .collect(),
    };

    if fields.is_empty() {
        Reconcile::Rebase
    } else {
        Reconcile::Conflict(fields)
    }
}

fn field_of(data: Option<&Value>, field: &str) -> Option<Value> {
    data.and_then(|d| d.get(field)).filter(|v| !v.is_null()).cloned()
}

fn changed_fields(base: Option<&Value>, remote: &Value) -> Vec<String> {
    let mut keys = BTreeSet::new();
    for obj in [base.and_then(Value::as_object), remote.as_object()].into_iter().flatten() {
        keys.extend(obj.keys().cloned());
    }
    keys.into_iter()
        .filter(|k| field_of(base, k) != field_of(Some(remote), k))
        .collect()
}

/// Rewrites `op` so it applies on top of `remote`.
fn rebase_op(op: ChangeOp, old_base: Option<&Value>, remote: Option<&RemoteRecord>) -> ModelResult<ChangeOp> {
    Ok(match (op, remote) {
        (ChangeOp::Create { data }, Some(_)) => ChangeOp::SetFields {
            fields: data.as_object().cloned().unwrap_or_default(),
        },
        (op @ (ChangeOp::SetFields { .. } | ChangeOp::Adjust { .. }), None) => {
            let data = apply_op(old_base.cloned(), &op)?.ok_or_else(|| {
                ModelError::Validation("cannot recreate an entity from a delete".into())
            })?;
            ChangeOp::Create { data }
        }
        (op, _) => op,
    })
}

/// Writes a planned rebase: the change takes its rewritten op and the
/// draft's base becomes the entity's confirmed state.
fn commit_rebase(local: Local<'_>, change_id: &ChangeId, draft: Draft) -> SyncResult<()> {
    let op = draft
        .pending
        .iter()
        .find(|c| c.id == *change_id)
        .map(|c| c.op.clone())
        .ok_or_else(|| SyncError::NotFound(format!("pending change {change_id}")))?;
    let version = draft.version;
    local.log.update(change_id, |c| {
        if c.state == ChangeState::Conflict {
            c.transition(ChangeState::ManuallyResolved)?;
        }
        c.op = op;
        c.base_version = version;
        c.last_error = None;
        Ok(())
    })?;
    let entity_id = local.log.get(change_id)?.entity_id;
    write_draft(local, &entity_id, draft)
}

/// Makes the draft's base the entity's confirmed state and its replayed
/// payload the current one.
fn write_draft(local: Local<'_>, entity_id: &EntityId, draft: Draft) -> SyncResult<()> {
    if draft.base.is_none() && draft.pending.is_empty() {
        return match local.store.delete(entity_id) {
            Ok(_) | Err(StorageError::NotFound(_)) => Ok(()),
            Err(e) => Err(e.into()),
        };
    }

    let Draft {
        base, version, data, ..
    } = draft;
    local.store.update(entity_id, |e| {
        e.base = base;
        e.version = version;
        match data {
            Some(data) => {
                e.data = data;
                e.deleted = false;
            }
            None => e.deleted = true,
        }
        e.modified_at = now_ms();
    })?;
    Ok(())
}

/// Fields to report when a rebase cannot be replayed: the ones the
/// blocking change writes, or everything the remote changed.
fn blocked_fields(
    local: Local<'_>,
    blocked: &Blocked,
    entity: &Entity,
    remote: Option<&RemoteRecord>,
) -> Vec<FieldConflict> {
    let base = entity.base.as_ref();
    let remote_data = remote.map(|r| &r.data);
    let mut names = local
        .log
        .get(&blocked.change_id)
        .map(|c| c.op.touched_fields())
        .unwrap_or_default();
    if names.is_empty() {
        names = remote_data.map_or_else(Vec::new, |r| changed_fields(base, r));
    }
    names
        .into_iter()
        .map(|field| FieldConflict {
            base_value: field_of(base, &field),
            local_value: field_of((!entity.deleted).then_some(&entity.data), &field),
            remote_value: field_of(remote_data, &field),
            field,
        })
        .collect()
}

fn record_conflict(
    local: Local<'_>,
    change: &Change,
    entity: &Entity,
    remote: Option<RemoteRecord>,
    fields: Vec<FieldConflict>,
) -> SyncResult<Conflict> {
    let conflict = Conflict {
        change_id: change.id,
        entity_id: change.entity_id,
        entity_type: change.entity_type.clone(),
        fields,
        base_version: entity.version,
        remote_version: remote.as_ref().map_or(0, |r| r.version),
        remote_data: remote.map(|r| r.data),
        detected_at: now_ms(),
    };

    let names = conflict.field_names().join(", ");
    local.log.update(&change.id, |c| {
        c.transition(ChangeState::Conflict)?;
        c.last_error = Some(format!("conflict on {names}"));
        Ok(())
    })?;
    local
        .store
        .update(&change.entity_id, |e| e.sync_state = EntitySyncState::Conflict)?;
    local.conflicts.insert(conflict.clone());

    warn!(
        "Conflict on {} {} [{}]: local base v{}, remote v{}",
        conflict.entity_type, conflict.entity_id, names, conflict.base_version, conflict.remote_version
    );
    Ok(conflict)
}

/// Derives the entity's sync state from its open conflicts and pending
/// changes.
fn refresh_entity(local: Local<'_>, entity_id: &EntityId) -> SyncResult<()> {
    let Some(entity) = local.store.get_any(entity_id) else {
        return Ok(());
    };
    let state = if local.conflicts.has_conflict(entity_id) {
        EntitySyncState::Conflict
    } else if local.log.pending_for(entity_id).is_empty() {
        EntitySyncState::Synced
    } else {
        EntitySyncState::Pending
    };
    if entity.sync_state != state {
        local.store.update(entity_id, |e| e.sync_state = state)?;
    }
    Ok(())
}
