//! The Change Log: ordered ledger of mutations awaiting remote confirmation.

use crate::backend::{KvBackend, WriteOp};
use crate::error::{StorageError, StorageResult};
use crate::{blocking, CHANGES_NS};
use opsledger_model::{Change, ChangeState};
use opsledger_types::{ChangeId, EntityId};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, warn};

const META_NS: &str = "change_log_meta";
const LAST_SEQ_KEY: &str = "last_seq";
const ARCHIVED_KEY: &str = "archived";

#[derive(Default)]
struct LogInner {
    /// Changes keyed by sequence number (append order).
    by_seq: BTreeMap<u64, Change>,
    index: HashMap<ChangeId, u64>,
    last_seq: u64,
    archived: u64,
}

impl LogInner {
    fn get_mut(&mut self, id: &ChangeId) -> StorageResult<&mut Change> {
        let seq = self
            .index
            .get(id)
            .copied()
            .ok_or_else(|| StorageError::NotFound(format!("change {id}")))?;
        self.by_seq
            .get_mut(&seq)
            .ok_or_else(|| StorageError::InvalidData(format!("change index points at missing seq {seq}")))
    }
}

/// Append-only ledger with strictly increasing sequence numbers.
///
/// Like [`crate::EntityStore`], all operations complete in memory and
/// [`ChangeLog::flush`] persists what changed.
pub struct ChangeLog {
    backend: Arc<dyn KvBackend>,
    inner: RwLock<LogInner>,
    dirty: Mutex<HashSet<u64>>,
}

fn seq_key(seq: u64) -> String {
    format!("{seq:020}")
}

impl ChangeLog {
    pub fn new(backend: Arc<dyn KvBackend>) -> Self {
        Self {
            backend,
            inner: RwLock::new(LogInner::default()),
            dirty: Mutex::new(HashSet::new()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, LogInner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, LogInner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    fn mark_dirty(&self, seq: u64) {
        self.dirty
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(seq);
    }

    /// Restores the log from the backend. Sequence numbering resumes after
    /// the highest persisted sequence.
    pub async fn load(&self) -> StorageResult<usize> {
        let backend = self.backend.clone();
        let (rows, meta) = blocking(move || Ok((backend.scan(CHANGES_NS)?, backend.scan(META_NS)?))).await?;

        let mut inner = LogInner::default();
        for (key, value) in meta {
            let n: u64 = value
                .parse()
                .map_err(|_| StorageError::InvalidData(format!("bad change log meta {key}={value}")))?;
            match key.as_str() {
                LAST_SEQ_KEY => inner.last_seq = n,
                ARCHIVED_KEY => inner.archived = n,
                _ => {}
            }
        }
        for (key, value) in rows {
            let change: Change = serde_json::from_str(&value)?;
            if seq_key(change.seq) != key {
                return Err(StorageError::InvalidData(format!(
                    "change stored under {key} has seq {}",
                    change.seq
                )));
            }
            inner.last_seq = inner.last_seq.max(change.seq);
            inner.index.insert(change.id, change.seq);
            inner.by_seq.insert(change.seq, change);
        }

        let count = inner.by_seq.len();
        *self.write() = inner;
        self.dirty.lock().unwrap_or_else(|e| e.into_inner()).clear();
        debug!("Loaded {} changes", count);
        Ok(count)
    }

    /// Persists appended, updated and archived entries.
    pub async fn flush(&self) -> StorageResult<usize> {
        let seqs: Vec<u64> = self
            .dirty
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .collect();
        if seqs.is_empty() {
            return Ok(0);
        }

        let ops = {
            let inner = self.read();
            seqs.iter()
                .map(|seq| -> StorageResult<WriteOp> {
                    Ok(match inner.by_seq.get(seq) {
                        Some(change) => {
                            WriteOp::put(CHANGES_NS, seq_key(*seq), serde_json::to_string(change)?)
                        }
                        None => WriteOp::delete(CHANGES_NS, seq_key(*seq)),
                    })
                })
                .collect::<StorageResult<Vec<_>>>()
                .map(|mut ops| {
                    // Sequence numbering must survive archiving every entry.
                    ops.push(WriteOp::put(META_NS, LAST_SEQ_KEY, inner.last_seq.to_string()));
                    ops.push(WriteOp::put(META_NS, ARCHIVED_KEY, inner.archived.to_string()));
                    ops
                })
        };

        let result = match ops {
            Ok(ops) => {
                let backend = self.backend.clone();
                blocking(move || backend.write_batch(&ops)).await
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => Ok(seqs.len()),
            Err(e) => {
                warn!("Change log flush failed, keeping {} entries dirty: {}", seqs.len(), e);
                self.dirty
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .extend(seqs);
                Err(e)
            }
        }
    }

    /// Appends a change, assigning the next sequence number. Never fails.
    pub fn append(&self, mut change: Change) -> Change {
        let seq = {
            let mut inner = self.write();
            inner.last_seq += 1;
            let seq = inner.last_seq;
            change.seq = seq;
            inner.index.insert(change.id, seq);
            inner.by_seq.insert(seq, change.clone());
            seq
        };
        self.mark_dirty(seq);
        debug!(
            "Appended change {} (seq={}, op={}) for entity {}",
            change.id,
            seq,
            change.op.kind(),
            change.entity_id
        );
        change
    }

    pub fn get(&self, id: &ChangeId) -> StorageResult<Change> {
        let inner = self.read();
        inner
            .index
            .get(id)
            .and_then(|seq| inner.by_seq.get(seq))
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("change {id}")))
    }

    /// Every change not yet confirmed, in append order.
    pub fn pending(&self) -> Vec<Change> {
        self.read()
            .by_seq
            .values()
            .filter(|c| !c.is_synced())
            .cloned()
            .collect()
    }

    /// Unconfirmed changes for one entity, in append order.
    pub fn pending_for(&self, entity_id: &EntityId) -> Vec<Change> {
        self.read()
            .by_seq
            .values()
            .filter(|c| !c.is_synced() && c.entity_id == *entity_id)
            .cloned()
            .collect()
    }

    /// Changes currently in `state`, in append order.
    pub fn in_state(&self, state: ChangeState) -> Vec<Change> {
        self.read()
            .by_seq
            .values()
            .filter(|c| c.state == state)
            .cloned()
            .collect()
    }

    /// Every entry still held, synced or not, in append order.
    pub fn all(&self) -> Vec<Change> {
        self.read().by_seq.values().cloned().collect()
    }

    pub fn pending_count(&self) -> usize {
        self.read().by_seq.values().filter(|c| !c.is_synced()).count()
    }

    pub fn len(&self) -> usize {
        self.read().by_seq.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Highest sequence number ever assigned.
    pub fn last_seq(&self) -> u64 {
        self.read().last_seq
    }

    /// Number of synced entries removed by [`ChangeLog::archive_synced`].
    pub fn archived_count(&self) -> u64 {
        self.read().archived
    }

    /// Marks a change confirmed. Idempotent: a second call is a no-op and
    /// returns `false`. A change parked in `Conflict` must be resolved first.
    pub fn mark_synced(&self, id: &ChangeId) -> StorageResult<bool> {
        let seq = {
            let mut inner = self.write();
            let change = inner.get_mut(id)?;
            match change.state {
                ChangeState::Synced => return Ok(false),
                ChangeState::Conflict | ChangeState::Reverted => {
                    return Err(opsledger_model::ModelError::InvalidTransition {
                        from: change.state,
                        to: ChangeState::Synced,
                    }
                    .into());
                }
                _ => {}
            }
            change.state = ChangeState::Synced;
            change.last_error = None;
            change.seq
        };
        self.mark_dirty(seq);
        Ok(true)
    }

    /// Moves a change along the state machine.
    pub fn transition(&self, id: &ChangeId, to: ChangeState) -> StorageResult<Change> {
        self.update(id, |change| change.transition(to).map_err(Into::into))
    }

    /// Applies `f` to a copy of a change and stores it if `f` succeeds.
    /// `id` and `seq` cannot be changed.
    pub fn update<F>(&self, id: &ChangeId, f: F) -> StorageResult<Change>
    where
        F: FnOnce(&mut Change) -> StorageResult<()>,
    {
        let updated = {
            let mut inner = self.write();
            let change = inner.get_mut(id)?;
            let mut draft = change.clone();
            f(&mut draft)?;
            draft.id = change.id;
            draft.seq = change.seq;
            *change = draft.clone();
            draft
        };
        self.mark_dirty(updated.seq);
        Ok(updated)
    }

    /// Drops a change from the log entirely.
    pub fn remove(&self, id: &ChangeId) -> StorageResult<Change> {
        let removed = {
            let mut inner = self.write();
            let seq = inner
                .index
                .remove(id)
                .ok_or_else(|| StorageError::NotFound(format!("change {id}")))?;
            inner
                .by_seq
                .remove(&seq)
                .ok_or_else(|| StorageError::InvalidData(format!("change index points at missing seq {seq}")))?
        };
        self.mark_dirty(removed.seq);
        Ok(removed)
    }

    /// Removes every synced change from the log. Returns how many were removed.
    pub fn archive_synced(&self) -> usize {
        let removed: Vec<u64> = {
            let mut inner = self.write();
            let synced: Vec<(u64, ChangeId)> = inner
                .by_seq
                .values()
                .filter(|c| c.is_synced())
                .map(|c| (c.seq, c.id))
                .collect();
            for (seq, id) in &synced {
                inner.by_seq.remove(seq);
                inner.index.remove(id);
            }
            inner.archived += synced.len() as u64;
            synced.into_iter().map(|(seq, _)| seq).collect()
        };
        if !removed.is_empty() {
            let mut dirty = self.dirty.lock().unwrap_or_else(|e| e.into_inner());
            dirty.extend(removed.iter().copied());
            debug!("Archived {} synced changes", removed.len());
        }
        removed.len()
    }
}
