use crate::conflict::Conflict;
use crate::error::SyncError;
use opsledger_types::{ChangeId, EntityId};

/// A change that could not be pushed during a pass. It stays in the log.
#[derive(Debug)]
pub struct ChangeFailure {
    pub change_id: ChangeId,
    pub entity_id: EntityId,
    pub error: SyncError,
}

/// Outcome of one [`crate::SyncEngine::sync`] pass.
///
/// Partial success is normal: every change lands in exactly one bucket.
#[derive(Debug, Default)]
pub struct SyncReport {
    /// Generation number of the pass.
    pub generation: u64,
    /// Changes the remote confirmed.
    pub applied: usize,
    /// Conflicts detected in this pass.
    pub conflicts: Vec<Conflict>,
    /// Changes that failed (transport, rejection, storage).
    pub errors: Vec<ChangeFailure>,
    /// Changes not attempted because their lane was blocked or stopped.
    pub skipped: usize,
    /// Changes abandoned because a newer pass started, or whose in-flight
    /// result was discarded as stale.
    pub superseded: usize,
}

impl SyncReport {
    pub(crate) fn new(generation: u64) -> Self {
        Self {
            generation,
            ..Self::default()
        }
    }

    /// True when nothing failed or conflicted.
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty() && self.errors.is_empty()
    }

    pub(crate) fn merge(&mut self, other: SyncReport) {
        self.applied += other.applied;
        self.conflicts.extend(other.conflicts);
        self.errors.extend(other.errors);
        self.skipped += other.skipped;
        self.superseded += other.superseded;
    }
}
