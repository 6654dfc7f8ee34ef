//! Aggregate counts over the store and change log.

use chrono::{DateTime, Utc};
use opsledger_types::EntityId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Entity counts per sync state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStateCounts {
    pub synced: usize,
    pub pending: usize,
    pub conflict: usize,
}

/// Aggregate view of the local store for dashboards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    /// Live entities; pending-delete tombstones are excluded.
    pub total_entities: usize,
    pub by_type: BTreeMap<String, usize>,
    pub by_category: BTreeMap<String, usize>,
    pub appointments_by_status: BTreeMap<String, usize>,
    pub low_stock_items: Vec<EntityId>,
    /// Sum of quantity × price over inventory items.
    pub inventory_value: f64,
    /// Changes not yet confirmed by the remote.
    pub pending_changes: usize,
    /// Pending changes recorded while offline.
    pub offline_changes: usize,
    /// Open conflict records.
    pub conflicts: usize,
    pub sync_states: SyncStateCounts,
    pub last_sync_at: Option<DateTime<Utc>>,
}

impl Statistics {
    pub fn low_stock_count(&self) -> usize {
        self.low_stock_items.len()
    }

    /// True when nothing waits on the remote.
    pub fn is_fully_synced(&self) -> bool {
        self.pending_changes == 0 && self.conflicts == 0
    }
}
