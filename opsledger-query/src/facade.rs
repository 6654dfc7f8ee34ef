//! Read-only facade over the store, the change log and open conflicts.

use crate::filter::{is_low_stock, EntityFilter};
use crate::overlap::{find_overlaps, AppointmentOverlap};
use crate::search::{paginate, sort_entities, SearchOptions, SearchResult};
use crate::stats::Statistics;
use chrono::{DateTime, Utc};
use opsledger_model::{EntitySyncState, SchemaRegistry, APPOINTMENT, INVENTORY_ITEM};
use opsledger_storage::{ChangeLog, EntityStore};
use opsledger_sync::ConflictStore;
use tracing::debug;

/// Borrowed view used for every read the UI performs.
///
/// Cheap to build; results are owned snapshots, so holding them never
/// blocks writers.
#[derive(Clone, Copy)]
pub struct QueryFacade<'a> {
    store: &'a EntityStore,
    log: &'a ChangeLog,
    conflicts: &'a ConflictStore,
    schemas: &'a SchemaRegistry,
    last_sync_at: Option<DateTime<Utc>>,
}

impl<'a> QueryFacade<'a> {
    pub fn new(
        store: &'a EntityStore,
        log: &'a ChangeLog,
        conflicts: &'a ConflictStore,
        schemas: &'a SchemaRegistry,
    ) -> Self {
        Self {
            store,
            log,
            conflicts,
            schemas,
            last_sync_at: None,
        }
    }

    /// Time of the last completed sync pass, reported by [`Self::statistics`].
    pub fn with_last_sync(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.last_sync_at = at;
        self
    }

    /// Live entities matching `filter`, sorted and paginated per `options`.
    pub fn search(&self, filter: &EntityFilter, options: &SearchOptions) -> SearchResult {
        let mut matched = self.store.list(|e| filter.matches(e, self.schemas));
        if let Some(ref sort) = options.sort {
            sort_entities(&mut matched, sort);
        }
        let result = paginate(matched, options);
        debug!(
            "Search returned {} of {} matches (offset={})",
            result.items.len(),
            result.total,
            options.offset
        );
        result
    }

    /// Number of live entities matching `filter`.
    pub fn count(&self, filter: &EntityFilter) -> usize {
        self.store.list(|e| filter.matches(e, self.schemas)).len()
    }

    pub fn statistics(&self) -> Statistics {
        let mut stats = Statistics {
            last_sync_at: self.last_sync_at,
            conflicts: self.conflicts.len(),
            ..Statistics::default()
        };

        for entity in self.store.list(|_| true) {
            stats.total_entities += 1;
            *stats.by_type.entry(entity.entity_type.clone()).or_default() += 1;
            if let Some(category) = entity.get_str("/category") {
                *stats.by_category.entry(category.to_string()).or_default() += 1;
            }
            match entity.sync_state {
                EntitySyncState::Synced => stats.sync_states.synced += 1,
                EntitySyncState::Pending => stats.sync_states.pending += 1,
                EntitySyncState::Conflict => stats.sync_states.conflict += 1,
            }

            if entity.entity_type == INVENTORY_ITEM {
                let quantity = entity.get_number("/quantity").unwrap_or(0.0);
                let price = entity.get_number("/price").unwrap_or(0.0);
                stats.inventory_value += quantity * price;
                if is_low_stock(&entity) {
                    stats.low_stock_items.push(entity.id);
                }
            } else if entity.entity_type == APPOINTMENT
                && let Some(status) = entity.get_str("/status")
            {
                *stats
                    .appointments_by_status
                    .entry(status.to_string())
                    .or_default() += 1;
            }
        }

        for change in self.log.pending() {
            stats.pending_changes += 1;
            if change.is_offline {
                stats.offline_changes += 1;
            }
        }

        stats
    }

    /// Double-bookings among live appointments.
    pub fn overlapping_appointments(&self) -> Vec<AppointmentOverlap> {
        let appointments = self.store.list(|e| e.entity_type == APPOINTMENT);
        find_overlaps(&appointments)
    }
}
