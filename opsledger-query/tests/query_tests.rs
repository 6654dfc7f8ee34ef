use chrono::{DateTime, Duration, TimeZone, Utc};
use opsledger_model::{
    Appointment, AppointmentStatus, Change, ChangeOp, Entity, EntitySyncState, InventoryItem,
    SchemaRegistry, APPOINTMENT, INVENTORY_ITEM,
};
use opsledger_query::{
    find_overlaps, DateRange, EntityFilter, QueryFacade, SearchOptions, SortSpec,
};
use opsledger_storage::{ChangeLog, EntityStore, KvBackend, MemoryBackend};
use opsledger_sync::{Conflict, ConflictStore};
use opsledger_types::{ChangeId, EntityId, HybridClock};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::Arc;

struct Fixture {
    store: EntityStore,
    log: ChangeLog,
    conflicts: ConflictStore,
    schemas: SchemaRegistry,
    clock: HybridClock,
}

fn make_fixture() -> Fixture {
    let backend: Arc<dyn KvBackend> = Arc::new(MemoryBackend::new());
    Fixture {
        store: EntityStore::new(backend.clone()),
        log: ChangeLog::new(backend.clone()),
        conflicts: ConflictStore::new(backend),
        schemas: SchemaRegistry::with_builtin(),
        clock: HybridClock::new(),
    }
}

fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, hour, minute, 0).unwrap()
}

impl Fixture {
    fn facade(&self) -> QueryFacade<'_> {
        QueryFacade::new(&self.store, &self.log, &self.conflicts, &self.schemas)
    }

    fn put(&self, entity_type: &str, data: Value) -> EntityId {
        let id = EntityId::new();
        self.store
            .put(Entity::confirmed(id, entity_type, data, 1, 0));
        id
    }

    fn item(&self, item: InventoryItem) -> EntityId {
        self.put(INVENTORY_ITEM, item.to_data().unwrap())
    }

    fn appointment(&self, appt: Appointment) -> EntityId {
        self.put(APPOINTMENT, appt.to_data().unwrap())
    }

    fn pending_change(&self, id: EntityId, offline: bool) {
        self.store
            .update(&id, |e| e.sync_state = EntitySyncState::Pending)
            .unwrap();
        self.log.append(Change::new(
            id,
            INVENTORY_ITEM,
            ChangeOp::Adjust {
                field: "quantity".into(),
                delta: -1.0,
            },
            1,
            self.clock.tick(),
            offline,
        ));
    }

    fn seed_inventory(&self) -> (EntityId, EntityId, EntityId) {
        let shampoo = self.item(
            InventoryItem::new("SH-01", "Argan Shampoo", 3)
                .with_category("hair")
                .with_price(12.5)
                .with_low_stock_threshold(5),
        );
        let gloves = self.item(
            InventoryItem::new("GL-02", "Nitrile Gloves", 40)
                .with_category("supplies")
                .with_price(0.25)
                .with_low_stock_threshold(10),
        );
        let dye = self.item(
            InventoryItem::new("DY-03", "Copper Dye", 10)
                .with_category("hair")
                .with_price(8.0)
                .with_low_stock_threshold(10),
        );
        (shampoo, gloves, dye)
    }
}

fn ids(result: &[Entity]) -> Vec<EntityId> {
    result.iter().map(|e| e.id).collect()
}

// ── Filtering ───────────────────────────────────────────────────

#[test]
fn empty_filter_returns_every_live_entity() {
    let f = make_fixture();
    f.seed_inventory();
    let gone = f.put(INVENTORY_ITEM, json!({"sku": "X", "name": "Gone", "quantity": 1}));
    f.store.update(&gone, |e| e.deleted = true).unwrap();

    let result = f.facade().search(&EntityFilter::new(), &SearchOptions::default());
    assert_eq!(result.total, 3);
    assert!(!result.has_more);
    assert!(result.items.iter().all(|e| e.id != gone));
}

#[test]
fn text_search_is_case_insensitive_over_searchable_fields() {
    let f = make_fixture();
    let (shampoo, _, dye) = f.seed_inventory();

    let found = f
        .facade()
        .search(&EntityFilter::new().with_text("ARGAN"), &SearchOptions::default());
    assert_eq!(ids(&found.items), vec![shampoo]);

    // category is searchable on inventory items
    let found = f
        .facade()
        .search(&EntityFilter::new().with_text("hair"), &SearchOptions::default());
    let mut expected = vec![shampoo, dye];
    expected.sort();
    assert_eq!(ids(&found.items), expected);
}

#[test]
fn text_search_skips_non_searchable_fields() {
    let f = make_fixture();
    f.item(InventoryItem {
        industry: Some("salon".into()),
        ..InventoryItem::new("SKU-9", "Comb", 4)
    });

    let found = f
        .facade()
        .search(&EntityFilter::new().with_text("salon"), &SearchOptions::default());
    assert_eq!(found.total, 0);
}

#[test]
fn text_search_on_unregistered_type_uses_all_string_fields() {
    let f = make_fixture();
    let supplier = f.put("supplier", json!({"company": "Blue Harbor Wholesale", "rating": 4}));

    let found = f
        .facade()
        .search(&EntityFilter::new().with_text("harbor"), &SearchOptions::default());
    assert_eq!(ids(&found.items), vec![supplier]);
}

#[test]
fn blank_text_matches_everything() {
    let f = make_fixture();
    f.seed_inventory();
    let filter = EntityFilter::new().with_text("   ");
    assert_eq!(f.facade().count(&filter), 3);
}

#[test]
fn category_and_type_filters_combine() {
    let f = make_fixture();
    let (shampoo, _, dye) = f.seed_inventory();
    f.put("supplier", json!({"company": "Hair Co", "category": "hair"}));

    let filter = EntityFilter::new()
        .with_type(INVENTORY_ITEM)
        .with_category("hair");
    let mut expected = vec![shampoo, dye];
    expected.sort();
    assert_eq!(ids(&f.facade().search(&filter, &SearchOptions::default()).items), expected);
}

#[test]
fn low_stock_filter_uses_threshold_inclusive() {
    let f = make_fixture();
    let (shampoo, gloves, dye) = f.seed_inventory();

    let low = f
        .facade()
        .search(&EntityFilter::new().low_stock(true), &SearchOptions::default());
    let mut expected = vec![shampoo, dye];
    expected.sort();
    assert_eq!(ids(&low.items), expected);

    let healthy = f.facade().search(
        &EntityFilter::new().with_type(INVENTORY_ITEM).low_stock(false),
        &SearchOptions::default(),
    );
    assert_eq!(ids(&healthy.items), vec![gloves]);
}

#[test]
fn status_and_staff_filters_match_appointments() {
    let f = make_fixture();
    let booked = f.appointment(Appointment::new("Cut", "Ana", "staff-1", at(9, 0), at(10, 0)));
    f.appointment(Appointment {
        status: AppointmentStatus::Cancelled,
        ..Appointment::new("Color", "Ben", "staff-1", at(11, 0), at(12, 0))
    });
    f.appointment(Appointment::new("Trim", "Cy", "staff-2", at(9, 0), at(9, 30)));

    let filter = EntityFilter::new().with_staff("staff-1").with_status("scheduled");
    assert_eq!(
        ids(&f.facade().search(&filter, &SearchOptions::default()).items),
        vec![booked]
    );
}

#[test]
fn sync_state_filter() {
    let f = make_fixture();
    let (shampoo, _, _) = f.seed_inventory();
    f.pending_change(shampoo, true);

    let filter = EntityFilter::new().with_sync_state(EntitySyncState::Pending);
    assert_eq!(
        ids(&f.facade().search(&filter, &SearchOptions::default()).items),
        vec![shampoo]
    );
}

#[test]
fn date_range_is_half_open() {
    let f = make_fixture();
    let nine = f.appointment(Appointment::new("A", "Ana", "s1", at(9, 0), at(9, 30)));
    let ten = f.appointment(Appointment::new("B", "Ben", "s1", at(10, 0), at(10, 30)));
    f.appointment(Appointment::new("C", "Cy", "s1", at(11, 0), at(11, 30)));

    let filter =
        EntityFilter::new().with_date_range(DateRange::new("start", Some(at(9, 0)), Some(at(11, 0))));
    let mut expected = vec![nine, ten];
    expected.sort();
    assert_eq!(ids(&f.facade().search(&filter, &SearchOptions::default()).items), expected);
}

#[test]
fn date_range_excludes_entities_without_the_field() {
    let f = make_fixture();
    f.seed_inventory();
    let filter = EntityFilter::new().with_date_range(DateRange::new("start", None, None));
    assert_eq!(f.facade().count(&filter), 0);
}

#[test]
fn filter_deserializes_from_partial_json() {
    let filter: EntityFilter =
        serde_json::from_value(json!({"entity_type": "appointment", "low_stock": false})).unwrap();
    assert_eq!(filter.entity_type.as_deref(), Some("appointment"));
    assert_eq!(filter.low_stock, Some(false));
    assert_eq!(filter.text, None);
}

// ── Sorting & pagination ────────────────────────────────────────

#[test]
fn sorts_numbers_numerically() {
    let f = make_fixture();
    let (shampoo, gloves, dye) = f.seed_inventory();

    let asc = f.facade().search(
        &EntityFilter::new(),
        &SearchOptions::sorted_by(SortSpec::asc("quantity")),
    );
    assert_eq!(ids(&asc.items), vec![shampoo, dye, gloves]);

    let desc = f.facade().search(
        &EntityFilter::new(),
        &SearchOptions::sorted_by(SortSpec::desc("quantity")),
    );
    assert_eq!(ids(&desc.items), vec![gloves, dye, shampoo]);
}

#[test]
fn sorts_strings_and_puts_missing_values_last() {
    let f = make_fixture();
    let b = f.put("note", json!({"title": "beta"}));
    let a = f.put("note", json!({"title": "alpha"}));
    let none = f.put("note", json!({"body": "untitled"}));

    for sort in [SortSpec::asc("title"), SortSpec::desc("title")] {
        let desc = sort.direction == opsledger_query::SortDirection::Desc;
        let result = f
            .facade()
            .search(&EntityFilter::new(), &SearchOptions::sorted_by(sort));
        let expected = if desc { vec![b, a, none] } else { vec![a, b, none] };
        assert_eq!(ids(&result.items), expected);
    }
}

#[test]
fn equal_sort_keys_fall_back_to_id_order() {
    let f = make_fixture();
    let mut same: Vec<EntityId> = (0..4)
        .map(|i| f.put("note", json!({"rank": 1, "n": i})))
        .collect();
    same.sort();

    let result = f.facade().search(
        &EntityFilter::new(),
        &SearchOptions::sorted_by(SortSpec::desc("rank")),
    );
    assert_eq!(ids(&result.items), same);
}

#[test]
fn pagination_reports_total_and_has_more() {
    let f = make_fixture();
    for i in 0..5 {
        f.put("note", json!({"n": i}));
    }

    let first = f
        .facade()
        .search(&EntityFilter::new(), &SearchOptions::default().page(0, 2));
    assert_eq!((first.items.len(), first.total, first.has_more), (2, 5, true));

    let last = f
        .facade()
        .search(&EntityFilter::new(), &SearchOptions::default().page(4, 2));
    assert_eq!((last.items.len(), last.total, last.has_more), (1, 5, false));

    let past = f
        .facade()
        .search(&EntityFilter::new(), &SearchOptions::default().page(10, 2));
    assert_eq!((past.items.len(), past.total, past.has_more), (0, 5, false));
}

// ── Statistics ──────────────────────────────────────────────────

#[test]
fn statistics_on_empty_store() {
    let f = make_fixture();
    let stats = f.facade().statistics();
    assert_eq!(stats.total_entities, 0);
    assert_eq!(stats.inventory_value, 0.0);
    assert!(stats.is_fully_synced());
    assert_eq!(stats.last_sync_at, None);
}

#[test]
fn statistics_aggregate_inventory_and_appointments() {
    let f = make_fixture();
    let (shampoo, _, dye) = f.seed_inventory();
    f.appointment(Appointment::new("Cut", "Ana", "s1", at(9, 0), at(10, 0)));
    f.appointment(Appointment {
        status: AppointmentStatus::Completed,
        ..Appointment::new("Dye", "Ben", "s1", at(10, 0), at(11, 0))
    });
    f.pending_change(shampoo, true);
    f.pending_change(dye, false);
    let synced_at = at(12, 0);

    let stats = f.facade().with_last_sync(Some(synced_at)).statistics();

    assert_eq!(stats.total_entities, 5);
    assert_eq!(stats.by_type[INVENTORY_ITEM], 3);
    assert_eq!(stats.by_type[APPOINTMENT], 2);
    assert_eq!(stats.by_category["hair"], 2);
    assert_eq!(stats.by_category["supplies"], 1);
    assert_eq!(stats.appointments_by_status["scheduled"], 1);
    assert_eq!(stats.appointments_by_status["completed"], 1);
    let mut low = vec![shampoo, dye];
    low.sort();
    assert_eq!(stats.low_stock_items, low);
    assert_eq!(stats.low_stock_count(), 2);
    // 3 × 12.5 + 40 × 0.25 + 10 × 8
    assert!((stats.inventory_value - 127.5).abs() < 1e-9);
    assert_eq!(stats.pending_changes, 2);
    assert_eq!(stats.offline_changes, 1);
    assert_eq!(stats.sync_states.pending, 2);
    assert_eq!(stats.sync_states.synced, 3);
    assert_eq!(stats.last_sync_at, Some(synced_at));
    assert!(!stats.is_fully_synced());
}

#[test]
fn statistics_count_open_conflicts() {
    let f = make_fixture();
    let (shampoo, _, _) = f.seed_inventory();
    f.conflicts.insert(Conflict {
        change_id: ChangeId::new(),
        entity_id: shampoo,
        entity_type: INVENTORY_ITEM.into(),
        fields: vec![],
        base_version: 1,
        remote_version: 2,
        remote_data: None,
        detected_at: 0,
    });

    assert_eq!(f.facade().statistics().conflicts, 1);
}

// ── Overlaps ────────────────────────────────────────────────────

#[test]
fn overlapping_appointments_for_same_staff() {
    let f = make_fixture();
    let a = f.appointment(Appointment::new("Cut", "Ana", "s1", at(9, 0), at(10, 0)));
    let b = f.appointment(Appointment::new("Color", "Ben", "s1", at(9, 30), at(11, 0)));
    // back-to-back with b
    f.appointment(Appointment::new("Trim", "Cy", "s1", at(11, 0), at(11, 30)));
    f.appointment(Appointment::new("Shave", "Dee", "s2", at(9, 0), at(10, 0)));

    let overlaps = f.facade().overlapping_appointments();
    assert_eq!(overlaps.len(), 1);
    assert_eq!((overlaps[0].first, overlaps[0].second), (a, b));
    assert_eq!(overlaps[0].staff_id, "s1");
    assert_eq!(overlaps[0].overlap_start, at(9, 30));
    assert_eq!(overlaps[0].overlap_end, at(10, 0));
}

#[test]
fn cancelled_and_deleted_appointments_do_not_overlap() {
    let f = make_fixture();
    f.appointment(Appointment::new("Cut", "Ana", "s1", at(9, 0), at(10, 0)));
    f.appointment(Appointment {
        status: AppointmentStatus::Cancelled,
        ..Appointment::new("Color", "Ben", "s1", at(9, 0), at(10, 0))
    });
    let gone = f.appointment(Appointment::new("Trim", "Cy", "s1", at(9, 15), at(9, 45)));
    f.store.update(&gone, |e| e.deleted = true).unwrap();

    assert!(f.facade().overlapping_appointments().is_empty());
}

#[test]
fn long_booking_overlaps_every_contained_one() {
    let day = Appointment::new("Workshop", "Team", "s1", at(8, 0), at(17, 0));
    let entities: Vec<Entity> = [
        day,
        Appointment::new("A", "Ana", "s1", at(9, 0), at(10, 0)),
        Appointment::new("B", "Ben", "s1", at(13, 0), at(14, 0)),
    ]
    .into_iter()
    .map(|a| Entity::confirmed(EntityId::new(), APPOINTMENT, a.to_data().unwrap(), 1, 0))
    .collect();

    let overlaps = find_overlaps(&entities);
    assert_eq!(overlaps.len(), 2);
    assert!(overlaps.iter().all(|o| o.first == entities[0].id));
    assert!(overlaps.iter().all(|o| o.overlap_end - o.overlap_start == Duration::hours(1)));
}
