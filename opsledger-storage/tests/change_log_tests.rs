use opsledger_model::{Change, ChangeOp, ChangeState};
use opsledger_storage::{ChangeLog, MemoryBackend, SqliteBackend, StorageError};
use opsledger_types::{EntityId, HybridClock};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

fn make_change(entity_id: EntityId, clock: &HybridClock, delta: f64) -> Change {
    Change::new(
        entity_id,
        "inventory_item",
        ChangeOp::Adjust { field: "quantity".into(), delta },
        0,
        clock.tick(),
        true,
    )
}

fn memory_log() -> ChangeLog {
    ChangeLog::new(Arc::new(MemoryBackend::new()))
}

// ── Append ───────────────────────────────────────────────────────

#[test]
fn append_assigns_increasing_sequence() {
    let log = memory_log();
    let clock = HybridClock::new();
    let entity = EntityId::new();

    let seqs: Vec<u64> = (0..5)
        .map(|_| log.append(make_change(entity, &clock, -1.0)).seq)
        .collect();

    assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
    assert_eq!(log.last_seq(), 5);
    assert_eq!(log.pending_count(), 5);
}

#[test]
fn pending_is_in_append_order_and_per_entity() {
    let log = memory_log();
    let clock = HybridClock::new();
    let a = EntityId::new();
    let b = EntityId::new();

    let first = log.append(make_change(a, &clock, 1.0));
    log.append(make_change(b, &clock, 2.0));
    let third = log.append(make_change(a, &clock, 3.0));

    let ids: Vec<_> = log.pending_for(&a).into_iter().map(|c| c.id).collect();
    assert_eq!(ids, vec![first.id, third.id]);
    assert_eq!(log.pending().len(), 3);
}

#[test]
fn get_missing_change_is_not_found() {
    let log = memory_log();
    assert!(matches!(
        log.get(&opsledger_types::ChangeId::new()),
        Err(StorageError::NotFound(_))
    ));
}

// ── State transitions ────────────────────────────────────────────

#[test]
fn mark_synced_is_idempotent() {
    let log = memory_log();
    let clock = HybridClock::new();
    let change = log.append(make_change(EntityId::new(), &clock, 1.0));

    assert!(log.mark_synced(&change.id).unwrap());
    assert!(!log.mark_synced(&change.id).unwrap());
    assert_eq!(log.get(&change.id).unwrap().state, ChangeState::Synced);
    assert_eq!(log.pending_count(), 0);
}

#[test]
fn mark_synced_refuses_conflicted_change() {
    let log = memory_log();
    let clock = HybridClock::new();
    let change = log.append(make_change(EntityId::new(), &clock, 1.0));
    log.transition(&change.id, ChangeState::Syncing).unwrap();
    log.transition(&change.id, ChangeState::Conflict).unwrap();

    assert!(matches!(log.mark_synced(&change.id), Err(StorageError::Model(_))));
    assert_eq!(log.in_state(ChangeState::Conflict).len(), 1);
}

#[test]
fn illegal_transition_is_rejected_and_state_kept() {
    let log = memory_log();
    let clock = HybridClock::new();
    let change = log.append(make_change(EntityId::new(), &clock, 1.0));

    assert!(log.transition(&change.id, ChangeState::Conflict).is_err());
    assert_eq!(log.get(&change.id).unwrap().state, ChangeState::Unsynced);
}

#[test]
fn update_cannot_change_identity() {
    let log = memory_log();
    let clock = HybridClock::new();
    let change = log.append(make_change(EntityId::new(), &clock, 1.0));

    let updated = log
        .update(&change.id, |c| {
            c.seq = 99;
            c.attempts += 1;
            c.op = ChangeOp::SetFields {
                fields: json!({"quantity": 3}).as_object().cloned().unwrap_or_default(),
            };
            Ok(())
        })
        .unwrap();

    assert_eq!(updated.seq, change.seq);
    assert_eq!(updated.attempts, 1);
    assert_eq!(log.get(&change.id).unwrap(), updated);
}

#[test]
fn failed_update_leaves_change_untouched() {
    let log = memory_log();
    let clock = HybridClock::new();
    let change = log.append(make_change(EntityId::new(), &clock, 1.0));

    let result = log.update(&change.id, |c| {
        c.attempts = 7;
        Err(StorageError::InvalidData("nope".into()))
    });

    assert!(result.is_err());
    assert_eq!(log.get(&change.id).unwrap().attempts, 0);
}

// ── Archiving and persistence ────────────────────────────────────

#[test]
fn archive_synced_drops_only_confirmed_entries() {
    let log = memory_log();
    let clock = HybridClock::new();
    let entity = EntityId::new();
    let a = log.append(make_change(entity, &clock, 1.0));
    let b = log.append(make_change(entity, &clock, 1.0));
    log.mark_synced(&a.id).unwrap();

    assert_eq!(log.archive_synced(), 1);
    assert_eq!(log.len(), 1);
    assert_eq!(log.archived_count(), 1);
    assert_eq!(log.all()[0].id, b.id);
}

#[tokio::test]
async fn sequence_keeps_increasing_after_reload() {
    let backend = Arc::new(MemoryBackend::new());
    let clock = HybridClock::new();
    let entity = EntityId::new();

    let log = ChangeLog::new(backend.clone());
    let first = log.append(make_change(entity, &clock, 1.0));
    log.append(make_change(entity, &clock, 1.0));
    log.flush().await.unwrap();

    let reloaded = ChangeLog::new(backend);
    assert_eq!(reloaded.load().await.unwrap(), 2);
    assert_eq!(reloaded.get(&first.id).unwrap(), first);
    assert_eq!(reloaded.append(make_change(entity, &clock, 1.0)).seq, 3);
}

#[tokio::test]
async fn sequence_survives_archiving_everything() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("log.db");
    let clock = HybridClock::new();
    let entity = EntityId::new();

    {
        let log = ChangeLog::new(Arc::new(SqliteBackend::open(&path).unwrap()));
        for _ in 0..3 {
            let c = log.append(make_change(entity, &clock, 1.0));
            log.mark_synced(&c.id).unwrap();
        }
        log.archive_synced();
        log.flush().await.unwrap();
    }

    let log = ChangeLog::new(Arc::new(SqliteBackend::open(&path).unwrap()));
    assert_eq!(log.load().await.unwrap(), 0);
    assert_eq!(log.archived_count(), 3);
    assert_eq!(log.append(make_change(entity, &clock, 1.0)).seq, 4);
}

// ── Properties ───────────────────────────────────────────────────

proptest! {
    #[test]
    fn pending_count_matches_unsynced(confirm in proptest::collection::vec(any::<bool>(), 0..40)) {
        let log = memory_log();
        let clock = HybridClock::new();
        let entity = EntityId::new();

        for &c in &confirm {
            let change = log.append(make_change(entity, &clock, 1.0));
            if c {
                prop_assert!(log.mark_synced(&change.id).unwrap());
                prop_assert!(!log.mark_synced(&change.id).unwrap());
            }
        }

        let unsynced = confirm.iter().filter(|c| !**c).count();
        prop_assert_eq!(log.pending_count(), unsynced);
        prop_assert_eq!(log.last_seq(), confirm.len() as u64);
    }
}
