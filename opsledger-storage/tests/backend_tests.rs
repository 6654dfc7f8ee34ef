use opsledger_storage::{KvBackend, MemoryBackend, SqliteBackend, WriteOp};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

fn exercise(backend: &dyn KvBackend) {
    assert_eq!(backend.get("entities", "a").unwrap(), None);

    backend.put("entities", "b", "2").unwrap();
    backend.put("entities", "a", "1").unwrap();
    backend.put("changes", "a", "other").unwrap();

    assert_eq!(backend.get("entities", "a").unwrap().as_deref(), Some("1"));
    assert_eq!(
        backend.scan("entities").unwrap(),
        vec![("a".to_string(), "1".to_string()), ("b".to_string(), "2".to_string())]
    );

    assert!(backend.delete("entities", "a").unwrap());
    assert!(!backend.delete("entities", "a").unwrap());
    assert_eq!(backend.get("changes", "a").unwrap().as_deref(), Some("other"));
}

// ── Memory ───────────────────────────────────────────────────────

#[test]
fn memory_backend_basic_operations() {
    let backend = MemoryBackend::new();
    exercise(&backend);
    assert_eq!(backend.len(), 2);
}

#[test]
fn memory_backend_batch_applies_in_order() {
    let backend = MemoryBackend::new();
    backend
        .write_batch(&[
            WriteOp::put("ns", "k", "first"),
            WriteOp::put("ns", "k", "second"),
            WriteOp::put("ns", "gone", "x"),
            WriteOp::delete("ns", "gone"),
        ])
        .unwrap();

    assert_eq!(backend.get("ns", "k").unwrap().as_deref(), Some("second"));
    assert_eq!(backend.get("ns", "gone").unwrap(), None);
}

// ── SQLite ───────────────────────────────────────────────────────

#[test]
fn sqlite_backend_basic_operations() {
    let backend = SqliteBackend::open_in_memory().unwrap();
    exercise(&backend);
}

#[test]
fn sqlite_backend_persists_across_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("store.db");

    {
        let backend = SqliteBackend::open(&path).unwrap();
        backend
            .write_batch(&[WriteOp::put("entities", "x", "{}"), WriteOp::put("changes", "1", "c")])
            .unwrap();
    }

    let reopened = SqliteBackend::open(&path).unwrap();
    assert_eq!(reopened.get("entities", "x").unwrap().as_deref(), Some("{}"));
    assert_eq!(reopened.scan("changes").unwrap().len(), 1);
}

#[test]
fn sqlite_scan_orders_by_key() {
    let backend = SqliteBackend::open_in_memory().unwrap();
    for key in ["00000000000000000003", "00000000000000000001", "00000000000000000002"] {
        backend.put("changes", key, key).unwrap();
    }
    let keys: Vec<String> = backend.scan("changes").unwrap().into_iter().map(|(k, _)| k).collect();
    assert_eq!(
        keys,
        vec!["00000000000000000001", "00000000000000000002", "00000000000000000003"]
    );
}
