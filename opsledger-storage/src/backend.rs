//! Key-value persistence backends.

use crate::error::StorageResult;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// One write in an atomic batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    Put {
        namespace: String,
        key: String,
        value: String,
    },
    Delete {
        namespace: String,
        key: String,
    },
}

impl WriteOp {
    pub fn put(namespace: &str, key: impl Into<String>, value: impl Into<String>) -> Self {
        WriteOp::Put {
            namespace: namespace.to_string(),
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn delete(namespace: &str, key: impl Into<String>) -> Self {
        WriteOp::Delete {
            namespace: namespace.to_string(),
            key: key.into(),
        }
    }
}

/// Durable client-side key-value storage.
///
/// Calls are blocking; the stores run them on `spawn_blocking`.
pub trait KvBackend: Send + Sync {
    fn get(&self, namespace: &str, key: &str) -> StorageResult<Option<String>>;

    fn put(&self, namespace: &str, key: &str, value: &str) -> StorageResult<()>;

    /// Returns whether the key existed.
    fn delete(&self, namespace: &str, key: &str) -> StorageResult<bool>;

    /// All entries of a namespace, ordered by key.
    fn scan(&self, namespace: &str) -> StorageResult<Vec<(String, String)>>;

    /// Applies a batch of writes. Backends that support transactions make
    /// the batch atomic.
    fn write_batch(&self, batch: &[WriteOp]) -> StorageResult<()> {
        for op in batch {
            match op {
                WriteOp::Put {
                    namespace,
                    key,
                    value,
                } => self.put(namespace, key, value)?,
                WriteOp::Delete { namespace, key } => {
                    self.delete(namespace, key)?;
                }
            }
        }
        Ok(())
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Volatile backend for tests and throwaway sessions.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Mutex<BTreeMap<(String, String), String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored entries across namespaces.
    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KvBackend for MemoryBackend {
    fn get(&self, namespace: &str, key: &str) -> StorageResult<Option<String>> {
        Ok(lock(&self.entries)
            .get(&(namespace.to_string(), key.to_string()))
            .cloned())
    }

    fn put(&self, namespace: &str, key: &str, value: &str) -> StorageResult<()> {
        lock(&self.entries).insert((namespace.to_string(), key.to_string()), value.to_string());
        Ok(())
    }

    fn delete(&self, namespace: &str, key: &str) -> StorageResult<bool> {
        Ok(lock(&self.entries)
            .remove(&(namespace.to_string(), key.to_string()))
            .is_some())
    }

    fn scan(&self, namespace: &str) -> StorageResult<Vec<(String, String)>> {
        Ok(lock(&self.entries)
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|((_, k), v)| (k.clone(), v.clone()))
            .collect())
    }

    fn write_batch(&self, batch: &[WriteOp]) -> StorageResult<()> {
        let mut entries = lock(&self.entries);
        for op in batch {
            match op {
                WriteOp::Put {
                    namespace,
                    key,
                    value,
                } => {
                    entries.insert((namespace.clone(), key.clone()), value.clone());
                }
                WriteOp::Delete { namespace, key } => {
                    entries.remove(&(namespace.clone(), key.clone()));
                }
            }
        }
        Ok(())
    }
}

/// Durable backend on a single SQLite table.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    /// Opens (or creates) a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    /// Opens an in-memory store (for testing).
    pub fn open_in_memory() -> StorageResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> StorageResult<Self> {
        conn.execute_batch(
            "
            PRAGMA synchronous = NORMAL;

            CREATE TABLE IF NOT EXISTS kv (
                namespace TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (namespace, key)
            );
            ",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl KvBackend for SqliteBackend {
    fn get(&self, namespace: &str, key: &str) -> StorageResult<Option<String>> {
        let conn = lock(&self.conn);
        let value = conn
            .query_row(
                "SELECT value FROM kv WHERE namespace = ?1 AND key = ?2",
                params![namespace, key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn put(&self, namespace: &str, key: &str, value: &str) -> StorageResult<()> {
        lock(&self.conn).execute(
            "INSERT OR REPLACE INTO kv (namespace, key, value) VALUES (?1, ?2, ?3)",
            params![namespace, key, value],
        )?;
        Ok(())
    }

    fn delete(&self, namespace: &str, key: &str) -> StorageResult<bool> {
        let n = lock(&self.conn).execute(
            "DELETE FROM kv WHERE namespace = ?1 AND key = ?2",
            params![namespace, key],
        )?;
        Ok(n > 0)
    }

    fn scan(&self, namespace: &str) -> StorageResult<Vec<(String, String)>> {
        let conn = lock(&self.conn);
        let mut stmt = conn.prepare("SELECT key, value FROM kv WHERE namespace = ?1 ORDER BY key")?;
        let rows = stmt
            .query_map(params![namespace], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<(String, String)>, _>>()?;
        Ok(rows)
    }

    fn write_batch(&self, batch: &[WriteOp]) -> StorageResult<()> {
        let mut conn = lock(&self.conn);
        let tx = conn.transaction()?;
        for op in batch {
            match op {
                WriteOp::Put {
                    namespace,
                    key,
                    value,
                } => {
                    tx.execute(
                        "INSERT OR REPLACE INTO kv (namespace, key, value) VALUES (?1, ?2, ?3)",
                        params![namespace, key, value],
                    )?;
                }
                WriteOp::Delete { namespace, key } => {
                    tx.execute(
                        "DELETE FROM kv WHERE namespace = ?1 AND key = ?2",
                        params![namespace, key],
                    )?;
                }
            }
        }
        tx.commit()?;
        Ok(())
    }
}
