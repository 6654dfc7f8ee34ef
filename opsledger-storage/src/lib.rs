//! Local storage layer for OpsLedger.
//!
//! Provides the two durable structures the offline manager is built on:
//!
//! - [`EntityStore`]: the Local Store. Reads and writes hit an in-memory
//!   cache and never wait on I/O; dirty keys are persisted by an explicit
//!   [`EntityStore::flush`].
//! - [`ChangeLog`]: the append-only ledger of mutations the remote has not
//!   confirmed yet, with strictly increasing sequence numbers.
//!
//! Both persist through a [`KvBackend`], which only needs get/put/delete by
//! key and iteration over a namespace. [`MemoryBackend`] and
//! [`SqliteBackend`] are provided.

mod backend;
mod change_log;
mod entity_store;
mod error;

pub use backend::{KvBackend, MemoryBackend, SqliteBackend, WriteOp};
pub use change_log::ChangeLog;
pub use entity_store::EntityStore;
pub use error::{StorageError, StorageResult};

/// Namespace holding serialized entities keyed by entity id.
pub const ENTITIES_NS: &str = "entities";
/// Namespace holding change log entries keyed by zero-padded sequence number.
pub const CHANGES_NS: &str = "changes";
/// Namespace holding unresolved sync conflicts keyed by change id.
pub const CONFLICTS_NS: &str = "conflicts";

/// Runs a blocking backend call off the async runtime's worker threads.
pub(crate) async fn blocking<T, F>(f: F) -> StorageResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> StorageResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StorageError::Task(e.to_string()))?
}
