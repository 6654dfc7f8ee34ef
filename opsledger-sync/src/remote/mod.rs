//! The remote authority the change log is reconciled against.

mod http;
mod memory;

pub use http::{HttpRemote, HttpRemoteConfig};
pub use memory::MemoryRemote;

use crate::error::RemoteError;
use async_trait::async_trait;
use opsledger_types::{ChangeId, EntityId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The canonical state of one entity as the remote holds it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub id: EntityId,
    pub version: u64,
    pub data: Value,
}

/// What a push asks the remote to do.
#[derive(Debug, Clone, PartialEq)]
pub enum PushOp {
    /// Store `data` as the full record.
    Upsert { data: Value },
    Delete,
}

/// A version-guarded write.
#[derive(Debug, Clone, PartialEq)]
pub struct PushRequest {
    pub entity_type: String,
    pub entity_id: EntityId,
    /// Lets the remote recognise a retried push it already applied.
    pub change_id: ChangeId,
    pub op: PushOp,
    /// Version the write is based on. 0 = the record must not exist.
    pub expected_version: u64,
}

/// Acknowledgment of an applied push.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushAck {
    /// Version the remote assigned to the new state.
    pub version: u64,
}

/// Owner of the canonical entity versions.
#[async_trait]
pub trait RemoteAuthority: Send + Sync {
    /// Applies a write if `expected_version` matches the remote's version.
    async fn push(&self, request: PushRequest) -> Result<PushAck, RemoteError>;

    /// Fetches the current record, `None` if it does not exist.
    async fn fetch(&self, entity_type: &str, id: &EntityId) -> Result<Option<RemoteRecord>, RemoteError>;
}
