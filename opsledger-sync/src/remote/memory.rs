use super::{PushAck, PushOp, PushRequest, RemoteAuthority, RemoteRecord};
use crate::error::RemoteError;
use async_trait::async_trait;
use opsledger_types::{ChangeId, EntityId};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

#[derive(Default)]
struct RemoteState {
    records: HashMap<(String, EntityId), RemoteRecord>,
    /// Version each applied change produced, for idempotent retries.
    applied: HashMap<ChangeId, u64>,
    transport_failures: HashMap<EntityId, u32>,
    rejected: HashMap<EntityId, String>,
    available: bool,
    latency: Duration,
    pushes: usize,
}

/// In-process remote authority.
///
/// Implements the same version rules as the REST server and adds failure
/// injection (transport errors, rejections, latency, outages) and a way to
/// simulate writes from other devices.
pub struct MemoryRemote {
    state: Mutex<RemoteState>,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RemoteState {
                available: true,
                ..RemoteState::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RemoteState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Stores a record as-is, replacing any existing one.
    pub fn insert(&self, entity_type: &str, record: RemoteRecord) {
        self.lock()
            .records
            .insert((entity_type.to_string(), record.id), record);
    }

    /// Returns the stored record.
    pub fn record(&self, entity_type: &str, id: &EntityId) -> Option<RemoteRecord> {
        self.lock().records.get(&(entity_type.to_string(), *id)).cloned()
    }

    /// Simulates another device overwriting `fields`. Returns the new
    /// version, or `None` if the record does not exist.
    pub fn apply_external(&self, entity_type: &str, id: &EntityId, fields: Value) -> Option<u64> {
        let mut state = self.lock();
        let record = state.records.get_mut(&(entity_type.to_string(), *id))?;
        if let (Some(target), Some(source)) = (record.data.as_object_mut(), fields.as_object()) {
            for (k, v) in source {
                target.insert(k.clone(), v.clone());
            }
        }
        record.version += 1;
        Some(record.version)
    }

    /// Simulates another device deleting the record.
    pub fn delete_external(&self, entity_type: &str, id: &EntityId) -> bool {
        self.lock()
            .records
            .remove(&(entity_type.to_string(), *id))
            .is_some()
    }

    /// The next `times` pushes for `id` fail with a transport error.
    pub fn fail_transport(&self, id: EntityId, times: u32) {
        self.lock().transport_failures.insert(id, times);
    }

    /// Every push for `id` is rejected with `reason` until cleared.
    pub fn reject(&self, id: EntityId, reason: impl Into<String>) {
        self.lock().rejected.insert(id, reason.into());
    }

    pub fn clear_rejection(&self, id: &EntityId) {
        self.lock().rejected.remove(id);
    }

    /// While unavailable every call fails with a transport error.
    pub fn set_available(&self, available: bool) {
        self.lock().available = available;
    }

    /// Delay applied to every push before it takes effect.
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = latency;
    }

    /// Number of pushes received, failed ones included.
    pub fn push_count(&self) -> usize {
        self.lock().pushes
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn apply(&self, request: &PushRequest) -> Result<PushAck, RemoteError> {
        let mut state = self.lock();
        state.pushes += 1;

        if !state.available {
            return Err(RemoteError::Transport("remote unavailable".into()));
        }
        if let Some(left) = state.transport_failures.get_mut(&request.entity_id) {
            if *left > 0 {
                *left -= 1;
                return Err(RemoteError::Transport("injected transport failure".into()));
            }
        }
        if let Some(reason) = state.rejected.get(&request.entity_id) {
            return Err(RemoteError::Rejected(reason.clone()));
        }
        if let Some(version) = state.applied.get(&request.change_id) {
            return Ok(PushAck { version: *version });
        }

        let key = (request.entity_type.clone(), request.entity_id);
        let current = state.records.get(&key).cloned();
        let current_version = current.as_ref().map_or(0, |r| r.version);

        let version = match &request.op {
            PushOp::Upsert { data } => {
                if current_version != request.expected_version {
                    return Err(RemoteError::VersionMismatch { current });
                }
                let version = current_version + 1;
                state.records.insert(
                    key,
                    RemoteRecord {
                        id: request.entity_id,
                        version,
                        data: data.clone(),
                    },
                );
                version
            }
            PushOp::Delete => {
                if current.is_none() {
                    return Err(RemoteError::NotFound);
                }
                if current_version != request.expected_version {
                    return Err(RemoteError::VersionMismatch { current });
                }
                state.records.remove(&key);
                current_version + 1
            }
        };

        state.applied.insert(request.change_id, version);
        debug!(
            "Remote applied change {} to {} {} (v{})",
            request.change_id, request.entity_type, request.entity_id, version
        );
        Ok(PushAck { version })
    }
}

#[async_trait]
impl RemoteAuthority for MemoryRemote {
    async fn push(&self, request: PushRequest) -> Result<PushAck, RemoteError> {
        let latency = self.lock().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.apply(&request)
    }

    async fn fetch(&self, entity_type: &str, id: &EntityId) -> Result<Option<RemoteRecord>, RemoteError> {
        let state = self.lock();
        if !state.available {
            return Err(RemoteError::Transport("remote unavailable".into()));
        }
        Ok(state.records.get(&(entity_type.to_string(), *id)).cloned())
    }
}
