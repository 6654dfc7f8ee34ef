//! HTTP API of the OpsLedger reference remote authority.
//!
//! Holds one versioned JSON record per `(collection, id)` and applies
//! version-guarded writes:
//!
//! - `GET    /api/{collection}/{id}` returns the record or 404
//! - `PUT    /api/{collection}/{id}` with `{data, expected_version, change_id}`
//!   returns `{version}`, 409 with the current record (or `null`), or 422
//! - `DELETE /api/{collection}/{id}?expected_version=N&change_id=C`
//!   returns `{version}`, 409 or 404
//!
//! A write carrying a `change_id` that was already applied returns the
//! version it produced the first time, so retried pushes are harmless.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use opsledger_sync::{PushAck, RemoteRecord};
use opsledger_types::{ChangeId, EntityId};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

/// Records loaded at startup, keyed by collection.
pub type Seed = BTreeMap<String, Vec<RemoteRecord>>;

#[derive(Debug, Default)]
struct Inner {
    records: HashMap<(String, EntityId), RemoteRecord>,
    applied: HashMap<ChangeId, u64>,
}

/// Shared server state.
#[derive(Debug, Clone, Default)]
pub struct RemoteStore {
    inner: Arc<Mutex<Inner>>,
}

/// Outcome of a guarded write that did not apply.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteError {
    /// The remote is at another version; carries the current record, if any.
    VersionMismatch(Option<RemoteRecord>),
    NotFound,
    Invalid(String),
}

impl RemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seed(seed: Seed) -> Self {
        let store = Self::new();
        {
            let mut inner = store.lock();
            for (collection, records) in seed {
                for record in records {
                    inner.records.insert((collection.clone(), record.id), record);
                }
            }
        }
        store
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, collection: &str, id: &EntityId) -> Option<RemoteRecord> {
        self.lock().records.get(&(collection.to_string(), *id)).cloned()
    }

    /// Records of one collection ordered by id.
    pub fn list(&self, collection: &str) -> Vec<RemoteRecord> {
        let mut out: Vec<RemoteRecord> = self
            .lock()
            .records
            .iter()
            .filter(|((c, _), _)| c == collection)
            .map(|(_, r)| r.clone())
            .collect();
        out.sort_by_key(|r| r.id);
        out
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stores `data` if the record is at `expected_version` (0 = absent).
    pub fn put(
        &self,
        collection: &str,
        id: EntityId,
        data: Value,
        expected_version: u64,
        change_id: Option<ChangeId>,
    ) -> Result<u64, WriteError> {
        if !data.is_object() {
            return Err(WriteError::Invalid("data must be a JSON object".into()));
        }
        let mut inner = self.lock();
        if let Some(version) = change_id.and_then(|c| inner.applied.get(&c).copied()) {
            return Ok(version);
        }

        let key = (collection.to_string(), id);
        let current = inner.records.get(&key);
        let current_version = current.map_or(0, |r| r.version);
        if current_version != expected_version {
            return Err(WriteError::VersionMismatch(current.cloned()));
        }

        let version = current_version + 1;
        inner.records.insert(key, RemoteRecord { id, version, data });
        if let Some(change_id) = change_id {
            inner.applied.insert(change_id, version);
        }
        Ok(version)
    }

    /// Removes the record if it is at `expected_version`.
    pub fn delete(
        &self,
        collection: &str,
        id: EntityId,
        expected_version: u64,
        change_id: Option<ChangeId>,
    ) -> Result<u64, WriteError> {
        let mut inner = self.lock();
        if let Some(version) = change_id.and_then(|c| inner.applied.get(&c).copied()) {
            return Ok(version);
        }

        let key = (collection.to_string(), id);
        let current = inner.records.get(&key).ok_or(WriteError::NotFound)?;
        if current.version != expected_version {
            return Err(WriteError::VersionMismatch(Some(current.clone())));
        }

        let version = current.version + 1;
        inner.records.remove(&key);
        if let Some(change_id) = change_id {
            inner.applied.insert(change_id, version);
        }
        Ok(version)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PutBody {
    pub data: Value,
    pub expected_version: u64,
    #[serde(default)]
    pub change_id: Option<ChangeId>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteParams {
    pub expected_version: u64,
    #[serde(default)]
    pub change_id: Option<ChangeId>,
}

impl IntoResponse for WriteError {
    fn into_response(self) -> Response {
        match self {
            WriteError::VersionMismatch(current) => (StatusCode::CONFLICT, Json(current)).into_response(),
            WriteError::NotFound => (StatusCode::NOT_FOUND, Json(json!({"error": "not found"}))).into_response(),
            WriteError::Invalid(msg) => {
                (StatusCode::UNPROCESSABLE_ENTITY, Json(json!({"error": msg}))).into_response()
            }
        }
    }
}

async fn health_handler(State(store): State<RemoteStore>) -> Json<Value> {
    Json(json!({"status": "ok", "records": store.len()}))
}

async fn list_handler(
    State(store): State<RemoteStore>,
    Path(collection): Path<String>,
) -> Json<Vec<RemoteRecord>> {
    Json(store.list(&collection))
}

async fn get_handler(
    State(store): State<RemoteStore>,
    Path((collection, id)): Path<(String, EntityId)>,
) -> Response {
    match store.get(&collection, &id) {
        Some(record) => Json(record).into_response(),
        None => WriteError::NotFound.into_response(),
    }
}

async fn put_handler(
    State(store): State<RemoteStore>,
    Path((collection, id)): Path<(String, EntityId)>,
    Json(body): Json<PutBody>,
) -> Result<Json<PushAck>, WriteError> {
    let result = store.put(&collection, id, body.data, body.expected_version, body.change_id);
    log_write("PUT", &collection, &id, body.expected_version, &result);
    result.map(|version| Json(PushAck { version }))
}

async fn delete_handler(
    State(store): State<RemoteStore>,
    Path((collection, id)): Path<(String, EntityId)>,
    Query(params): Query<DeleteParams>,
) -> Result<Json<PushAck>, WriteError> {
    let result = store.delete(&collection, id, params.expected_version, params.change_id);
    log_write("DELETE", &collection, &id, params.expected_version, &result);
    result.map(|version| Json(PushAck { version }))
}

fn log_write(method: &str, collection: &str, id: &EntityId, expected: u64, result: &Result<u64, WriteError>) {
    match result {
        Ok(version) => info!("{} {}/{} v{} -> v{}", method, collection, id, expected, version),
        Err(e) => debug!("{} {}/{} v{} refused: {:?}", method, collection, id, expected, e),
    }
}

/// Build the HTTP API router over `store`.
pub fn build_router(store: RemoteStore) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/{collection}", get(list_handler))
        .route(
            "/api/{collection}/{id}",
            get(get_handler).put(put_handler).delete(delete_handler),
        )
        .with_state(store)
}
