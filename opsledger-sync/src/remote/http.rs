//! REST remote authority.
//!
//! Paths are `{base_url}/api/{collection}/{id}`, where the collection comes
//! from the entity type's [`EntitySchema`](opsledger_model::EntitySchema).

use super::{PushAck, PushOp, PushRequest, RemoteAuthority, RemoteRecord};
use crate::error::{RemoteError, SyncError, SyncResult};
use async_trait::async_trait;
use opsledger_model::SchemaRegistry;
use opsledger_types::{ChangeId, EntityId};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Configuration for [`HttpRemote`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpRemoteConfig {
    /// Server root, e.g. `https://ops.example.com`.
    pub base_url: String,
    /// Per-request timeout (ms).
    pub timeout_ms: u64,
}

impl Default for HttpRemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            timeout_ms: 30_000,
        }
    }
}

#[derive(Serialize)]
struct PutBody<'a> {
    data: &'a Value,
    expected_version: u64,
    change_id: ChangeId,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// [`RemoteAuthority`] over JSON REST.
pub struct HttpRemote {
    config: HttpRemoteConfig,
    client: Client,
    schemas: SchemaRegistry,
}

impl HttpRemote {
    /// Creates a client. `schemas` maps entity types to REST collections.
    pub fn new(config: HttpRemoteConfig, schemas: SchemaRegistry) -> SyncResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| SyncError::Transport(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            config,
            client,
            schemas,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    fn record_url(&self, entity_type: &str, id: &EntityId) -> String {
        let collection = self.schemas.collection_for(entity_type);
        format!(
            "{}/api/{}/{}",
            self.config.base_url.trim_end_matches('/'),
            urlencoding::encode(&collection),
            id
        )
    }

    async fn read_ack(response: Response) -> Result<PushAck, RemoteError> {
        response
            .json::<PushAck>()
            .await
            .map_err(|e| RemoteError::Transport(format!("failed to parse ack: {e}")))
    }

    async fn read_mismatch(response: Response) -> RemoteError {
        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => return RemoteError::Transport(format!("failed to read conflict body: {e}")),
        };
        // Only an empty or null body means the remote no longer has the record.
        if body.iter().all(u8::is_ascii_whitespace) {
            return RemoteError::VersionMismatch { current: None };
        }
        match serde_json::from_slice::<Option<RemoteRecord>>(&body) {
            Ok(current) => RemoteError::VersionMismatch { current },
            Err(e) => RemoteError::Transport(format!("failed to parse conflict body: {e}")),
        }
    }

    async fn read_error(response: Response) -> RemoteError {
        let status = response.status();
        let message = match response.json::<ErrorBody>().await {
            Ok(body) => body.error,
            Err(_) => status.to_string(),
        };
        if status.is_server_error() {
            RemoteError::Transport(format!("server error {status}: {message}"))
        } else {
            RemoteError::Rejected(message)
        }
    }
}

#[async_trait]
impl RemoteAuthority for HttpRemote {
    async fn push(&self, request: PushRequest) -> Result<PushAck, RemoteError> {
        let url = self.record_url(&request.entity_type, &request.entity_id);
        debug!(
            "Pushing change {} to {} (expected v{})",
            request.change_id, url, request.expected_version
        );

        let response = match &request.op {
            PushOp::Upsert { data } => self
                .client
                .put(&url)
                .json(&PutBody {
                    data,
                    expected_version: request.expected_version,
                    change_id: request.change_id,
                })
                .send()
                .await,
            PushOp::Delete => self
                .client
                .delete(&url)
                .query(&[
                    ("expected_version", request.expected_version.to_string()),
                    ("change_id", request.change_id.to_string()),
                ])
                .send()
                .await,
        }
        .map_err(|e| RemoteError::Transport(format!("push failed: {e}")))?;

        match response.status() {
            s if s.is_success() => Self::read_ack(response).await,
            StatusCode::CONFLICT => Err(Self::read_mismatch(response).await),
            StatusCode::NOT_FOUND => Err(RemoteError::NotFound),
            _ => Err(Self::read_error(response).await),
        }
    }

    async fn fetch(&self, entity_type: &str, id: &EntityId) -> Result<Option<RemoteRecord>, RemoteError> {
        let url = self.record_url(entity_type, id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| RemoteError::Transport(format!("fetch failed: {e}")))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => response
                .json::<RemoteRecord>()
                .await
                .map(Some)
                .map_err(|e| RemoteError::Transport(format!("failed to parse record: {e}"))),
            _ => Err(Self::read_error(response).await),
        }
    }
}
