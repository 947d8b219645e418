//! # Remote API Seam
//!
//! The abstract remote collaborator the sync engine talks to. The
//! concrete HTTP client lives outside this workspace and implements
//! [`RemoteApi`]; the engine only ever sees success/failure plus a JSON
//! payload.
//!
//! ## Wire Shape
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Remote Endpoints                                 │
//! │                                                                         │
//! │  BATCH CREATE (one call per entity type per pass)                      │
//! │  POST sync/customers        {"customers":   [{...}, {...}]}            │
//! │  POST sync/inventory        {"inventory":   [{...}]}                   │
//! │  POST sync/transactions     {"transactions":[{...}]}                   │
//! │       → 200 {"synced": [{"local_id": 7, "id": 4242}, ...]}             │
//! │                                                                         │
//! │  SINGLE UPDATE / DELETE (needs the entity's server id)                 │
//! │  PUT    customers/4242      {full snapshot}                            │
//! │  DELETE customers/4242                                                 │
//! │                                                                         │
//! │  PULL                                                                  │
//! │  GET customers?updated_after=2026-08-01T00:00:00Z                      │
//! │       → 200 {"customers": [{...}, ...]}                                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use millbook_core::EntityKind;

// =============================================================================
// Response / Failure
// =============================================================================

/// A completed remote call. `success` false with a status code means the
/// remote answered and said no; transport-level problems surface as
/// [`RemoteFailure`] instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteResponse {
    pub success: bool,
    pub status_code: u16,
    /// Response body, already parsed. `Value::Null` when the endpoint
    /// returns nothing.
    pub data: serde_json::Value,
    pub message: Option<String>,
}

impl RemoteResponse {
    /// A bare success with no body.
    pub fn ok() -> Self {
        RemoteResponse {
            success: true,
            status_code: 200,
            data: serde_json::Value::Null,
            message: None,
        }
    }

    /// A success carrying a body.
    pub fn ok_with(data: serde_json::Value) -> Self {
        RemoteResponse {
            success: true,
            status_code: 200,
            data,
            message: None,
        }
    }

    /// A remote-side rejection with a status code and message.
    pub fn rejected(status_code: u16, message: impl Into<String>) -> Self {
        RemoteResponse {
            success: false,
            status_code,
            data: serde_json::Value::Null,
            message: Some(message.into()),
        }
    }
}

/// Transport-level failure of a remote call.
#[derive(Debug, Clone, Error)]
pub enum RemoteFailure {
    /// No connectivity, DNS failure, connection refused.
    #[error("Network failure: {0}")]
    Network(String),

    /// The call ran out of time.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The session is invalid or expired.
    #[error("Authentication failure: {0}")]
    Auth(String),

    /// The remote rejected the payload itself.
    #[error("Validation failure: {0}")]
    Validation(String),

    /// The remote broke (5xx, unparsable response).
    #[error("Server failure: {0}")]
    Server(String),
}

// =============================================================================
// The Trait
// =============================================================================

/// The abstract remote collaborator.
///
/// Implementations own retry-free, single-shot semantics: the engine's
/// own backoff policy decides when to call again, so an implementation
/// must not retry internally.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn post(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<RemoteResponse, RemoteFailure>;

    async fn put(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<RemoteResponse, RemoteFailure>;

    async fn delete(&self, path: &str) -> Result<RemoteResponse, RemoteFailure>;

    async fn get(&self, path: &str) -> Result<RemoteResponse, RemoteFailure>;
}

// =============================================================================
// Batch Shapes
// =============================================================================

/// One acknowledged entity in a batch-create response: the device-local
/// id it was keyed by, and the server-assigned identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncedEntity {
    pub local_id: i64,
    pub id: i64,
}

/// The body of a batch-create response: `{"synced": [...]}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchSyncResponse {
    #[serde(default)]
    pub synced: Vec<SyncedEntity>,
}

/// The batch-create path for an entity kind.
pub fn batch_create_path(kind: EntityKind) -> String {
    format!("sync/{}", kind.collection())
}

/// The single-entity path for an entity with a known server id.
pub fn entity_path(kind: EntityKind, server_id: i64) -> String {
    format!("{}/{}", kind.collection(), server_id)
}

/// The pull path for changes after a cursor.
pub fn pull_path(kind: EntityKind, updated_after: &str) -> String {
    format!("{}?updated_after={}", kind.collection(), updated_after)
}
