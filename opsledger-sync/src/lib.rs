//! Sync engine for OpsLedger.
//!
//! Reconciles the local [`ChangeLog`](opsledger_storage::ChangeLog) with a
//! [`RemoteAuthority`] that owns the canonical version of every entity.
//!
//! # Sync pass
//!
//! 1. **Lanes**: pending changes are grouped per entity in append order.
//!    Lanes run concurrently; changes inside a lane run one at a time.
//! 2. **Push**: each change is sent as the entity's post-change state,
//!    computed from its last confirmed base, guarded by the confirmed
//!    version (`expected_version`).
//! 3. **Reconcile**: on a version mismatch, deltas and writes to fields the
//!    remote did not touch are rebased onto the remote record and retried.
//!    Competing writes to the same field become a [`Conflict`] that waits
//!    for [`SyncEngine::resolve_conflict`].
//! 4. **Report**: outcomes are collected into a [`SyncReport`] instead of
//!    failing the whole pass.
//!
//! # Example
//!
//! ```
//! use opsledger_sync::{MemoryRemote, SyncConfig, SyncEngine};
//! use std::sync::Arc;
//!
//! let remote = Arc::new(MemoryRemote::new());
//! let engine = SyncEngine::new(SyncConfig::default(), remote);
//! assert_eq!(engine.generation(), 0);
//! ```

mod config;
mod conflict;
mod engine;
mod error;
pub mod remote;
mod report;

pub use config::{RetryPolicy, SyncConfig};
pub use conflict::{Conflict, ConflictStore, FieldConflict, Resolution};
pub use engine::SyncEngine;
pub use error::{RemoteError, SyncError, SyncResult};
pub use remote::{
    HttpRemote, HttpRemoteConfig, MemoryRemote, PushAck, PushOp, PushRequest, RemoteAuthority,
    RemoteRecord,
};
pub use report::{ChangeFailure, SyncReport};
