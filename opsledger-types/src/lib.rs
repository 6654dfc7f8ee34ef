//! Core type definitions for OpsLedger.
//!
//! This crate defines the small, domain-agnostic types shared by every
//! other crate in the workspace:
//! - Entity and change identifiers (UUID v7)
//! - Hybrid Logical Clock timestamps and a monotonic local clock
//!
//! Business records (inventory items, appointments) live in
//! `opsledger-model`, not here.

mod ids;
mod timestamp;

pub use ids::{ChangeId, EntityId};
pub use timestamp::{HybridClock, HybridTimestamp};

