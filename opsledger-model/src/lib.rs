//! Data model for OpsLedger.
//!
//! Defines the types every other crate in the workspace speaks:
//! - [`Entity`]: a business record (id, type, JSON fields, confirmed version)
//! - [`Change`] / [`ChangeOp`]: one mutation intent in the change log
//! - [`ChangeState`]: the per-mutation sync state machine
//! - [`EntitySchema`] / [`SchemaRegistry`]: field rules used to validate
//!   mutations before they are logged
//! - [`replay`]: folds a confirmed base and pending changes into the
//!   materialized entity state
//! - Typed views over the JSON payload: [`InventoryItem`], [`Appointment`]

mod change;
mod entity;
mod error;
mod handler;
pub mod records;
mod replay;
mod schema;

pub use change::{Change, ChangeOp, ChangeState};
pub use entity::{Entity, EntitySyncState};
pub use error::{ModelError, ModelResult};
pub use handler::DomainHandler;
pub use records::{Appointment, AppointmentStatus, InventoryItem, APPOINTMENT, INVENTORY_ITEM};
pub use replay::{apply_op, replay};
pub use schema::{EntitySchema, FieldSpec, FieldType, SchemaRegistry};
