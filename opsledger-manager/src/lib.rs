//! OpsLedger data manager.
//!
//! [`DataManager`] is the service object the application talks to. It owns
//! the local store, the change log, open conflicts and the sync engine, and
//! exposes:
//!
//! - a mutation API that validates, applies locally, appends to the change
//!   log and persists before returning
//! - `sync()`, gated by the connectivity flag, which reconciles the log with
//!   the remote authority and reports per-change outcomes
//! - the read-only query facade (search, statistics, overlaps)
//! - typed publish/subscribe of [`ManagerEvent`]s
//!
//! ```ignore
//! let manager = DataManager::open(ManagerConfig::default(), remote)?;
//! manager.init().await?;
//! let item = manager.add_item(&InventoryItem::new("A1", "Shampoo", 10)).await?;
//! manager.adjust_stock(&item.id, -6).await?;
//! manager.set_online(true);
//! let report = manager.sync().await?;
//! ```

mod config;
mod error;
mod events;
mod manager;

pub use config::{ManagerConfig, StorageConfig};
pub use error::{ManagerError, ManagerResult};
pub use events::{ManagerEvent, Subscription};
pub use manager::DataManager;

pub use opsledger_model::{Appointment, AppointmentStatus, Entity, InventoryItem};
pub use opsledger_query::{EntityFilter, SearchOptions, SearchResult, Statistics};
pub use opsledger_sync::{Conflict, Resolution, SyncReport};
