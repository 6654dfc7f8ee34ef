//! Query facade for OpsLedger.
//!
//! Read-only access to the local store for UI consumers: filtered and
//! paginated search, aggregate statistics, and advisory appointment
//! overlap detection. Every call returns owned snapshots and never touches
//! the change log's state.

mod facade;
mod filter;
mod overlap;
mod search;
mod stats;

pub use facade::QueryFacade;
pub use filter::{DateRange, EntityFilter};
pub use overlap::{find_overlaps, AppointmentOverlap};
pub use search::{SearchOptions, SearchResult, SortDirection, SortSpec};
pub use stats::{Statistics, SyncStateCounts};
