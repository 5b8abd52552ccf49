//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `AccountSnapshotBuilder`: values the account in the quote currency

mod snapshot;

pub use snapshot::AccountSnapshotBuilder;
