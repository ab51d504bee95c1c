//! Storage for tracked items and notification history.
//!
//! The traits define the abstract interface; `memory` is always available and
//! `persistent` (feature `persistent`) provides the durable backend.

mod memory;
#[cfg(feature = "persistent")]
pub mod persistent;
mod traits;

pub use memory::{InMemoryHistoryLedger, InMemoryItemStore, InMemoryStores};
#[cfg(feature = "persistent")]
pub use persistent::{open_database, PersistentConfig, PersistentStores};
pub use traits::{HistoryLedger, ItemStore, StorageError};
