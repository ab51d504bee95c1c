//! Persistent storage backend.
//!
//! This module provides durable, crash-safe storage with:
//! - A write-ahead log holding every item upsert and ledger record
//! - An exclusive directory lock enforcing a single writer
//! - CRC32 checksums for corruption detection
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                  PersistentStores                     │
//! ├──────────────────────────────────────────────────────┤
//! │  ┌────────────────────┐  ┌────────────────────────┐  │
//! │  │ PersistentItemStore│  │ PersistentHistoryLedger│  │
//! │  │ (in-memory index)  │  │ (unique key index)     │  │
//! │  └─────────┬──────────┘  └───────────┬────────────┘  │
//! │            └────────────┬────────────┘               │
//! │                         ↓                            │
//! │              ┌─────────────────────┐                 │
//! │              │ WriteAheadLog       │                 │
//! │              │ (append-only, CRC)  │                 │
//! │              └─────────────────────┘                 │
//! │              ┌─────────────────────┐                 │
//! │              │ DirLock (flock)     │                 │
//! │              └─────────────────────┘                 │
//! └──────────────────────────────────────────────────────┘
//! ```

mod codec;
mod file_lock;
mod stores;
mod wal;

pub use file_lock::DirLock;
pub use stores::{PersistentHistoryLedger, PersistentItemStore, PersistentStores, ReplayStats, WAL_FILE_NAME};
pub use wal::{WalEntry, WalEntryKind, WriteAheadLog};

use std::path::Path;

use crate::error::WatchError;

/// Configuration for persistent storage.
#[derive(Debug, Clone)]
pub struct PersistentConfig {
    /// Whether to fsync after every append (slower but safer).
    ///
    /// When false, durability is reached at each `HistoryLedger::sync` call,
    /// which the orchestrator issues at the end of every target.
    pub sync_on_write: bool,
}

impl Default for PersistentConfig {
    fn default() -> Self {
        Self {
            sync_on_write: true,
        }
    }
}

/// Open or create a persistent database at the given directory.
///
/// # Errors
/// - If the path cannot be created or accessed
/// - If another run holds the directory lock
/// - If the log contains a corrupted entry before its tail
///
/// # Example
/// ```rust,ignore
/// use milestone_watch::storage::persistent::open_database;
///
/// let stores = open_database("./ledger", None)?;
/// let orchestrator = RunOrchestrator::new(catalog, stores.items.clone(), stores.history.clone(), posters);
/// ```
pub fn open_database(
    path: impl AsRef<Path>,
    config: Option<PersistentConfig>,
) -> Result<PersistentStores, WatchError> {
    PersistentStores::open(path.as_ref(), &config.unwrap_or_default())
}
