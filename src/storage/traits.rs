//! Abstract storage traits for milestone-watch.
//!
//! These traits define the contract that storage backends must implement.
//! By using traits, we enable:
//! - In-memory backends for testing and embedded use
//! - Persistent backends for production
//!
//! The history uniqueness guarantee lives here, in the backend: `record`
//! refuses a duplicate triple under the backend's own write lock, so callers
//! that skip or race the `has` check still cannot notify twice.

use thiserror::Error;

use crate::history::{HistoryKey, HistoryRecord};
use crate::item::{ItemId, TrackedItem};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The `(item, action, milestone)` triple is already recorded.
    #[error("Action already recorded: {0}")]
    DuplicateAction(HistoryKey),

    /// Backend error.
    #[error("Storage backend error: {0}")]
    BackendError(String),
}

impl StorageError {
    /// Returns true for the duplicate-action conflict.
    #[must_use]
    pub const fn is_duplicate(&self) -> bool {
        matches!(self, Self::DuplicateAction(_))
    }
}

/// Storage trait for the tracked-item mirror.
pub trait ItemStore: Send + Sync {
    /// Insert or replace the row for `item.id`.
    ///
    /// Durable backends may skip the write when the stored row already has
    /// the same observation (see [`TrackedItem::same_observation`]).
    fn upsert(&self, item: TrackedItem) -> Result<(), StorageError>;

    /// Get an item by ID.
    fn get(&self, id: &ItemId) -> Result<Option<TrackedItem>, StorageError>;

    /// All item IDs recorded under a group label, sorted.
    fn ids_for_group(&self, group: &str) -> Result<Vec<ItemId>, StorageError>;

    /// Number of rows.
    fn len(&self) -> Result<usize, StorageError>;

    /// Returns true when the store holds no rows.
    fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len()? == 0)
    }
}

/// Append-only notification ledger.
///
/// # Invariant
/// For all time, at most one record exists per `HistoryKey`.
pub trait HistoryLedger: Send + Sync {
    /// Returns true if this exact action has been recorded.
    fn has(&self, key: &HistoryKey) -> Result<bool, StorageError>;

    /// Append a record.
    ///
    /// # Errors
    /// - `DuplicateAction`: the record's key is already present; nothing is written
    /// - `BackendError`: the write could not be made durable
    fn record(&self, record: HistoryRecord) -> Result<(), StorageError>;

    /// All records for an item, in insertion order.
    fn records_for(&self, item_id: &ItemId) -> Result<Vec<HistoryRecord>, StorageError>;

    /// Number of records.
    fn len(&self) -> Result<usize, StorageError>;

    /// Returns true when nothing has been recorded.
    fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len()? == 0)
    }

    /// Close the current write scope, making every prior record durable.
    ///
    /// Backends without buffering keep the default no-op.
    fn sync(&self) -> Result<(), StorageError> {
        Ok(())
    }
}
