//! In-memory storage backend.
//!
//! This module provides thread-safe in-memory implementations of the storage traits.
//! It is intended for embedded usage, tests, and as a reference implementation.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, RwLock};

use crate::history::{HistoryKey, HistoryRecord};
use crate::item::{ItemId, TrackedItem};
use crate::storage::traits::{HistoryLedger, ItemStore, StorageError};

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

#[derive(Debug, Default)]
struct ItemState {
    by_id: HashMap<ItemId, TrackedItem>,
    by_group: HashMap<String, BTreeSet<ItemId>>,
}

impl ItemState {
    fn upsert(&mut self, item: TrackedItem) {
        if let Some(prev) = self.by_id.get(&item.id) {
            if prev.group != item.group {
                if let Some(set) = self.by_group.get_mut(&prev.group) {
                    set.remove(&item.id);
                    if set.is_empty() {
                        self.by_group.remove(&prev.group);
                    }
                }
            }
        }
        self.by_group
            .entry(item.group.clone())
            .or_default()
            .insert(item.id.clone());
        self.by_id.insert(item.id.clone(), item);
    }
}

/// Thread-safe in-memory item store.
#[derive(Debug, Default)]
pub struct InMemoryItemStore {
    state: RwLock<ItemState>,
}

impl InMemoryItemStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ItemStore for InMemoryItemStore {
    fn upsert(&self, item: TrackedItem) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("item.upsert"))?;
        state.upsert(item);
        Ok(())
    }

    fn get(&self, id: &ItemId) -> Result<Option<TrackedItem>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("item.get"))?;
        Ok(state.by_id.get(id).cloned())
    }

    fn ids_for_group(&self, group: &str) -> Result<Vec<ItemId>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("item.ids_for_group"))?;
        Ok(state
            .by_group
            .get(group)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn len(&self) -> Result<usize, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("item.len"))?;
        Ok(state.by_id.len())
    }
}

#[derive(Debug, Default)]
struct LedgerState {
    keys: HashSet<HistoryKey>,
    by_item: HashMap<ItemId, Vec<HistoryRecord>>,
    count: usize,
}

impl LedgerState {
    fn insert(&mut self, record: HistoryRecord) -> Result<(), StorageError> {
        let key = record.key();
        if self.keys.contains(&key) {
            return Err(StorageError::DuplicateAction(key));
        }
        self.keys.insert(key);
        self.by_item.entry(record.item_id.clone()).or_default().push(record);
        self.count += 1;
        Ok(())
    }
}

/// Thread-safe in-memory history ledger.
#[derive(Debug, Default)]
pub struct InMemoryHistoryLedger {
    state: RwLock<LedgerState>,
}

impl InMemoryHistoryLedger {
    /// Create a new empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl HistoryLedger for InMemoryHistoryLedger {
    fn has(&self, key: &HistoryKey) -> Result<bool, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("history.has"))?;
        Ok(state.keys.contains(key))
    }

    fn record(&self, record: HistoryRecord) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("history.record"))?;
        state.insert(record)
    }

    fn records_for(&self, item_id: &ItemId) -> Result<Vec<HistoryRecord>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("history.records_for"))?;
        Ok(state.by_item.get(item_id).cloned().unwrap_or_default())
    }

    fn len(&self) -> Result<usize, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("history.len"))?;
        Ok(state.count)
    }
}

/// Convenience bundle of in-memory stores, shareable with an orchestrator.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStores {
    /// Tracked items.
    pub items: Arc<InMemoryItemStore>,
    /// Notification history.
    pub history: Arc<InMemoryHistoryLedger>,
}

impl InMemoryStores {
    /// Create empty stores.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}
