//! Persistent store implementations.
//!
//! Each store keeps an in-memory index for reads and appends every mutation
//! to the shared write-ahead log before applying it. Uniqueness of ledger
//! triples is checked under the ledger's write lock, ahead of the log append,
//! so a rejected duplicate never reaches disk.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use tracing::{debug, info};

use crate::error::WatchError;
use crate::history::{HistoryKey, HistoryRecord};
use crate::item::{ItemId, TrackedItem};
use crate::storage::traits::{HistoryLedger, ItemStore, StorageError};

use super::file_lock::DirLock;
use super::wal::{WalEntryKind, WriteAheadLog};
use super::PersistentConfig;

/// File name of the log inside the data directory.
pub const WAL_FILE_NAME: &str = "ledger.wal";

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

fn wal_err(e: &std::io::Error) -> StorageError {
    StorageError::BackendError(format!("WAL write failed: {e}"))
}

fn open_err(what: &str, e: impl std::fmt::Display) -> WatchError {
    WatchError::Storage(StorageError::BackendError(format!("{what}: {e}")))
}

/// Aggregate type containing all persistent stores.
///
/// This is the primary entry point for persistent storage. The directory
/// stays locked until this value is dropped.
pub struct PersistentStores {
    /// The database directory.
    pub dir: PathBuf,
    _lock: DirLock,
    wal: Arc<WriteAheadLog>,
    /// Tracked-item mirror.
    pub items: Arc<PersistentItemStore>,
    /// Notification ledger.
    pub history: Arc<PersistentHistoryLedger>,
}

/// Counts gathered while rebuilding indexes from the log.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplayStats {
    /// Item upserts applied.
    pub items: usize,
    /// Ledger records applied.
    pub history: usize,
    /// Ledger records skipped because their key was already present.
    pub duplicates: usize,
}

impl PersistentStores {
    /// Open or create a persistent database.
    pub fn open(dir: &Path, config: &PersistentConfig) -> Result<Self, WatchError> {
        fs::create_dir_all(dir).map_err(|e| open_err("failed to create data directory", e))?;

        let lock = DirLock::acquire(dir).map_err(|e| match DirLock::holder_pid(dir) {
            Ok(Some(pid)) if e.kind() == std::io::ErrorKind::WouldBlock => {
                open_err("failed to acquire lock", format!("{e} (held by pid {pid})"))
            }
            _ => open_err("failed to acquire lock", e),
        })?;

        let wal = Arc::new(
            WriteAheadLog::open(&dir.join(WAL_FILE_NAME), config.sync_on_write)
                .map_err(|e| open_err("failed to open WAL", e))?,
        );

        let stores = Self {
            dir: dir.to_path_buf(),
            _lock: lock,
            items: Arc::new(PersistentItemStore::new(Arc::clone(&wal))),
            history: Arc::new(PersistentHistoryLedger::new(Arc::clone(&wal))),
            wal,
        };

        let stats = stores.replay_wal()?;
        if stats.items + stats.history > 0 {
            info!(
                items = stats.items,
                history = stats.history,
                duplicates = stats.duplicates,
                "replayed WAL entries"
            );
        }

        Ok(stores)
    }

    /// Replay log entries to restore in-memory state.
    fn replay_wal(&self) -> Result<ReplayStats, WatchError> {
        let iter = self.wal.iter().map_err(|e| open_err("failed to iterate WAL", e))?;

        let mut stats = ReplayStats::default();
        let mut items = self.items.index.write().map_err(|_| lock_err("item.replay"))?;
        let mut ledger = self.history.index.write().map_err(|_| lock_err("history.replay"))?;

        for entry in iter {
            let entry = entry.map_err(|e| open_err("corrupted WAL entry", e))?;
            match entry.kind {
                WalEntryKind::ItemUpsert(item) => {
                    items.upsert(item);
                    stats.items += 1;
                }
                WalEntryKind::HistoryInsert(record) => {
                    if ledger.insert(record).is_ok() {
                        stats.history += 1;
                    } else {
                        stats.duplicates += 1;
                    }
                }
            }
        }

        Ok(stats)
    }

    /// Current log size in bytes.
    pub fn wal_size(&self) -> u64 {
        self.wal.size_bytes().unwrap_or(0)
    }

    /// Flush and fsync the log.
    pub fn sync(&self) -> Result<(), StorageError> {
        self.wal.sync().map_err(|e| wal_err(&e))
    }
}

// --- Item Store ---

#[derive(Debug, Default)]
struct ItemIndex {
    by_id: HashMap<ItemId, TrackedItem>,
    by_group: HashMap<String, BTreeSet<ItemId>>,
}

impl ItemIndex {
    fn upsert(&mut self, item: TrackedItem) {
        if let Some(prev) = self.by_id.get(&item.id) {
            if prev.group != item.group {
                if let Some(set) = self.by_group.get_mut(&prev.group) {
                    set.remove(&item.id);
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

/// Durable tracked-item store.
pub struct PersistentItemStore {
    wal: Arc<WriteAheadLog>,
    index: RwLock<ItemIndex>,
}

impl PersistentItemStore {
    fn new(wal: Arc<WriteAheadLog>) -> Self {
        Self {
            wal,
            index: RwLock::new(ItemIndex::default()),
        }
    }
}

impl ItemStore for PersistentItemStore {
    fn upsert(&self, item: TrackedItem) -> Result<(), StorageError> {
        let mut index = self.index.write().map_err(|_| lock_err("item.upsert"))?;
        // Unchanged rows are not re-logged; the log would otherwise grow by
        // one frame per item per run.
        if index.by_id.get(&item.id).is_some_and(|prev| prev.same_observation(&item)) {
            return Ok(());
        }
        self.wal
            .append(WalEntryKind::ItemUpsert(item.clone()))
            .map_err(|e| wal_err(&e))?;
        index.upsert(item);
        Ok(())
    }

    fn get(&self, id: &ItemId) -> Result<Option<TrackedItem>, StorageError> {
        let index = self.index.read().map_err(|_| lock_err("item.get"))?;
        Ok(index.by_id.get(id).cloned())
    }

    fn ids_for_group(&self, group: &str) -> Result<Vec<ItemId>, StorageError> {
        let index = self.index.read().map_err(|_| lock_err("item.ids_for_group"))?;
        Ok(index
            .by_group
            .get(group)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn len(&self) -> Result<usize, StorageError> {
        Ok(self.index.read().map_err(|_| lock_err("item.len"))?.by_id.len())
    }
}

// --- History Ledger ---

#[derive(Debug, Default)]
struct LedgerIndex {
    keys: HashSet<HistoryKey>,
    by_item: HashMap<ItemId, Vec<HistoryRecord>>,
    count: usize,
}

impl LedgerIndex {
    fn insert(&mut self, record: HistoryRecord) -> Result<(), StorageError> {
        let key = record.key();
        if !self.keys.insert(key.clone()) {
            return Err(StorageError::DuplicateAction(key));
        }
        self.by_item.entry(record.item_id.clone()).or_default().push(record);
        self.count += 1;
        Ok(())
    }
}

/// Durable notification ledger.
pub struct PersistentHistoryLedger {
    wal: Arc<WriteAheadLog>,
    index: RwLock<LedgerIndex>,
}

impl PersistentHistoryLedger {
    fn new(wal: Arc<WriteAheadLog>) -> Self {
        Self {
            wal,
            index: RwLock::new(LedgerIndex::default()),
        }
    }
}

impl HistoryLedger for PersistentHistoryLedger {
    fn has(&self, key: &HistoryKey) -> Result<bool, StorageError> {
        Ok(self.index.read().map_err(|_| lock_err("history.has"))?.keys.contains(key))
    }

    fn record(&self, record: HistoryRecord) -> Result<(), StorageError> {
        let mut index = self.index.write().map_err(|_| lock_err("history.record"))?;

        let key = record.key();
        if index.keys.contains(&key) {
            debug!(key = %key, "rejected duplicate ledger record");
            return Err(StorageError::DuplicateAction(key));
        }

        self.wal
            .append(WalEntryKind::HistoryInsert(record.clone()))
            .map_err(|e| wal_err(&e))?;
        index.insert(record)
    }

    fn records_for(&self, item_id: &ItemId) -> Result<Vec<HistoryRecord>, StorageError> {
        let index = self.index.read().map_err(|_| lock_err("history.records_for"))?;
        Ok(index.by_item.get(item_id).cloned().unwrap_or_default())
    }

    fn len(&self) -> Result<usize, StorageError> {
        Ok(self.index.read().map_err(|_| lock_err("history.len"))?.count)
    }

    fn sync(&self) -> Result<(), StorageError> {
        self.wal.sync().map_err(|e| wal_err(&e))
    }
}
