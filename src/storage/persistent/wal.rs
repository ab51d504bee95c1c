//! Write-ahead log for the item mirror and the ledger.
//!
//! The log is the only on-disk structure: every mutation is appended before
//! it becomes visible in memory, and the in-memory indexes are rebuilt from it
//! on open.
//!
//! # File Format
//! ```text
//! [MAGIC: 4 bytes][VERSION: 1 byte]
//! [ENTRY 1: codec frame of WalEntry]
//! [ENTRY 2: codec frame of WalEntry]
//! ...
//! ```
//!
//! A crash during an append leaves at most one torn frame at the tail.
//! `open` cuts the file back to the last complete frame.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Error as IoError, ErrorKind, Result as IoResult, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::history::HistoryRecord;
use crate::item::TrackedItem;

use super::codec;

/// A single entry in the write-ahead log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalEntry {
    /// Monotonically increasing sequence number.
    pub sequence: u64,
    /// When this entry was written.
    pub timestamp: DateTime<Utc>,
    /// The mutation being logged.
    pub kind: WalEntryKind,
}

/// The type of WAL entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum WalEntryKind {
    /// Insert or replace a tracked item row.
    ItemUpsert(TrackedItem),
    /// Append a ledger record.
    HistoryInsert(HistoryRecord),
}

fn poisoned() -> IoError {
    IoError::new(ErrorKind::Other, "poisoned lock: wal")
}

struct WalState {
    writer: BufWriter<File>,
    sequence: u64,
}

/// Append-only write-ahead log.
///
/// Thread-safe via internal mutex.
pub struct WriteAheadLog {
    path: PathBuf,
    state: Mutex<WalState>,
    sync_on_write: bool,
}

/// Outcome of scanning an existing log.
struct ScanResult {
    last_sequence: u64,
    valid_len: u64,
    torn_tail: bool,
}

impl WriteAheadLog {
    /// Open or create a log file.
    ///
    /// A torn final frame is truncated away; any other corruption is an error.
    pub fn open(path: &Path, sync_on_write: bool) -> IoResult<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let sequence = if file.metadata()?.len() < codec::HEADER_LEN {
            file.set_len(0)?;
            codec::write_header(&mut file)?;
            file.sync_all()?;
            0
        } else {
            let scan = Self::scan(path)?;
            if scan.torn_tail {
                warn!(
                    path = %path.display(),
                    valid_len = scan.valid_len,
                    "WAL: truncating torn tail entry"
                );
                file.set_len(scan.valid_len)?;
                file.sync_all()?;
            }
            scan.last_sequence
        };

        file.seek(SeekFrom::End(0))?;

        Ok(Self {
            path: path.to_path_buf(),
            state: Mutex::new(WalState {
                writer: BufWriter::new(file),
                sequence,
            }),
            sync_on_write,
        })
    }

    /// Append an entry to the log.
    ///
    /// Returns the sequence number assigned to this entry.
    pub fn append(&self, kind: WalEntryKind) -> IoResult<u64> {
        let mut state = self.state.lock().map_err(|_| poisoned())?;

        let sequence = state.sequence + 1;
        let entry = WalEntry {
            sequence,
            timestamp: Utc::now(),
            kind,
        };
        let encoded = codec::encode(&entry)?;

        state.writer.write_all(&encoded)?;
        state.writer.flush()?;
        if self.sync_on_write {
            state.writer.get_ref().sync_data()?;
        }

        state.sequence = sequence;
        Ok(sequence)
    }

    /// Flush buffered writes and fsync the file.
    pub fn sync(&self) -> IoResult<()> {
        let mut state = self.state.lock().map_err(|_| poisoned())?;
        state.writer.flush()?;
        state.writer.get_ref().sync_all()
    }

    /// Iterate over all entries in the log.
    pub fn iter(&self) -> IoResult<WalIterator> {
        WalIterator::new(&self.path)
    }

    /// Get the last assigned sequence number.
    pub fn current_sequence(&self) -> IoResult<u64> {
        Ok(self.state.lock().map_err(|_| poisoned())?.sequence)
    }

    /// Get the log file size in bytes.
    pub fn size_bytes(&self) -> IoResult<u64> {
        Ok(std::fs::metadata(&self.path)?.len())
    }

    fn scan(path: &Path) -> IoResult<ScanResult> {
        let mut iter = WalIterator::new(path)?;
        let mut last_sequence = 0;
        let mut valid_len = codec::HEADER_LEN;

        loop {
            match iter.next_entry() {
                Ok(Some(entry)) => {
                    last_sequence = entry.sequence;
                    valid_len = iter.position()?;
                }
                Ok(None) => {
                    return Ok(ScanResult {
                        last_sequence,
                        valid_len,
                        torn_tail: false,
                    });
                }
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                    return Ok(ScanResult {
                        last_sequence,
                        valid_len,
                        torn_tail: true,
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Iterator over log entries.
///
/// Stops cleanly at the end of the file and at a torn final frame.
pub struct WalIterator {
    reader: BufReader<File>,
}

impl WalIterator {
    fn new(path: &Path) -> IoResult<Self> {
        let mut reader = BufReader::new(File::open(path)?);
        let version = codec::read_header(&mut reader)?;
        if version != codec::CODEC_VERSION {
            return Err(IoError::new(
                ErrorKind::InvalidData,
                format!("unsupported WAL version: {version}"),
            ));
        }
        Ok(Self { reader })
    }

    fn next_entry(&mut self) -> IoResult<Option<WalEntry>> {
        codec::decode(&mut self.reader)
    }

    fn position(&mut self) -> IoResult<u64> {
        self.reader.stream_position()
    }
}

impl Iterator for WalIterator {
    type Item = IoResult<WalEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_entry() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => None,
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => None,
            Err(e) => Some(Err(e)),
        }
    }
}
