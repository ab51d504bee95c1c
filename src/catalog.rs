//! Catalog retrieval seam.
//!
//! The engine never talks to a provider directly. It consumes a
//! `CatalogSource`, which offers two calls: a lazy, paginated listing of a
//! source's most recent items, and a batch statistics lookup by id.
//!
//! Providers cap batch sizes and silently omit ids that became private or
//! were deleted. `StatsBatch::stats_for` turns an omitted id into zero
//! statistics instead of failing the batch.

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CatalogError;
use crate::item::ItemId;

/// Largest id batch a provider accepts per request.
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// Hard cap on items visited by a full scan.
pub const DEFAULT_FULL_SCAN_CAP: usize = 2000;

/// Current statistics for one item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemStats {
    /// Metric value (view count).
    pub value: u64,
    /// Duration in seconds.
    pub duration_secs: u64,
    /// Latest title, when the provider returns one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// One item yielded by a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Catalog identifier.
    pub id: ItemId,
    /// Title at listing time.
    pub title: String,
    /// Statistics fetched alongside the listing page.
    pub stats: ItemStats,
    /// Publication time, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
}

/// Lazy listing of catalog entries.
pub type Listing<'a> = Box<dyn Iterator<Item = Result<CatalogEntry, CatalogError>> + 'a>;

/// Retrieval collaborator.
pub trait CatalogSource: Send + Sync {
    /// Statistics for the given ids. Ids the provider does not return are
    /// simply absent from the map.
    fn fetch_batch(&self, ids: &[ItemId]) -> Result<HashMap<ItemId, ItemStats>, CatalogError>;

    /// Most recent items of `source_id`, newest first.
    ///
    /// Yields at most `limit` entries, or, when `full_scan` is set, the whole
    /// catalog up to the implementation's safety cap.
    fn list_recent(&self, source_id: &str, limit: usize, full_scan: bool) -> Result<Listing<'_>, CatalogError>;
}

/// How many entries a listing may yield.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListingBounds {
    /// Upper bound on yielded entries.
    pub max_items: usize,
    /// Whether the bound is the full-scan safety cap.
    pub full_scan: bool,
}

impl ListingBounds {
    /// Bounds for a recent (`limit`) or full (`cap`) scan.
    #[must_use]
    pub const fn for_scan(limit: usize, full_scan: bool, cap: usize) -> Self {
        Self {
            max_items: if full_scan { cap } else { limit },
            full_scan,
        }
    }
}

/// One provider page.
#[derive(Debug, Clone, Default)]
pub struct Page {
    /// Entries on this page.
    pub entries: Vec<CatalogEntry>,
    /// Token for the following page, if any.
    pub next_token: Option<String>,
}

/// Iterator adapter over a page-fetching closure.
///
/// Pages are requested only as entries are consumed. Iteration ends at the
/// first empty page, when no continuation token is returned, or when the
/// bound is reached. A page error is yielded once and ends the listing.
pub struct PagedListing<F> {
    fetch: F,
    bounds: ListingBounds,
    buffer: VecDeque<CatalogEntry>,
    token: Option<String>,
    yielded: usize,
    exhausted: bool,
}

impl<F> PagedListing<F>
where
    F: FnMut(Option<&str>) -> Result<Page, CatalogError>,
{
    /// Creates a listing starting at the first page.
    pub fn new(fetch: F, bounds: ListingBounds) -> Self {
        Self {
            fetch,
            bounds,
            buffer: VecDeque::new(),
            token: None,
            yielded: 0,
            exhausted: false,
        }
    }
}

impl<F> Iterator for PagedListing<F>
where
    F: FnMut(Option<&str>) -> Result<Page, CatalogError>,
{
    type Item = Result<CatalogEntry, CatalogError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.yielded >= self.bounds.max_items {
            if self.bounds.full_scan && !self.exhausted {
                tracing::warn!(cap = self.bounds.max_items, "full scan safety cap reached, stopping listing");
                self.exhausted = true;
            }
            return None;
        }

        if self.buffer.is_empty() {
            if self.exhausted {
                return None;
            }
            match (self.fetch)(self.token.as_deref()) {
                Ok(page) => {
                    self.token = page.next_token;
                    if self.token.is_none() || page.entries.is_empty() {
                        self.exhausted = true;
                    }
                    self.buffer.extend(page.entries);
                }
                Err(e) => {
                    self.exhausted = true;
                    return Some(Err(e));
                }
            }
        }

        let entry = self.buffer.pop_front()?;
        self.yielded += 1;
        Some(Ok(entry))
    }
}

/// Result of one chunked statistics lookup.
#[derive(Debug)]
pub struct StatsBatch {
    /// Ids requested in this chunk.
    pub ids: Vec<ItemId>,
    /// Provider response, or the error that lost this chunk.
    pub outcome: Result<HashMap<ItemId, ItemStats>, CatalogError>,
}

impl StatsBatch {
    /// Statistics for `id`, zero when the provider omitted it.
    #[must_use]
    pub fn stats_for(&self, id: &ItemId) -> ItemStats {
        self.outcome
            .as_ref()
            .ok()
            .and_then(|map| map.get(id).cloned())
            .unwrap_or_default()
    }
}

/// Looks up `ids` sequentially in chunks of at most `batch_size`.
///
/// Each chunk is requested only when the iterator reaches it.
pub fn fetch_in_batches<'a>(
    source: &'a dyn CatalogSource,
    ids: &'a [ItemId],
    batch_size: usize,
) -> impl Iterator<Item = StatsBatch> + 'a {
    ids.chunks(batch_size.max(1)).map(move |chunk| StatsBatch {
        ids: chunk.to_vec(),
        outcome: source.fetch_batch(chunk),
    })
}

/// Catalog backed by a JSON snapshot file.
///
/// ```json
/// { "sources": { "UC123": [ { "id": "v1", "title": "Song", "value": 1200000,
///   "duration_secs": 215, "published_at": "2024-05-01T00:00:00Z" } ] } }
/// ```
///
/// Useful for dry runs and for feeding the engine from an external fetcher.
#[derive(Debug, Clone, Default)]
pub struct SnapshotCatalog {
    sources: HashMap<String, Vec<CatalogEntry>>,
    page_size: usize,
    full_scan_cap: usize,
}

#[derive(Debug, Deserialize)]
struct SnapshotFile {
    #[serde(default)]
    sources: HashMap<String, Vec<SnapshotItem>>,
}

#[derive(Debug, Deserialize)]
struct SnapshotItem {
    id: ItemId,
    title: String,
    #[serde(default)]
    value: u64,
    #[serde(default)]
    duration_secs: u64,
    #[serde(default)]
    published_at: Option<DateTime<Utc>>,
}

impl From<SnapshotItem> for CatalogEntry {
    fn from(item: SnapshotItem) -> Self {
        Self {
            stats: ItemStats {
                value: item.value,
                duration_secs: item.duration_secs,
                title: Some(item.title.clone()),
            },
            id: item.id,
            title: item.title,
            published_at: item.published_at,
        }
    }
}

impl SnapshotCatalog {
    /// Creates a catalog from in-memory entries, keyed by source id.
    #[must_use]
    pub fn from_entries(sources: HashMap<String, Vec<CatalogEntry>>) -> Self {
        let mut catalog = Self {
            sources,
            page_size: DEFAULT_BATCH_SIZE,
            full_scan_cap: DEFAULT_FULL_SCAN_CAP,
        };
        for entries in catalog.sources.values_mut() {
            // Newest first; undated entries last.
            entries.sort_by(|a, b| b.published_at.cmp(&a.published_at));
        }
        catalog
    }

    /// Parses a snapshot document.
    pub fn from_json(json: &str) -> Result<Self, CatalogError> {
        let file: SnapshotFile = serde_json::from_str(json).map_err(|e| CatalogError::Decode {
            message: e.to_string(),
        })?;
        Ok(Self::from_entries(
            file.sources
                .into_iter()
                .map(|(source, items)| (source, items.into_iter().map(CatalogEntry::from).collect()))
                .collect(),
        ))
    }

    /// Loads a snapshot file.
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let json = fs::read_to_string(path).map_err(|e| CatalogError::Request {
            message: format!("failed to read snapshot {}: {e}", path.display()),
        })?;
        Self::from_json(&json)
    }

    /// Overrides the safety cap applied to full scans.
    #[must_use]
    pub fn with_full_scan_cap(mut self, cap: usize) -> Self {
        self.full_scan_cap = cap;
        self
    }

    /// Overrides the listing page size.
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }
}

impl CatalogSource for SnapshotCatalog {
    fn fetch_batch(&self, ids: &[ItemId]) -> Result<HashMap<ItemId, ItemStats>, CatalogError> {
        if ids.len() > DEFAULT_BATCH_SIZE {
            return Err(CatalogError::request(format!(
                "batch of {} ids exceeds provider limit {DEFAULT_BATCH_SIZE}",
                ids.len()
            )));
        }
        let mut found = HashMap::with_capacity(ids.len());
        for entries in self.sources.values() {
            for entry in entries.iter().filter(|e| ids.contains(&e.id)) {
                found.insert(entry.id.clone(), entry.stats.clone());
            }
        }
        Ok(found)
    }

    fn list_recent(&self, source_id: &str, limit: usize, full_scan: bool) -> Result<Listing<'_>, CatalogError> {
        let entries = self
            .sources
            .get(source_id)
            .ok_or_else(|| CatalogError::UnknownSource {
                source_id: source_id.to_string(),
            })?;
        let page_size = self.page_size;

        let fetch = move |token: Option<&str>| -> Result<Page, CatalogError> {
            let offset = match token {
                Some(t) => t.parse::<usize>().map_err(|_| CatalogError::Decode {
                    message: format!("invalid page token: {t}"),
                })?,
                None => 0,
            };
            let end = (offset + page_size).min(entries.len());
            let page_entries = entries.get(offset..end).map(<[CatalogEntry]>::to_vec).unwrap_or_default();
            Ok(Page {
                entries: page_entries,
                next_token: (end < entries.len()).then(|| end.to_string()),
            })
        };

        let bounds = ListingBounds::for_scan(limit, full_scan, self.full_scan_cap);
        Ok(Box::new(PagedListing::new(fetch, bounds)))
    }
}
