//! Tracked item types.
//!
//! A tracked item is the local mirror of one catalog entry (a video, a track,
//! any object with a view counter). Rows are upserted on every poll and never
//! deleted by this crate.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque catalog identifier for an item.
///
/// The engine never interprets the contents; it is whatever the catalog
/// provider uses (for example a video id).
///
/// # Examples
///
/// ```
/// use milestone_watch::ItemId;
///
/// let id = ItemId::new("dQw4w9WgXcQ");
/// assert_eq!(id.as_str(), "dQw4w9WgXcQ");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(String);

impl ItemId {
    /// Wraps a provider identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ItemId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Mirror row for one observed catalog item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedItem {
    /// Catalog identifier (unique).
    pub id: ItemId,
    /// Latest observed title.
    pub title: String,
    /// Owner/group label of the target that tracks this item.
    pub group: String,
    /// Latest observed metric value.
    pub value: u64,
    /// When the row was last refreshed.
    pub last_updated: DateTime<Utc>,
}

impl TrackedItem {
    /// Creates a row stamped with the current time.
    #[must_use]
    pub fn observed(id: ItemId, title: impl Into<String>, group: impl Into<String>, value: u64) -> Self {
        Self {
            id,
            title: title.into(),
            group: group.into(),
            value,
            last_updated: Utc::now(),
        }
    }

    /// True when `other` carries the same title, group and value, ignoring
    /// the refresh timestamp.
    #[must_use]
    pub fn same_observation(&self, other: &Self) -> bool {
        self.id == other.id && self.value == other.value && self.title == other.title && self.group == other.group
    }
}
