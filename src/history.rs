//! Notification history types.
//!
//! A `HistoryRecord` is written once per notification ever issued (or
//! baselined) and never changes afterwards. The `(item, action, milestone)`
//! triple, captured by `HistoryKey`, is unique for all time.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::item::ItemId;

const SUPPORT_PREFIX: &str = "support_";

/// Kind of notification recorded in the ledger.
///
/// Persisted as `achieved` or `support_<distance>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ActionType {
    /// The item passed a milestone.
    Achieved,
    /// The item is within `distance` of its next milestone.
    Support {
        /// Trigger tier (remaining distance) that fired.
        distance: u64,
    },
}

impl ActionType {
    /// Returns true for support actions.
    #[must_use]
    pub const fn is_support(&self) -> bool {
        matches!(self, Self::Support { .. })
    }
}

impl TryFrom<String> for ActionType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let value = value.trim();
        if value.eq_ignore_ascii_case("achieved") {
            return Ok(Self::Achieved);
        }
        if let Some(rest) = value.strip_prefix(SUPPORT_PREFIX) {
            let distance = rest
                .parse::<u64>()
                .map_err(|e| format!("invalid support distance '{rest}': {e}"))?;
            return Ok(Self::Support { distance });
        }
        Err(format!("unknown action type: {value}"))
    }
}

impl From<ActionType> for String {
    fn from(value: ActionType) -> Self {
        value.to_string()
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Achieved => f.write_str("achieved"),
            Self::Support { distance } => write!(f, "{SUPPORT_PREFIX}{distance}"),
        }
    }
}

/// Uniqueness key of a history record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HistoryKey {
    /// Item the action refers to.
    pub item_id: ItemId,
    /// Action kind.
    pub action: ActionType,
    /// Milestone value the action refers to (achieved value, or the upcoming
    /// milestone for support actions).
    pub milestone: u64,
}

impl HistoryKey {
    /// Creates a key.
    #[must_use]
    pub const fn new(item_id: ItemId, action: ActionType, milestone: u64) -> Self {
        Self {
            item_id,
            action,
            milestone,
        }
    }
}

impl fmt::Display for HistoryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.item_id, self.action, self.milestone)
    }
}

/// One ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// Item the action refers to.
    pub item_id: ItemId,
    /// Action kind.
    pub action: ActionType,
    /// Milestone value.
    pub milestone: u64,
    /// When the action was recorded.
    pub recorded_at: DateTime<Utc>,
}

impl HistoryRecord {
    /// Creates a record for `key` stamped with the current time.
    #[must_use]
    pub fn now(key: HistoryKey) -> Self {
        Self {
            item_id: key.item_id,
            action: key.action,
            milestone: key.milestone,
            recorded_at: Utc::now(),
        }
    }

    /// Returns the uniqueness key of this record.
    #[must_use]
    pub fn key(&self) -> HistoryKey {
        HistoryKey::new(self.item_id.clone(), self.action, self.milestone)
    }
}
