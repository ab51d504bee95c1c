//! Run modes and the notification budget.

use std::fmt;

use serde::{Deserialize, Serialize};

/// How a run traverses and acts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Recent listing plus backfill of every known item; budgeted dispatch.
    #[default]
    LiveRecent,
    /// Whole catalog up to the safety cap; budgeted dispatch, no backfill.
    LiveFullScan,
    /// Whole catalog; records baselines for every due action, sends nothing.
    InitSync,
}

impl RunMode {
    /// Picks the mode from CLI-style flags. `init` implies a full scan.
    #[must_use]
    pub const fn from_flags(full_scan: bool, init: bool) -> Self {
        match (init, full_scan) {
            (true, _) => Self::InitSync,
            (false, true) => Self::LiveFullScan,
            (false, false) => Self::LiveRecent,
        }
    }

    /// Whether pass (a) reads the whole catalog.
    #[must_use]
    pub const fn full_scan(self) -> bool {
        matches!(self, Self::LiveFullScan | Self::InitSync)
    }

    /// Whether due actions are dispatched.
    #[must_use]
    pub const fn dispatches(self) -> bool {
        !matches!(self, Self::InitSync)
    }

    /// Whether the backfill pass runs.
    #[must_use]
    pub const fn backfills(self) -> bool {
        matches!(self, Self::LiveRecent)
    }

    /// Stable name used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LiveRecent => "live_recent",
            Self::LiveFullScan => "live_full_scan",
            Self::InitSync => "init_sync",
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notification budget for one run, shared across targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Budget {
    limit: Option<usize>,
    used: usize,
}

impl Budget {
    /// Budget allowing `limit` dispatches.
    #[must_use]
    pub const fn limited(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            used: 0,
        }
    }

    /// Budget that never runs out.
    #[must_use]
    pub const fn unlimited() -> Self {
        Self { limit: None, used: 0 }
    }

    /// Budget for `mode`: InitSync is unlimited.
    #[must_use]
    pub const fn for_mode(mode: RunMode, max_posts_per_run: usize) -> Self {
        if mode.dispatches() {
            Self::limited(max_posts_per_run)
        } else {
            Self::unlimited()
        }
    }

    /// Whether another dispatch is allowed.
    #[must_use]
    pub const fn has_remaining(&self) -> bool {
        match self.limit {
            Some(limit) => self.used < limit,
            None => true,
        }
    }

    /// Counts one delivered dispatch.
    pub fn consume(&mut self) {
        self.used += 1;
    }

    /// Dispatches counted so far.
    #[must_use]
    pub const fn used(&self) -> usize {
        self.used
    }

    /// Dispatches left, `None` when unlimited.
    #[must_use]
    pub fn remaining(&self) -> Option<usize> {
        self.limit.map(|limit| limit.saturating_sub(self.used))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_from_flags() {
        assert_eq!(RunMode::from_flags(false, false), RunMode::LiveRecent);
        assert_eq!(RunMode::from_flags(true, false), RunMode::LiveFullScan);
        assert_eq!(RunMode::from_flags(false, true), RunMode::InitSync);
        assert!(RunMode::InitSync.full_scan());
        assert!(!RunMode::InitSync.backfills());
        assert!(!RunMode::LiveFullScan.backfills());
    }

    #[test]
    fn test_budget_exhausts() {
        let mut budget = Budget::for_mode(RunMode::LiveRecent, 2);
        assert!(budget.has_remaining());
        budget.consume();
        budget.consume();
        assert!(!budget.has_remaining());
        assert_eq!(budget.remaining(), Some(0));
        assert_eq!(budget.used(), 2);
    }

    #[test]
    fn test_zero_budget_never_dispatches() {
        assert!(!Budget::limited(0).has_remaining());
    }

    #[test]
    fn test_init_sync_budget_unlimited() {
        let mut budget = Budget::for_mode(RunMode::InitSync, 0);
        for _ in 0..1000 {
            budget.consume();
        }
        assert!(budget.has_remaining());
        assert_eq!(budget.remaining(), None);
    }
}
