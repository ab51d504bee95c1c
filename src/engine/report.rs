//! Run reports.

use std::fmt;
use std::ops::AddAssign;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::mode::RunMode;

/// Identifier of one orchestrator run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(uuid::Uuid);

impl RunId {
    /// Creates a new random run ID.
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-target counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    /// Entries read from the recent listing.
    pub listed: u64,
    /// Ids looked up during backfill.
    pub backfilled: u64,
    /// Items that passed the filter and were evaluated.
    pub eligible: u64,
    /// Items rejected by the filter.
    pub filtered: u64,
    /// Actions delivered by a poster.
    pub sent: u64,
    /// Actions delivered in simulation mode.
    pub simulated: u64,
    /// Actions whose dispatch failed; still pending.
    pub failed: u64,
    /// Actions skipped because the budget was spent; still pending.
    pub deferred: u64,
    /// Actions already present in the ledger.
    pub duplicates: u64,
    /// Actions recorded without dispatch (InitSync).
    pub baselines: u64,
    /// Listing pages or statistics batches lost to retrieval errors.
    pub failed_batches: u64,
}

impl Counters {
    /// Actions written to the ledger.
    #[must_use]
    pub const fn recorded(&self) -> u64 {
        self.sent + self.simulated + self.baselines
    }
}

impl AddAssign for Counters {
    fn add_assign(&mut self, rhs: Self) {
        self.listed += rhs.listed;
        self.backfilled += rhs.backfilled;
        self.eligible += rhs.eligible;
        self.filtered += rhs.filtered;
        self.sent += rhs.sent;
        self.simulated += rhs.simulated;
        self.failed += rhs.failed;
        self.deferred += rhs.deferred;
        self.duplicates += rhs.duplicates;
        self.baselines += rhs.baselines;
        self.failed_batches += rhs.failed_batches;
    }
}

/// Outcome of one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetReport {
    /// Target group label.
    pub group: String,
    /// Whether the target's account ran without a poster.
    pub simulation: bool,
    #[serde(flatten)]
    pub counters: Counters,
}

/// Outcome of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: RunId,
    pub mode: RunMode,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Dispatches counted against the budget.
    pub budget_used: usize,
    pub targets: Vec<TargetReport>,
}

impl RunReport {
    /// Counters summed over all targets.
    #[must_use]
    pub fn totals(&self) -> Counters {
        self.targets.iter().fold(Counters::default(), |mut acc, t| {
            acc += t.counters;
            acc
        })
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total = self.totals();
        writeln!(f, "run {} ({})", self.run_id, self.mode)?;
        for t in &self.targets {
            let c = &t.counters;
            writeln!(
                f,
                "  {}{}: listed={} backfilled={} eligible={} filtered={} sent={} simulated={} failed={} deferred={} duplicates={} baselines={} failed_batches={}",
                t.group,
                if t.simulation { " [simulation]" } else { "" },
                c.listed,
                c.backfilled,
                c.eligible,
                c.filtered,
                c.sent,
                c.simulated,
                c.failed,
                c.deferred,
                c.duplicates,
                c.baselines,
                c.failed_batches,
            )?;
        }
        write!(
            f,
            "  total: recorded={} failed={} deferred={}",
            total.recorded(),
            total.failed,
            total.deferred
        )
    }
}
