//! Item eligibility.
//!
//! Filtering happens before anything else touches an item: a rejected item is
//! neither upserted into the item store nor evaluated against the ledger.

/// Minimum duration, in seconds, when a target does not configure one.
/// Shorter items are short-form clips and are never tracked.
pub const DEFAULT_MIN_DURATION_SECS: u64 = 60;

/// Why an item was kept or dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterVerdict {
    /// The item is eligible for evaluation.
    Eligible,
    /// Include keywords are configured and the title matches none.
    MissingKeyword,
    /// The title contains an exclude keyword.
    Excluded,
    /// The item is shorter than the minimum duration.
    TooShort,
}

impl FilterVerdict {
    /// Returns true for `Eligible`.
    #[must_use]
    pub const fn is_eligible(self) -> bool {
        matches!(self, Self::Eligible)
    }
}

/// Keyword and duration gate for one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFilter {
    include: Vec<String>,
    exclude: Vec<String>,
    min_duration_secs: u64,
}

impl Default for ItemFilter {
    fn default() -> Self {
        Self {
            include: Vec::new(),
            exclude: Vec::new(),
            min_duration_secs: DEFAULT_MIN_DURATION_SECS,
        }
    }
}

fn lowered(keywords: &[String]) -> Vec<String> {
    keywords
        .iter()
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .collect()
}

impl ItemFilter {
    /// Builds a filter. Keywords are matched case-insensitively.
    #[must_use]
    pub fn new(include: &[String], exclude: &[String], min_duration_secs: u64) -> Self {
        Self {
            include: lowered(include),
            exclude: lowered(exclude),
            min_duration_secs,
        }
    }

    /// Classifies an item.
    ///
    /// Checks run in order: include keywords, exclude keywords, duration.
    #[must_use]
    pub fn verdict(&self, title: &str, duration_secs: u64) -> FilterVerdict {
        let title = title.to_lowercase();

        if !self.include.is_empty() && !self.include.iter().any(|k| title.contains(k.as_str())) {
            return FilterVerdict::MissingKeyword;
        }
        if self.exclude.iter().any(|k| title.contains(k.as_str())) {
            return FilterVerdict::Excluded;
        }
        if duration_secs < self.min_duration_secs {
            return FilterVerdict::TooShort;
        }
        FilterVerdict::Eligible
    }

    /// Returns true if the item should be evaluated.
    #[must_use]
    pub fn admits(&self, title: &str, duration_secs: u64) -> bool {
        self.verdict(title, duration_secs).is_eligible()
    }
}
