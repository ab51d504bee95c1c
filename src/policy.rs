//! Milestone policies and step resolution.
//!
//! A policy decides how coarse milestones are at a given magnitude. Rules are
//! scanned in the order given and the first rule whose threshold the value
//! has reached wins, so rules must be listed with descending thresholds.
//! `validate` rejects policies that break that order instead of re-sorting
//! them.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Step used when a policy does not name one.
pub const DEFAULT_STEP: u64 = 1_000_000;

/// One magnitude rule: at or above `threshold`, milestones are `step` apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRule {
    /// Minimum value (inclusive) at which this rule applies.
    pub threshold: u64,
    /// Milestone increment while this rule applies.
    pub step: u64,
}

/// "Approaching" trigger: fires when the next milestone is at most
/// `distance` away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SupportTrigger {
    /// Remaining-distance tier.
    #[serde(alias = "remaining")]
    pub distance: u64,
}

impl SupportTrigger {
    /// Creates a trigger for the given tier.
    #[must_use]
    pub const fn new(distance: u64) -> Self {
        Self { distance }
    }
}

/// Milestone policy for one tracked target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MilestonePolicy {
    /// Magnitude rules, descending by threshold.
    #[serde(default, alias = "dynamic_rules")]
    pub rules: Vec<StepRule>,
    /// Step used when no rule matches.
    #[serde(default = "default_step", alias = "step")]
    pub default_step: u64,
    /// Smallest achieved milestone worth notifying about. Has no default.
    pub initial_target: u64,
    /// Support trigger tiers, in any order.
    #[serde(default, alias = "support_trigger")]
    pub support_triggers: Vec<SupportTrigger>,
}

const fn default_step() -> u64 {
    DEFAULT_STEP
}

impl Default for MilestonePolicy {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            default_step: DEFAULT_STEP,
            initial_target: 0,
            support_triggers: Vec::new(),
        }
    }
}

impl MilestonePolicy {
    /// Creates a policy with only a default step and floor.
    #[must_use]
    pub fn new(default_step: u64, initial_target: u64) -> Self {
        Self {
            default_step,
            initial_target,
            ..Self::default()
        }
    }

    /// Appends a magnitude rule.
    #[must_use]
    pub fn with_rule(mut self, threshold: u64, step: u64) -> Self {
        self.rules.push(StepRule { threshold, step });
        self
    }

    /// Appends a support trigger tier.
    #[must_use]
    pub fn with_trigger(mut self, distance: u64) -> Self {
        self.support_triggers.push(SupportTrigger::new(distance));
        self
    }

    /// Resolves the active step for `value`.
    ///
    /// Returns the step of the first rule whose `threshold <= value`, or
    /// `default_step` when none matches. The rule order is trusted as given.
    #[must_use]
    pub fn resolve_step(&self, value: u64) -> u64 {
        self.rules
            .iter()
            .find(|rule| rule.threshold <= value)
            .map_or(self.default_step, |rule| rule.step)
    }

    /// Checks the invariants the resolver relies on.
    ///
    /// # Errors
    /// Returns `ConfigError::InvalidPolicy` naming `target` when a step or
    /// trigger distance is zero, thresholds are not strictly descending, or a
    /// trigger tier is listed twice.
    pub fn validate(&self, target: &str) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidPolicy {
            target: target.to_string(),
            reason,
        };

        if self.default_step == 0 {
            return Err(invalid("default_step must be greater than zero".to_string()));
        }

        for (i, rule) in self.rules.iter().enumerate() {
            if rule.step == 0 {
                return Err(invalid(format!("rules[{i}].step must be greater than zero")));
            }
        }

        for (i, pair) in self.rules.windows(2).enumerate() {
            if pair[1].threshold >= pair[0].threshold {
                return Err(invalid(format!(
                    "rules must be sorted by descending threshold: rules[{}].threshold={} follows rules[{i}].threshold={}",
                    i + 1,
                    pair[1].threshold,
                    pair[0].threshold
                )));
            }
        }

        let mut seen = Vec::with_capacity(self.support_triggers.len());
        for (i, trigger) in self.support_triggers.iter().enumerate() {
            if trigger.distance == 0 {
                return Err(invalid(format!(
                    "support_triggers[{i}].distance must be greater than zero"
                )));
            }
            if seen.contains(&trigger.distance) {
                return Err(invalid(format!(
                    "support trigger distance {} is listed more than once",
                    trigger.distance
                )));
            }
            seen.push(trigger.distance);
        }

        Ok(())
    }
}
