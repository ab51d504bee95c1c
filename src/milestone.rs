//! Milestone detection.
//!
//! Given a value and a policy, this module answers two questions:
//! which milestone has the item achieved, and is it close enough to the next
//! one that a support nudge is due. Both answers come from the same resolved
//! step so an evaluation is internally consistent.
//!
//! The achieved milestone is monotonic in the value for a fixed step, but it
//! can jump when the value crosses a rule threshold and the step changes.
//! With a default step of 1M and a 10M rule, 9.5M achieves 9M and 10.5M
//! achieves 10M.

use serde::{Deserialize, Serialize};

use crate::policy::{MilestonePolicy, SupportTrigger};

/// Largest multiple of `step` not exceeding `value`.
///
/// A zero step yields zero; validated policies never produce one.
#[must_use]
pub const fn achieved_milestone(value: u64, step: u64) -> u64 {
    match value.checked_div(step) {
        Some(q) => q * step,
        None => 0,
    }
}

/// Returns the achieved milestone if it has reached `policy.initial_target`.
#[must_use]
pub fn detect_achievement(value: u64, policy: &MilestonePolicy) -> Option<u64> {
    let step = policy.resolve_step(value);
    let achieved = achieved_milestone(value, step);
    (achieved >= policy.initial_target).then_some(achieved)
}

/// A support trigger that fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportSignal {
    /// Tier (trigger distance) that fired.
    pub distance: u64,
    /// Milestone being approached.
    pub next_milestone: u64,
    /// Distance still to go.
    pub remaining: u64,
}

/// Selects the tightest support tier for the next milestone.
///
/// Tiers are considered in ascending distance, so when several qualify the
/// smallest one wins: with tiers of 10k and 100k and 5k remaining, the 10k
/// tier fires.
#[must_use]
pub fn detect_support(
    value: u64,
    achieved: u64,
    step: u64,
    triggers: &[SupportTrigger],
) -> Option<SupportSignal> {
    let next_milestone = achieved.saturating_add(step);
    let remaining = next_milestone.saturating_sub(value);
    if remaining == 0 {
        return None;
    }

    triggers
        .iter()
        .filter(|t| remaining <= t.distance)
        .min_by_key(|t| t.distance)
        .map(|t| SupportSignal {
            distance: t.distance,
            next_milestone,
            remaining,
        })
}

/// Everything one evaluation of an item produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evaluation {
    /// Current value.
    pub value: u64,
    /// Step resolved for the value.
    pub step: u64,
    /// Largest milestone reached under `step`, whether or not notify-worthy.
    pub achieved: u64,
    /// Achieved milestone once it has reached the policy floor.
    pub achievement: Option<u64>,
    /// Support tier due for the next milestone, if any.
    pub support: Option<SupportSignal>,
}

impl Evaluation {
    /// Milestone following `achieved`.
    #[must_use]
    pub const fn next_milestone(&self) -> u64 {
        self.achieved.saturating_add(self.step)
    }
}

/// Evaluates `value` against `policy`.
///
/// Achievement and support share the step and achieved milestone computed
/// here; they are independent actions and both may be due at once.
#[must_use]
pub fn evaluate(value: u64, policy: &MilestonePolicy) -> Evaluation {
    let step = policy.resolve_step(value);
    let achieved = achieved_milestone(value, step);
    Evaluation {
        value,
        step,
        achieved,
        achievement: (achieved >= policy.initial_target).then_some(achieved),
        support: detect_support(value, achieved, step, &policy.support_triggers),
    }
}
