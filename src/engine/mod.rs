//! Run orchestration.
//!
//! `RunOrchestrator` walks every configured target, evaluates each eligible
//! item against the target's milestone policy and turns due actions into
//! ledger records, dispatching them first in live modes.
//!
//! Per target there are two passes:
//!
//! - (a) the recent listing (or the whole catalog in full-scan modes);
//! - (b) a backfill over every id the item store knows for the target's
//!   group, looked up in batches. Ids already seen in pass (a) are skipped.
//!   Backfill only runs in `RunMode::LiveRecent`.
//!
//! Both passes feed the same evaluation routine. Retrieval errors are
//! contained at the page or batch boundary; storage errors abort the run,
//! since a ledger that cannot be written would let the next run repeat
//! notifications.

mod mode;
mod report;

pub use mode::{Budget, RunMode};
pub use report::{Counters, RunId, RunReport, TargetReport};

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::catalog::{fetch_in_batches, CatalogSource, ItemStats};
use crate::config::{TargetConfig, Templates, WatchConfig};
use crate::dispatch::{DispatchOutcome, Dispatcher, PosterFactory};
use crate::error::WatchResult;
use crate::filter::ItemFilter;
use crate::history::{ActionType, HistoryKey, HistoryRecord};
use crate::item::{ItemId, TrackedItem};
use crate::milestone::{evaluate, Evaluation, SupportSignal};
use crate::observability::{run_span, target_span};
use crate::policy::MilestonePolicy;
use crate::storage::{HistoryLedger, ItemStore};
use crate::template::{format_number, MessageContext, NumberStyle, SeededPicker, TemplatePicker};

/// Everything fixed for one target during a run.
struct TargetContext<'a> {
    target: &'a TargetConfig,
    templates: &'a Templates,
    policy: MilestonePolicy,
    filter: ItemFilter,
    dispatcher: Dispatcher,
    number_style: NumberStyle,
    vars: BTreeMap<String, String>,
}

/// One candidate action for an item.
struct DueAction<'a> {
    key: HistoryKey,
    title: &'a str,
    evaluation: &'a Evaluation,
    support: Option<SupportSignal>,
}

/// Drives runs over injected collaborators.
pub struct RunOrchestrator {
    catalog: Arc<dyn CatalogSource>,
    items: Arc<dyn ItemStore>,
    ledger: Arc<dyn HistoryLedger>,
    posters: Arc<dyn PosterFactory>,
    picker: Box<dyn TemplatePicker>,
}

impl RunOrchestrator {
    /// Create an orchestrator. Template variants are picked at random.
    #[must_use]
    pub fn new(
        catalog: Arc<dyn CatalogSource>,
        items: Arc<dyn ItemStore>,
        ledger: Arc<dyn HistoryLedger>,
        posters: Arc<dyn PosterFactory>,
    ) -> Self {
        Self {
            catalog,
            items,
            ledger,
            posters,
            picker: Box::new(SeededPicker::from_entropy()),
        }
    }

    /// Replace the template picker.
    #[must_use]
    pub fn with_picker(mut self, picker: Box<dyn TemplatePicker>) -> Self {
        self.picker = picker;
        self
    }

    /// Get a reference to the item store.
    pub fn item_store(&self) -> &Arc<dyn ItemStore> {
        &self.items
    }

    /// Get a reference to the ledger.
    pub fn ledger(&self) -> &Arc<dyn HistoryLedger> {
        &self.ledger
    }

    /// Executes one run over every target in `config`.
    ///
    /// # Errors
    /// Configuration errors are returned before any evaluation. Storage errors
    /// abort the run; targets finished before the failure keep their records.
    pub fn run(&mut self, config: &WatchConfig, mode: RunMode) -> WatchResult<RunReport> {
        config.validate()?;

        let run_id = RunId::new();
        let started_at = Utc::now();
        let span = run_span(&run_id.to_string(), mode.as_str());
        let _guard = span.enter();

        let mut budget = Budget::for_mode(mode, config.system.max_posts_per_run);
        info!(
            targets = config.targets.len(),
            budget = ?budget.remaining(),
            "run started"
        );

        let mut targets = Vec::with_capacity(config.targets.len());
        for target in &config.targets {
            let report = self.run_target(config, target, mode, &mut budget)?;
            targets.push(report);
        }

        let report = RunReport {
            run_id,
            mode,
            started_at,
            finished_at: Utc::now(),
            budget_used: budget.used(),
            targets,
        };
        let total = report.totals();
        info!(
            recorded = total.recorded(),
            failed = total.failed,
            deferred = total.deferred,
            duplicates = total.duplicates,
            "run finished"
        );
        Ok(report)
    }

    fn run_target(
        &mut self,
        config: &WatchConfig,
        target: &TargetConfig,
        mode: RunMode,
        budget: &mut Budget,
    ) -> WatchResult<TargetReport> {
        let span = target_span(&target.group, &target.source_id);
        let _guard = span.enter();

        let dispatcher = if mode.dispatches() {
            Dispatcher::for_account(self.posters.as_ref(), &target.account_id)
        } else {
            Dispatcher::simulated(target.account_id.clone())
        };
        let ctx = TargetContext {
            target,
            templates: &config.templates,
            policy: target.policy(),
            filter: target.filter(&config.system),
            dispatcher,
            number_style: config.system.number_style,
            vars: target.template_vars(),
        };
        let catalog = Arc::clone(&self.catalog);
        let mut counters = Counters::default();
        let mut seen = HashSet::new();

        // Pass (a): recent listing.
        let limit = config.system.recent_limit;
        match catalog.list_recent(&target.source_id, limit, mode.full_scan()) {
            Ok(listing) => {
                for entry in listing {
                    let entry = match entry {
                        Ok(entry) => entry,
                        Err(e) => {
                            warn!(error = %e, "listing entry failed, skipping");
                            counters.failed_batches += 1;
                            continue;
                        }
                    };
                    counters.listed += 1;
                    if !seen.insert(entry.id.clone()) {
                        continue;
                    }
                    let title = entry.stats.title.as_deref().unwrap_or(&entry.title);
                    self.process_item(&ctx, mode, &entry.id, title, &entry.stats, budget, &mut counters)?;
                }
            }
            Err(e) => {
                warn!(error = %e, "listing failed");
                counters.failed_batches += 1;
            }
        }

        // Pass (b): backfill of known items.
        if mode.backfills() {
            let pending: Vec<ItemId> = self
                .items
                .ids_for_group(&target.group)?
                .into_iter()
                .filter(|id| !seen.contains(id))
                .collect();
            debug!(ids = pending.len(), "backfilling known items");

            for batch in fetch_in_batches(catalog.as_ref(), &pending, config.system.batch_size) {
                if let Err(e) = &batch.outcome {
                    warn!(ids = batch.ids.len(), error = %e, "stats batch failed, skipping");
                    counters.failed_batches += 1;
                    continue;
                }
                for id in &batch.ids {
                    counters.backfilled += 1;
                    let stats = batch.stats_for(id);
                    let stored_title = match &stats.title {
                        Some(_) => None,
                        None => self.items.get(id)?.map(|item| item.title),
                    };
                    let title = stats.title.as_deref().or(stored_title.as_deref()).unwrap_or_default();
                    self.process_item(&ctx, mode, id, title, &stats, budget, &mut counters)?;
                }
            }
        }

        self.ledger.sync()?;

        info!(
            listed = counters.listed,
            backfilled = counters.backfilled,
            eligible = counters.eligible,
            recorded = counters.recorded(),
            "target finished"
        );
        Ok(TargetReport {
            group: target.group.clone(),
            simulation: ctx.dispatcher.is_simulation(),
            counters,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn process_item(
        &mut self,
        ctx: &TargetContext<'_>,
        mode: RunMode,
        id: &ItemId,
        title: &str,
        stats: &ItemStats,
        budget: &mut Budget,
        counters: &mut Counters,
    ) -> WatchResult<()> {
        let verdict = ctx.filter.verdict(title, stats.duration_secs);
        if !verdict.is_eligible() {
            debug!(item_id = %id, ?verdict, "filtered");
            counters.filtered += 1;
            return Ok(());
        }
        counters.eligible += 1;

        self.items
            .upsert(TrackedItem::observed(id.clone(), title, ctx.target.group.clone(), stats.value))?;

        let evaluation = evaluate(stats.value, &ctx.policy);

        if let Some(milestone) = evaluation.achievement {
            let action = DueAction {
                key: HistoryKey::new(id.clone(), ActionType::Achieved, milestone),
                title,
                evaluation: &evaluation,
                support: None,
            };
            self.act(ctx, mode, &action, budget, counters)?;
        }

        if let Some(signal) = evaluation.support {
            let action = DueAction {
                key: HistoryKey::new(
                    id.clone(),
                    ActionType::Support {
                        distance: signal.distance,
                    },
                    signal.next_milestone,
                ),
                title,
                evaluation: &evaluation,
                support: Some(signal),
            };
            self.act(ctx, mode, &action, budget, counters)?;
        }

        Ok(())
    }

    fn act(
        &mut self,
        ctx: &TargetContext<'_>,
        mode: RunMode,
        action: &DueAction<'_>,
        budget: &mut Budget,
        counters: &mut Counters,
    ) -> WatchResult<()> {
        let key = &action.key;
        if self.ledger.has(key)? {
            counters.duplicates += 1;
            return Ok(());
        }

        if !mode.dispatches() {
            if self.record(key, counters)? {
                debug!(item_id = %key.item_id, action = %key.action, milestone = key.milestone, "baseline recorded");
                counters.baselines += 1;
            }
            return Ok(());
        }

        if !budget.has_remaining() {
            info!(
                item_id = %key.item_id,
                action = %key.action,
                milestone = key.milestone,
                title = action.title,
                "post budget exhausted, deferring"
            );
            counters.deferred += 1;
            return Ok(());
        }

        let text = self.render(ctx, action);
        match ctx.dispatcher.dispatch(&text) {
            DispatchOutcome::Failed(e) => {
                warn!(item_id = %key.item_id, action = %key.action, milestone = key.milestone, error = %e, "dispatch failed, action stays pending");
                counters.failed += 1;
                return Ok(());
            }
            outcome => {
                budget.consume();
                if self.record(key, counters)? {
                    if matches!(outcome, DispatchOutcome::Sent) {
                        counters.sent += 1;
                    } else {
                        counters.simulated += 1;
                    }
                }
            }
        }

        info!(
            item_id = %key.item_id,
            action = %key.action,
            milestone = key.milestone,
            title = action.title,
            "notified"
        );
        Ok(())
    }

    /// Writes `key` to the ledger. Returns false if it was already present.
    fn record(&self, key: &HistoryKey, counters: &mut Counters) -> WatchResult<bool> {
        match self.ledger.record(HistoryRecord::now(key.clone())) {
            Ok(()) => Ok(true),
            Err(e) if e.is_duplicate() => {
                counters.duplicates += 1;
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn render(&mut self, ctx: &TargetContext<'_>, action: &DueAction<'_>) -> String {
        let fmt = |n: u64| format_number(n, ctx.number_style);
        let evaluation = action.evaluation;
        let target = ctx.target;
        let url = target.url_for(&action.key.item_id);
        let hashtags = target.hashtag_line();

        let mut context = MessageContext::new()
            .with("group", target.group.as_str())
            .with("artist_name", target.group.as_str())
            .with("title", action.title)
            .with("video_title", action.title)
            .with("url", url.as_str())
            .with("video_url", url)
            .with("hashtags", hashtags)
            .with("current", fmt(evaluation.value))
            .with("current_views", fmt(evaluation.value))
            .with("milestone", fmt(action.key.milestone));

        let set = match action.support {
            None => {
                let next = fmt(evaluation.next_milestone());
                context.insert("views", fmt(action.key.milestone));
                context.insert("next_milestone", next.as_str());
                context.insert("next_goal", next);
                &ctx.templates.achieved
            }
            Some(signal) => {
                let next = fmt(signal.next_milestone);
                context.insert("next_milestone", next.as_str());
                context.insert("target_views", next);
                context.insert("remaining", fmt(signal.remaining));
                &ctx.templates.support
            }
        };
        context.extend(&ctx.vars);

        set.render(self.picker.as_mut(), &context)
    }
}
