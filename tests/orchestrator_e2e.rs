use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use milestone_watch::catalog::Listing;
use milestone_watch::storage::InMemoryStores;
use milestone_watch::template::FirstVariant;
use milestone_watch::{
    ActionType, CatalogEntry, CatalogError, CatalogSource, CredentialError, HistoryKey, HistoryLedger,
    ItemId, ItemStats, ItemStore, PostError, Poster, PosterFactory, RunMode, RunOrchestrator,
    SimulationOnly, WatchConfig,
};

// --- Test doubles ---

#[derive(Default)]
struct ScriptedCatalog {
    recent: Mutex<HashMap<String, Vec<CatalogEntry>>>,
    stats: Mutex<HashMap<ItemId, ItemStats>>,
    failing_batches: Mutex<HashSet<usize>>,
    batch_calls: AtomicUsize,
    /// Per source: `None` refuses the listing, `Some(n)` fails after `n` entries.
    failing_listings: Mutex<HashMap<String, Option<usize>>>,
}

impl ScriptedCatalog {
    /// Sets an item's statistics and, when `recent`, lists it first.
    fn set(&self, source: &str, id: &str, title: &str, value: u64, recent: bool) {
        let stats = ItemStats {
            value,
            duration_secs: 240,
            title: Some(title.to_string()),
        };
        self.stats.lock().unwrap().insert(ItemId::new(id), stats.clone());

        let mut listings = self.recent.lock().unwrap();
        let listing = listings.entry(source.to_string()).or_default();
        listing.retain(|e| e.id.as_str() != id);
        if recent {
            listing.insert(
                0,
                CatalogEntry {
                    id: ItemId::new(id),
                    title: title.to_string(),
                    stats,
                    published_at: None,
                },
            );
        }
    }

    fn clear_recent(&self, source: &str) {
        self.recent.lock().unwrap().remove(source);
    }

    fn fail_batch(&self, call_index: usize) {
        self.failing_batches.lock().unwrap().insert(call_index);
    }

    fn fail_listing(&self, source: &str, after: Option<usize>) {
        self.failing_listings.lock().unwrap().insert(source.to_string(), after);
    }
}

impl CatalogSource for ScriptedCatalog {
    fn fetch_batch(&self, ids: &[ItemId]) -> Result<HashMap<ItemId, ItemStats>, CatalogError> {
        let call = self.batch_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_batches.lock().unwrap().contains(&call) {
            return Err(CatalogError::request("quota exceeded"));
        }
        let stats = self.stats.lock().unwrap();
        Ok(ids
            .iter()
            .filter_map(|id| stats.get(id).map(|s| (id.clone(), s.clone())))
            .collect())
    }

    fn list_recent(&self, source_id: &str, limit: usize, full_scan: bool) -> Result<Listing<'_>, CatalogError> {
        let entries = self
            .recent
            .lock()
            .unwrap()
            .get(source_id)
            .cloned()
            .unwrap_or_default();
        let take = if full_scan { entries.len() } else { limit };
        let mut listing: Vec<Result<CatalogEntry, CatalogError>> = entries.into_iter().take(take).map(Ok).collect();
        match self.failing_listings.lock().unwrap().get(source_id) {
            Some(None) => return Err(CatalogError::request("listing unavailable")),
            Some(Some(after)) => {
                let at = (*after).min(listing.len());
                listing.insert(at, Err(CatalogError::request("page timed out")));
            }
            None => {}
        }
        Ok(Box::new(listing.into_iter()))
    }
}

#[derive(Default, Clone)]
struct RecordingPosters {
    sent: Arc<Mutex<Vec<String>>>,
    failures_left: Arc<AtomicUsize>,
}

struct RecordingPoster(RecordingPosters);

impl Poster for RecordingPoster {
    fn send(&self, text: &str) -> Result<(), PostError> {
        let left = self.0.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.0.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(PostError::Transport {
                message: "connection reset".to_string(),
            });
        }
        self.0.sent.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

impl PosterFactory for RecordingPosters {
    fn poster_for(&self, _account: &str) -> Result<Box<dyn Poster>, CredentialError> {
        Ok(Box::new(RecordingPoster(self.clone())))
    }
}

impl RecordingPosters {
    fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

// --- Fixtures ---

fn config(max_posts: usize) -> WatchConfig {
    WatchConfig::from_yaml(&format!(
        r#"
system:
  max_posts_per_run: {max_posts}
  batch_size: 2
  number_style: grouped
targets:
  - group: "Artist"
    source_id: "ch"
    exclude_keywords: ["teaser"]
    milestones:
      default_step: 1000000
      initial_target: 1000000
    support_triggers:
      - {{ distance: 100000 }}
      - {{ distance: 10000 }}
templates:
  achieved: "{{title}} passed {{milestone}}"
  support: "{{title}} needs {{remaining}} for {{next_milestone}}"
"#
    ))
    .unwrap()
}

struct Harness {
    catalog: Arc<ScriptedCatalog>,
    stores: InMemoryStores,
    posters: RecordingPosters,
    orchestrator: RunOrchestrator,
}

fn harness() -> Harness {
    let catalog = Arc::new(ScriptedCatalog::default());
    let stores = InMemoryStores::new();
    let posters = RecordingPosters::default();
    let orchestrator = RunOrchestrator::new(
        catalog.clone(),
        stores.items.clone(),
        stores.history.clone(),
        Arc::new(posters.clone()),
    )
    .with_picker(Box::new(FirstVariant));
    Harness {
        catalog,
        stores,
        posters,
        orchestrator,
    }
}

fn achieved(id: &str, milestone: u64) -> HistoryKey {
    HistoryKey::new(ItemId::new(id), ActionType::Achieved, milestone)
}

// --- Scenarios ---

#[test]
fn budget_limits_dispatches_and_defers_the_rest() {
    let mut h = harness();
    for i in 0..5 {
        h.catalog.set("ch", &format!("v{i}"), &format!("Song {i}"), 1_500_000, true);
    }

    let report = h.orchestrator.run(&config(2), RunMode::LiveRecent).unwrap();
    let total = report.totals();
    assert_eq!(total.sent, 2);
    assert_eq!(total.deferred, 3);
    assert_eq!(report.budget_used, 2);
    assert_eq!(h.stores.history.len().unwrap(), 2);
    assert_eq!(h.posters.sent().len(), 2);

    // Deferred actions stay pending and go out on later runs.
    let report = h.orchestrator.run(&config(2), RunMode::LiveRecent).unwrap();
    assert_eq!(report.totals().sent, 2);
    assert_eq!(report.totals().duplicates, 2);
    let report = h.orchestrator.run(&config(2), RunMode::LiveRecent).unwrap();
    assert_eq!(report.totals().sent, 1);
    assert_eq!(h.stores.history.len().unwrap(), 5);
}

#[test]
fn repeated_runs_never_notify_twice() {
    let mut h = harness();
    h.catalog.set("ch", "v1", "Song", 2_995_000, true);

    let first = h.orchestrator.run(&config(10), RunMode::LiveRecent).unwrap();
    assert_eq!(first.totals().sent, 2);

    for _ in 0..3 {
        let again = h.orchestrator.run(&config(10), RunMode::LiveRecent).unwrap();
        assert_eq!(again.totals().recorded(), 0);
        assert_eq!(again.totals().duplicates, 2);
    }

    assert_eq!(h.posters.sent().len(), 2);
    let records = h.stores.history.records_for(&ItemId::new("v1")).unwrap();
    let keys: HashSet<_> = records.iter().map(|r| r.key()).collect();
    assert_eq!(keys.len(), records.len());
}

#[test]
fn tightest_support_tier_fires_once_per_milestone() {
    let mut h = harness();
    h.catalog.set("ch", "v1", "Song", 1_995_000, true);

    h.orchestrator.run(&config(10), RunMode::LiveRecent).unwrap();
    let sent = h.posters.sent();
    assert_eq!(sent, vec!["Song passed 1,000,000", "Song needs 5,000 for 2,000,000"]);

    let support = HistoryKey::new(ItemId::new("v1"), ActionType::Support { distance: 10_000 }, 2_000_000);
    assert!(h.stores.history.has(&support).unwrap());
    let wider = HistoryKey::new(ItemId::new("v1"), ActionType::Support { distance: 100_000 }, 2_000_000);
    assert!(!h.stores.history.has(&wider).unwrap());
}

#[test]
fn init_sync_records_baselines_without_posting_and_is_idempotent() {
    let mut h = harness();
    h.catalog.set("ch", "v1", "Song", 3_200_000, true);
    h.catalog.set("ch", "v2", "Other", 1_950_000, true);

    let first = h.orchestrator.run(&config(0), RunMode::InitSync).unwrap();
    assert_eq!(first.totals().baselines, 3);
    assert_eq!(first.totals().sent, 0);
    assert!(h.posters.sent().is_empty());
    assert!(h.stores.history.has(&achieved("v1", 3_000_000)).unwrap());

    let second = h.orchestrator.run(&config(0), RunMode::InitSync).unwrap();
    assert_eq!(second.totals().baselines, 0);
    assert_eq!(h.stores.history.len().unwrap(), 3);

    // Nothing is due for a live run right after the baseline.
    let live = h.orchestrator.run(&config(10), RunMode::LiveRecent).unwrap();
    assert_eq!(live.totals().recorded(), 0);
    assert!(h.posters.sent().is_empty());
}

#[test]
fn excluded_items_are_never_stored_or_evaluated() {
    let mut h = harness();
    h.catalog.set("ch", "v1", "New Song (Teaser)", 5_000_000, true);
    h.catalog.set("ch", "v2", "New Song", 5_000_000, true);

    let report = h.orchestrator.run(&config(10), RunMode::LiveRecent).unwrap();
    assert_eq!(report.totals().filtered, 1);
    assert!(h.stores.items.get(&ItemId::new("v1")).unwrap().is_none());
    assert!(h.stores.history.records_for(&ItemId::new("v1")).unwrap().is_empty());
    assert!(h.stores.history.has(&achieved("v2", 5_000_000)).unwrap());
}

#[test]
fn failed_dispatch_stays_pending_and_keeps_budget() {
    let mut h = harness();
    h.catalog.set("ch", "v1", "One", 1_200_000, true);
    h.catalog.set("ch", "v2", "Two", 1_200_000, true);
    h.posters.failures_left.store(1, Ordering::SeqCst);

    let report = h.orchestrator.run(&config(1), RunMode::LiveRecent).unwrap();
    assert_eq!(report.totals().failed, 1);
    assert_eq!(report.totals().sent, 1);
    assert_eq!(report.budget_used, 1);
    // v2 was listed first and failed; v1 used the budget.
    assert!(!h.stores.history.has(&achieved("v2", 1_000_000)).unwrap());
    assert!(h.stores.history.has(&achieved("v1", 1_000_000)).unwrap());

    let retry = h.orchestrator.run(&config(1), RunMode::LiveRecent).unwrap();
    assert_eq!(retry.totals().sent, 1);
    assert!(h.stores.history.has(&achieved("v2", 1_000_000)).unwrap());
}

#[test]
fn budget_is_shared_across_targets() {
    let mut h = harness();
    let config = two_targets(1);

    h.catalog.set("ch", "a1", "First", 1_100_000, true);
    h.catalog.set("ch2", "b1", "Second", 1_100_000, true);

    let report = h.orchestrator.run(&config, RunMode::LiveRecent).unwrap();
    assert_eq!(report.targets[0].counters.sent, 1);
    assert_eq!(report.targets[1].counters.sent, 0);
    assert_eq!(report.targets[1].counters.deferred, 1);
}

fn two_targets(max_posts: usize) -> WatchConfig {
    let mut config = config(max_posts);
    let mut second = config.targets[0].clone();
    second.group = "Second".to_string();
    second.source_id = "ch2".to_string();
    config.targets.push(second);
    config
}

#[test]
fn refused_listing_does_not_stop_later_targets() {
    let mut h = harness();
    h.catalog.set("ch", "a1", "First", 1_100_000, true);
    h.catalog.set("ch2", "b1", "Second", 1_100_000, true);
    h.catalog.fail_listing("ch", None);

    let report = h.orchestrator.run(&two_targets(10), RunMode::LiveRecent).unwrap();
    assert_eq!(report.targets.len(), 2);
    assert_eq!(report.targets[0].counters.failed_batches, 1);
    assert_eq!(report.targets[0].counters.listed, 0);
    assert_eq!(report.targets[1].counters.sent, 1);
    assert!(!h.stores.history.has(&achieved("a1", 1_000_000)).unwrap());
    assert!(h.stores.history.has(&achieved("b1", 1_000_000)).unwrap());
}

#[test]
fn listing_error_mid_stream_is_contained() {
    let mut h = harness();
    h.catalog.set("ch", "a1", "First", 1_100_000, true);
    h.catalog.set("ch", "a2", "Another", 1_200_000, true);
    h.catalog.set("ch2", "b1", "Second", 1_100_000, true);
    h.catalog.fail_listing("ch", Some(1));

    let report = h.orchestrator.run(&two_targets(10), RunMode::LiveRecent).unwrap();
    assert_eq!(report.targets[0].counters.failed_batches, 1);
    assert_eq!(report.targets[0].counters.listed, 2);
    assert_eq!(report.targets[0].counters.sent, 2);
    assert_eq!(report.targets[1].counters.sent, 1);
    assert_eq!(h.stores.history.len().unwrap(), 3);
}

#[test]
fn backfill_catches_items_that_left_the_recent_listing() {
    let mut h = harness();
    h.catalog.set("ch", "old", "Old Song", 1_100_000, true);
    h.orchestrator.run(&config(10), RunMode::LiveRecent).unwrap();

    // The item drops out of the listing and keeps growing.
    h.catalog.clear_recent("ch");
    h.catalog.set("ch", "old", "Old Song", 2_050_000, false);

    let report = h.orchestrator.run(&config(10), RunMode::LiveRecent).unwrap();
    assert_eq!(report.totals().listed, 0);
    assert_eq!(report.totals().backfilled, 1);
    assert!(h.stores.history.has(&achieved("old", 2_000_000)).unwrap());
    assert_eq!(h.stores.items.get(&ItemId::new("old")).unwrap().unwrap().value, 2_050_000);
}

#[test]
fn full_scan_skips_backfill() {
    let mut h = harness();
    h.catalog.set("ch", "old", "Old Song", 1_100_000, true);
    h.orchestrator.run(&config(10), RunMode::LiveRecent).unwrap();
    h.catalog.clear_recent("ch");

    let report = h.orchestrator.run(&config(10), RunMode::LiveFullScan).unwrap();
    assert_eq!(report.totals().backfilled, 0);
    assert_eq!(h.catalog.batch_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn failed_batch_is_skipped_and_run_continues() {
    let mut h = harness();
    for id in ["k1", "k2", "k3", "k4"] {
        h.catalog.set("ch", id, id, 500_000, true);
    }
    h.orchestrator.run(&config(10), RunMode::LiveRecent).unwrap();
    h.catalog.clear_recent("ch");
    for id in ["k1", "k2", "k3", "k4"] {
        h.catalog.set("ch", id, id, 1_000_000, false);
    }

    // batch_size is 2: ids k1,k2 then k3,k4. The first lookup fails.
    h.catalog.fail_batch(0);
    let report = h.orchestrator.run(&config(10), RunMode::LiveRecent).unwrap();
    assert_eq!(report.totals().failed_batches, 1);
    assert_eq!(report.totals().sent, 2);
    assert!(!h.stores.history.has(&achieved("k1", 1_000_000)).unwrap());
    assert!(h.stores.history.has(&achieved("k3", 1_000_000)).unwrap());

    // Not recorded means retried on the next run.
    let report = h.orchestrator.run(&config(10), RunMode::LiveRecent).unwrap();
    assert_eq!(report.totals().sent, 2);
}

#[test]
fn missing_ids_in_batch_do_not_overwrite_stored_rows() {
    let mut h = harness();
    h.catalog.set("ch", "gone", "Deleted Song", 1_300_000, true);
    h.orchestrator.run(&config(10), RunMode::LiveRecent).unwrap();

    h.catalog.clear_recent("ch");
    h.catalog.stats.lock().unwrap().clear();

    let report = h.orchestrator.run(&config(10), RunMode::LiveRecent).unwrap();
    assert_eq!(report.totals().filtered, 1);
    assert_eq!(h.stores.items.get(&ItemId::new("gone")).unwrap().unwrap().value, 1_300_000);
}

#[test]
fn missing_credentials_degrade_to_simulation() {
    let catalog = Arc::new(ScriptedCatalog::default());
    catalog.set("ch", "v1", "Song", 1_000_000, true);
    let stores = InMemoryStores::new();
    let mut orchestrator = RunOrchestrator::new(
        catalog,
        stores.items.clone(),
        stores.history.clone(),
        Arc::new(SimulationOnly),
    );

    let report = orchestrator.run(&config(10), RunMode::LiveRecent).unwrap();
    assert!(report.targets[0].simulation);
    assert_eq!(report.totals().simulated, 1);
    assert!(stores.history.has(&achieved("v1", 1_000_000)).unwrap());
}

#[test]
fn invalid_config_aborts_before_evaluation() {
    let mut h = harness();
    h.catalog.set("ch", "v1", "Song", 1_000_000, true);

    let mut bad = config(10);
    bad.targets[0].milestones.default_step = 0;

    let err = h.orchestrator.run(&bad, RunMode::LiveRecent).unwrap_err();
    assert!(err.is_config());
    assert_eq!(h.stores.items.len().unwrap(), 0);
    assert_eq!(h.stores.history.len().unwrap(), 0);
}
