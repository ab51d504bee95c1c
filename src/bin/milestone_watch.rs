//! milestone-watch command-line runner.
//!
//! Executes one run against a catalog snapshot, recording into a persistent
//! ledger directory. Intended to be invoked by an external scheduler.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::error;

use milestone_watch::observability::{init_logging, LogFormat};
use milestone_watch::storage::open_database;
use milestone_watch::template::SeededPicker;
use milestone_watch::{
    load_config, EnvCommandPosterFactory, RunMode, RunOrchestrator, SnapshotCatalog, WatchError,
};

/// Detect view-count milestones and post at-most-once notifications.
#[derive(Debug, Parser)]
#[command(name = "milestone-watch", version, about)]
struct Cli {
    /// YAML configuration file.
    #[arg(short, long, env = "MILESTONE_WATCH_CONFIG", default_value = "config.yaml")]
    config: PathBuf,

    /// Directory holding the ledger.
    #[arg(short, long, env = "MILESTONE_WATCH_DATA_DIR", default_value = "./milestone-data")]
    data_dir: PathBuf,

    /// Catalog snapshot (JSON) to evaluate.
    #[arg(long)]
    catalog: PathBuf,

    /// Scan the whole catalog instead of the recent listing.
    #[arg(long)]
    full_scan: bool,

    /// Record current state as baseline without posting. Implies --full-scan.
    #[arg(long)]
    init: bool,

    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,

    /// Seed for template selection.
    #[arg(long)]
    seed: Option<u64>,
}

fn run(cli: &Cli) -> Result<()> {
    let config = load_config(&cli.config).map_err(WatchError::from)?;
    let mode = RunMode::from_flags(cli.full_scan, cli.init);

    let catalog = SnapshotCatalog::load(&cli.catalog)
        .with_context(|| format!("loading catalog snapshot {}", cli.catalog.display()))?
        .with_full_scan_cap(config.system.full_scan_cap);
    let stores = open_database(&cli.data_dir, None)?;

    let picker = match cli.seed {
        Some(seed) => SeededPicker::from_seed(seed),
        None => SeededPicker::from_entropy(),
    };

    let mut orchestrator = RunOrchestrator::new(
        Arc::new(catalog),
        stores.items.clone(),
        stores.history.clone(),
        Arc::new(EnvCommandPosterFactory::new()),
    )
    .with_picker(Box::new(picker));

    let report = orchestrator.run(&config, mode)?;
    println!("{report}");
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_format);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let config_error = e.downcast_ref::<WatchError>().is_some_and(WatchError::is_config);
            error!(error = %format!("{e:#}"), "run aborted");
            if config_error {
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}
