//! Logging setup and span constructors.
//!
//! Runs and targets get their own spans so every event inside them carries
//! `run_id`, `mode`, `target` and `source_id` without repeating the fields.

use std::sync::Once;

use tracing::Span;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum LogFormat {
    /// JSON lines, for schedulers that collect logs.
    Json,
    /// Human-readable output.
    #[default]
    Pretty,
}

/// Installs the global subscriber.
///
/// Honours `RUST_LOG` and falls back to `info`. Later calls are no-ops, as is
/// a call made after another subscriber was installed.
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let _ = match format {
            LogFormat::Json => tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json())
                .try_init(),
            LogFormat::Pretty => tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().pretty())
                .try_init(),
        };
    });
}

/// Span covering one orchestrator run.
#[must_use]
pub fn run_span(run_id: &str, mode: &str) -> Span {
    tracing::info_span!("run", run_id = run_id, mode = mode)
}

/// Span covering one target within a run.
#[must_use]
pub fn target_span(group: &str, source_id: &str) -> Span {
    tracing::info_span!("target", target = group, source_id = source_id)
}
