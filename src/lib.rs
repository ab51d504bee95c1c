//! # milestone-watch - at-most-once milestone notifications
//!
//! milestone-watch polls a view counter for a catalog of tracked items,
//! detects when each item crosses a configured milestone (or is about to),
//! and emits at most one notification per (item, action, milestone), bounded
//! by a per-run budget.
//!
//! ## Core Concepts
//!
//! - **MilestonePolicy**: Step rules that make milestones coarser as values grow
//! - **Evaluation**: Achieved milestone and support ("almost there") signal for a value
//! - **HistoryLedger**: Append-only record whose (item, action, milestone) keys are unique
//! - **RunOrchestrator**: Per-target traversal with Live and InitSync modes
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use milestone_watch::{load_config, RunMode, RunOrchestrator, SnapshotCatalog, SimulationOnly};
//! use milestone_watch::storage::InMemoryStores;
//!
//! let config = load_config("watch.yaml".as_ref())?;
//! let stores = InMemoryStores::new();
//! let mut orchestrator = RunOrchestrator::new(
//!     Arc::new(SnapshotCatalog::load("snapshot.json".as_ref())?),
//!     stores.items.clone(),
//!     stores.history.clone(),
//!     Arc::new(SimulationOnly),
//! );
//! let report = orchestrator.run(&config, RunMode::LiveRecent)?;
//! println!("{report}");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod error;
pub mod history;
pub mod item;
pub mod milestone;
pub mod policy;

// Storage and collaborators
pub mod catalog;
pub mod dispatch;
pub mod filter;
pub mod storage;

// Configuration, messages, orchestration
pub mod config;
pub mod engine;
pub mod observability;
pub mod template;

// Re-export primary types at crate root for convenience
pub use catalog::{CatalogEntry, CatalogSource, ItemStats, SnapshotCatalog};
pub use config::{load_config, SystemOptions, TargetConfig, Templates, WatchConfig};
pub use dispatch::{Dispatcher, DispatchOutcome, EnvCommandPosterFactory, Poster, PosterFactory, SimulationOnly};
pub use engine::{Budget, Counters, RunId, RunMode, RunOrchestrator, RunReport, TargetReport};
pub use error::{CatalogError, ConfigError, CredentialError, PostError, WatchError, WatchResult};
pub use filter::{FilterVerdict, ItemFilter};
pub use history::{ActionType, HistoryKey, HistoryRecord};
pub use item::{ItemId, TrackedItem};
pub use milestone::{achieved_milestone, detect_achievement, detect_support, evaluate, Evaluation, SupportSignal};
pub use policy::{MilestonePolicy, StepRule, SupportTrigger};
pub use storage::{HistoryLedger, ItemStore, StorageError};
pub use template::{MessageContext, NumberStyle, SeededPicker, TemplatePicker, TemplateSet};
