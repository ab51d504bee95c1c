//! Outbound notification dispatch.
//!
//! A `Dispatcher` wraps one account's `Poster` with success/failure
//! bookkeeping. When the account's poster cannot be built the dispatcher runs
//! in simulation mode: messages are logged instead of sent, and the attempt
//! still counts as delivered so the ledger is written.

use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{info, warn};

use crate::error::{CredentialError, PostError};

/// Sends one rendered message to the outside world.
pub trait Poster: Send + Sync {
    /// Delivers `text`.
    fn send(&self, text: &str) -> Result<(), PostError>;
}

/// Builds posters per account.
pub trait PosterFactory: Send + Sync {
    /// Returns the poster for `account`.
    fn poster_for(&self, account: &str) -> Result<Box<dyn Poster>, CredentialError>;
}

/// Result of a single dispatch attempt.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// The poster accepted the message.
    Sent,
    /// No poster is configured; the message was only logged.
    Simulated,
    /// The poster failed. The action stays pending.
    Failed(PostError),
}

impl DispatchOutcome {
    /// True for `Sent` and `Simulated`, the outcomes that are recorded.
    #[must_use]
    pub const fn is_delivered(&self) -> bool {
        matches!(self, Self::Sent | Self::Simulated)
    }
}

/// Counters for one dispatcher.
#[derive(Debug, Default)]
pub struct DispatchStats {
    sent: AtomicU64,
    simulated: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time copy of `DispatchStats`.
#[allow(missing_docs)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSnapshot {
    pub sent: u64,
    pub simulated: u64,
    pub failed: u64,
}

impl DispatchStats {
    /// Reads the current counters.
    #[must_use]
    pub fn snapshot(&self) -> DispatchSnapshot {
        DispatchSnapshot {
            sent: self.sent.load(Ordering::Relaxed),
            simulated: self.simulated.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Poster wrapper for one account.
pub struct Dispatcher {
    account: String,
    poster: Option<Box<dyn Poster>>,
    stats: Arc<DispatchStats>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("account", &self.account)
            .field("simulation", &self.is_simulation())
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Builds the dispatcher for `account`, degrading to simulation when the
    /// factory reports a credential error.
    pub fn for_account(factory: &dyn PosterFactory, account: &str) -> Self {
        match factory.poster_for(account) {
            Ok(poster) => Self::with_poster(account, poster),
            Err(e) => {
                warn!(account, error = %e, "poster unavailable, running in simulation mode");
                Self::simulated(account)
            }
        }
    }

    /// Dispatcher that sends through `poster`.
    #[must_use]
    pub fn with_poster(account: impl Into<String>, poster: Box<dyn Poster>) -> Self {
        Self {
            account: account.into(),
            poster: Some(poster),
            stats: Arc::new(DispatchStats::default()),
        }
    }

    /// Dispatcher that only logs.
    #[must_use]
    pub fn simulated(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            poster: None,
            stats: Arc::new(DispatchStats::default()),
        }
    }

    /// Account this dispatcher posts as.
    #[must_use]
    pub fn account(&self) -> &str {
        &self.account
    }

    /// Whether messages are only logged.
    #[must_use]
    pub const fn is_simulation(&self) -> bool {
        self.poster.is_none()
    }

    /// Shared counters.
    #[must_use]
    pub fn stats(&self) -> Arc<DispatchStats> {
        Arc::clone(&self.stats)
    }

    /// Sends `text`, or logs it in simulation mode.
    pub fn dispatch(&self, text: &str) -> DispatchOutcome {
        let Some(poster) = &self.poster else {
            info!(account = %self.account, text, "[simulation] would post");
            self.stats.simulated.fetch_add(1, Ordering::Relaxed);
            return DispatchOutcome::Simulated;
        };

        match poster.send(text) {
            Ok(()) => {
                self.stats.sent.fetch_add(1, Ordering::Relaxed);
                DispatchOutcome::Sent
            }
            Err(e) => {
                warn!(account = %self.account, error = %e, "post failed");
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                DispatchOutcome::Failed(e)
            }
        }
    }
}

/// Poster that pipes each message to an external command's stdin.
///
/// The command line is split on whitespace; no shell is involved. A non-zero
/// exit status is a rejection.
#[derive(Debug, Clone)]
pub struct CommandPoster {
    program: String,
    args: Vec<String>,
}

impl CommandPoster {
    /// Parses a command line such as `"post-tool --account main"`.
    pub fn parse(command_line: &str) -> Option<Self> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
        })
    }
}

impl Poster for CommandPoster {
    fn send(&self, text: &str) -> Result<(), PostError> {
        let transport = |e: std::io::Error| PostError::Transport {
            message: format!("{}: {e}", self.program),
        };

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(transport)?;

        if let Some(mut stdin) = child.stdin.take() {
            // A command that exits without reading is judged by its status.
            match stdin.write_all(text.as_bytes()) {
                Err(e) if e.kind() != std::io::ErrorKind::BrokenPipe => return Err(transport(e)),
                _ => {}
            }
        }

        let output = child.wait_with_output().map_err(transport)?;
        if output.status.success() {
            Ok(())
        } else {
            Err(PostError::Rejected {
                message: format!(
                    "{} exited with {}: {}",
                    self.program,
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            })
        }
    }
}

/// Environment lookup used by `EnvCommandPosterFactory`.
pub type EnvLookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Resolves `<ACCOUNT>_POST_COMMAND` into a `CommandPoster`.
pub struct EnvCommandPosterFactory {
    lookup: EnvLookup,
}

impl Default for EnvCommandPosterFactory {
    fn default() -> Self {
        Self {
            lookup: Box::new(|name| std::env::var(name).ok()),
        }
    }
}

impl EnvCommandPosterFactory {
    /// Factory that reads the process environment.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory with a custom lookup.
    #[must_use]
    pub fn with_lookup(lookup: EnvLookup) -> Self {
        Self { lookup }
    }

    /// Variable name holding the command for `account`.
    #[must_use]
    pub fn variable_for(account: &str) -> String {
        let account: String = account
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
            .collect();
        format!("{account}_POST_COMMAND")
    }
}

impl PosterFactory for EnvCommandPosterFactory {
    fn poster_for(&self, account: &str) -> Result<Box<dyn Poster>, CredentialError> {
        let variable = Self::variable_for(account);
        let value = (self.lookup)(&variable).ok_or_else(|| CredentialError::Missing {
            account: account.to_string(),
            variable: variable.clone(),
        })?;
        let poster = CommandPoster::parse(&value).ok_or_else(|| CredentialError::Unusable {
            account: account.to_string(),
            reason: format!("{variable} is empty"),
        })?;
        Ok(Box::new(poster))
    }
}

/// Factory that never yields a poster.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimulationOnly;

impl PosterFactory for SimulationOnly {
    fn poster_for(&self, account: &str) -> Result<Box<dyn Poster>, CredentialError> {
        Err(CredentialError::Missing {
            account: account.to_string(),
            variable: EnvCommandPosterFactory::variable_for(account),
        })
    }
}
