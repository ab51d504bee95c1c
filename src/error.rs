//! Error types for milestone-watch.
//!
//! All errors are strongly typed using thiserror, one enum per concern.
//! Configuration failures and storage failures (other than a duplicate
//! ledger key) are fatal to a run; every other error is handled at the item,
//! batch, or target boundary.

use std::path::PathBuf;

use thiserror::Error;

use crate::storage::StorageError;

/// Configuration errors. These abort a run before any evaluation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {message}")]
    Io {
        path: PathBuf,
        message: String,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Required field '{field}' is missing")]
    MissingField {
        field: String,
    },

    #[error("Invalid milestone policy for target '{target}': {reason}")]
    InvalidPolicy {
        target: String,
        reason: String,
    },

    #[error("Invalid template set '{name}': {reason}")]
    InvalidTemplate {
        name: String,
        reason: String,
    },

    #[error("Invalid system option '{option}': {reason}")]
    InvalidOption {
        option: String,
        reason: String,
    },
}

/// The posting collaborator for an account cannot be constructed.
///
/// A target whose account hits this error runs in simulation mode.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("No credentials configured for account '{account}' (expected {variable})")]
    Missing {
        account: String,
        variable: String,
    },

    #[error("Credentials for account '{account}' are unusable: {reason}")]
    Unusable {
        account: String,
        reason: String,
    },
}

/// Retrieval errors raised by a catalog source.
///
/// These are transient from the engine's point of view: the affected page or
/// batch is skipped for this run.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Catalog request failed: {message}")]
    Request {
        message: String,
    },

    #[error("Unknown catalog source: {source_id}")]
    UnknownSource {
        source_id: String,
    },

    #[error("Failed to decode catalog data: {message}")]
    Decode {
        message: String,
    },
}

impl CatalogError {
    /// Creates a request error.
    #[must_use]
    pub fn request(message: impl Into<String>) -> Self {
        Self::Request {
            message: message.into(),
        }
    }
}

/// Outbound notification failed. The action stays pending.
#[derive(Debug, Error)]
pub enum PostError {
    #[error("Poster rejected the message: {message}")]
    Rejected {
        message: String,
    },

    #[error("Poster transport failed: {message}")]
    Transport {
        message: String,
    },
}

/// Top-level error type for milestone-watch.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl WatchError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a configuration error.
    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Returns true if this error must abort the whole run.
    ///
    /// Catalog errors never abort a run; they are contained at the batch
    /// boundary and only surface here when a caller chooses to propagate one.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        match self {
            Self::Config(_) | Self::Internal { .. } => true,
            Self::Storage(e) => !matches!(e, StorageError::DuplicateAction(_)),
            Self::Catalog(_) => false,
        }
    }
}

/// Result type alias for milestone-watch operations.
pub type WatchResult<T> = Result<T, WatchError>;
