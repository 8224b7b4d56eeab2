//! Custom error types for groupvault.
//!
//! Provides structured error handling with enough context to tell the
//! ingestion failures (fatal, operator-visible) apart from per-request query
//! failures (returned to the caller, never fatal to the server).

use std::path::PathBuf;
use thiserror::Error;

use crate::model::Direction;

/// Primary error type for groupvault operations.
#[derive(Error, Debug)]
pub enum VaultError {
    // =========================================================================
    // Feed Errors (fatal to an ingestion run)
    // =========================================================================
    /// Transport failure talking to the upstream feed.
    #[error("Feed request failed: {reason}")]
    Feed { reason: String },

    /// Upstream answered with a non-success status.
    #[error("Feed returned HTTP {status} for {url}")]
    FeedStatus { status: u16, url: String },

    /// Upstream body could not be decoded as a message page.
    #[error("Failed to decode feed page: {0}")]
    FeedDecode(#[from] serde_json::Error),

    // =========================================================================
    // Store Errors
    // =========================================================================
    /// Schema creation or migration failed. Fatal at startup.
    #[error("Failed to initialize schema: {reason}")]
    Schema { reason: String },

    /// A single message could not be persisted.
    #[error("Failed to store message '{id}': {source}")]
    StoreWrite {
        id: String,
        #[source]
        source: rusqlite::Error,
    },

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    // =========================================================================
    // Lookup Errors
    // =========================================================================
    /// No such record.
    #[error("{item_type} with ID '{id}' not found")]
    NotFound { item_type: &'static str, id: String },

    /// The anchor has no temporal neighbor on the requested side.
    #[error("No message {direction} '{anchor}'")]
    NoNeighbor { anchor: String, direction: Direction },

    /// Full-text query rejected by the index.
    #[error("Invalid search query: {reason}")]
    InvalidQuery { reason: String },

    // =========================================================================
    // IO / Configuration Errors
    // =========================================================================
    /// File read/write error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Configuration file parsing error.
    #[error("Invalid configuration in '{path}': {reason}")]
    ConfigError { path: PathBuf, reason: String },

    /// Missing or malformed environment variable.
    #[error("Invalid environment variable {var}: {reason}")]
    EnvVarError { var: String, reason: String },

    // =========================================================================
    // Generic Errors
    // =========================================================================
    /// Catch-all for other errors with context.
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for groupvault operations.
pub type Result<T> = std::result::Result<T, VaultError>;

impl VaultError {
    /// Create a feed transport error.
    pub fn feed(reason: impl Into<String>) -> Self {
        Self::Feed {
            reason: reason.into(),
        }
    }

    /// Create a schema error.
    pub fn schema(reason: impl Into<String>) -> Self {
        Self::Schema {
            reason: reason.into(),
        }
    }

    /// Create a not found error.
    pub fn not_found(item_type: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            item_type,
            id: id.into(),
        }
    }

    /// Create a boundary error for pagination.
    pub fn no_neighbor(anchor: impl Into<String>, direction: Direction) -> Self {
        Self::NoNeighbor {
            anchor: anchor.into(),
            direction,
        }
    }

    /// Create an invalid query error.
    pub fn invalid_query(reason: impl Into<String>) -> Self {
        Self::InvalidQuery {
            reason: reason.into(),
        }
    }

    /// Create an environment variable error.
    pub fn env_var(var: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::EnvVarError {
            var: var.into(),
            reason: reason.into(),
        }
    }

    /// Wrap an error with additional context.
    pub fn with_context<E>(context: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::WithContext {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// True for both "no such message" and "no neighbor in that direction".
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::NoNeighbor { .. })
    }

    /// True for failures talking to the upstream feed.
    #[must_use]
    pub const fn is_feed_error(&self) -> bool {
        matches!(
            self,
            Self::Feed { .. } | Self::FeedStatus { .. } | Self::FeedDecode(_)
        )
    }

    /// Check if this error is recoverable (user can fix it).
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. }
                | Self::NoNeighbor { .. }
                | Self::InvalidQuery { .. }
                | Self::EnvVarError { .. }
                | Self::ConfigError { .. }
        )
    }

    /// Short machine-readable tag used in API error payloads.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Feed { .. } | Self::FeedStatus { .. } | Self::FeedDecode(_) => "feed_error",
            Self::Schema { .. } => "schema_error",
            Self::StoreWrite { .. } => "store_write_error",
            Self::NotFound { .. } | Self::NoNeighbor { .. } => "not_found",
            Self::InvalidQuery { .. } => "invalid_query",
            Self::ConfigError { .. } | Self::EnvVarError { .. } => "config_error",
            Self::Database(_)
            | Self::IoError(_)
            | Self::WithContext { .. }
            | Self::Other(_) => "internal_error",
        }
    }

    /// Get a suggestion for how to fix this error, if applicable.
    #[must_use]
    pub const fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::EnvVarError { .. } => Some(
                "Set GROUPME_TOKEN and GROUPME_GROUP_ID in the environment or a .env file.",
            ),
            Self::FeedStatus { .. } => {
                Some("Check the access token and group id; rerun with --before-id to resume.")
            }
            Self::Schema { .. } => {
                Some("Remove the database file and run 'groupvault ingest' again.")
            }
            Self::InvalidQuery { .. } => Some(
                "Check query syntax. Use quotes for phrases, AND/OR for boolean, * for prefixes.",
            ),
            _ => None,
        }
    }
}

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Add context to an error.
    ///
    /// # Errors
    ///
    /// Returns the original error wrapped with additional context.
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| VaultError::with_context(context, e))
    }
}
