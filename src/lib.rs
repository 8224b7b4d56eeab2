//! groupvault - archive a chat group's history into `SQLite` and search it
//!
//! This library crawls a group's message feed backward into a local store,
//! keeps a full-text index beside it, and answers time-ordered pagination and
//! search queries over the archive.
//!
//! # Modules
//!
//! - [`cli`] - Command-line interface definitions
//! - [`config`] - Layered configuration
//! - [`error`] - Custom error types with rich context
//! - [`feed`] - Upstream feed client
//! - [`ingest`] - Backward crawl of the feed into storage
//! - [`model`] - Data models for messages and attachments
//! - [`query`] - Pagination, search and detail views
//! - [`server`] - HTTP surface
//! - [`storage`] - `SQLite` storage layer with FTS5 index

pub mod cli;
pub mod config;
pub mod error;
pub mod feed;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod query;
pub mod server;
pub mod storage;

pub use config::Config;
pub use error::{Result, ResultExt, VaultError};
pub use feed::{FeedClient, GroupMeClient};
pub use ingest::{IngestOptions, IngestReport, Ingestor};
pub use model::*;
pub use query::{QueryEngine, QueryLimits};
pub use storage::Storage;

use chrono::{DateTime, Utc};

/// Default database filename
pub const DEFAULT_DB_NAME: &str = "groupvault.db";

/// Standard width for content dividers in CLI output
pub const CONTENT_DIVIDER_WIDTH: usize = 60;

const BYTES_PER_KB: u64 = 1024;
const BYTES_PER_MB: u64 = 1024 * 1024;
const BYTES_PER_GB: u64 = 1024 * 1024 * 1024;

/// Get the default data directory for groupvault
#[must_use]
pub fn default_data_dir() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("groupvault")
}

/// Get the default database path
#[must_use]
pub fn default_db_path() -> std::path::PathBuf {
    default_data_dir().join(DEFAULT_DB_NAME)
}

/// Format an integer with thousands separators.
#[must_use]
pub fn format_number(value: i64) -> String {
    let abs = value.unsigned_abs().to_string();
    let mut out = String::with_capacity(abs.len() + abs.len() / 3);

    for (idx, ch) in abs.chars().rev().enumerate() {
        if idx > 0 && idx % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }

    let mut formatted: String = out.chars().rev().collect();
    if value < 0 {
        formatted.insert(0, '-');
    }
    formatted
}

/// Format a usize with thousands separators.
#[must_use]
pub fn format_number_usize(value: usize) -> String {
    format_number(i64::try_from(value).unwrap_or(i64::MAX))
}

/// Describe the time between the oldest and newest archived message.
#[must_use]
pub fn format_span(first: DateTime<Utc>, last: DateTime<Utc>) -> String {
    let span = last.signed_duration_since(first);
    let days = span.num_days();
    let plural = |n: i64, unit: &str| {
        if n == 1 {
            format!("1 {unit}")
        } else {
            format!("{n} {unit}s")
        }
    };

    if span.num_hours() < 1 {
        "under an hour".to_string()
    } else if days < 1 {
        plural(span.num_hours(), "hour")
    } else if days < 365 {
        plural(days, "day")
    } else {
        format!("{}, {}", plural(days / 365, "year"), plural(days % 365, "day"))
    }
}

/// Format an epoch-seconds timestamp as `YYYY-MM-DD HH:MM` UTC.
#[must_use]
pub fn format_epoch(seconds: i64) -> String {
    DateTime::<Utc>::from_timestamp(seconds, 0).map_or_else(
        || seconds.to_string(),
        |dt| dt.format("%Y-%m-%d %H:%M").to_string(),
    )
}

/// Format bytes into a human-friendly string.
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    if bytes < BYTES_PER_KB {
        format!("{bytes} B")
    } else if bytes < BYTES_PER_MB {
        format_bytes_with_unit(bytes, BYTES_PER_KB, "KB")
    } else if bytes < BYTES_PER_GB {
        format_bytes_with_unit(bytes, BYTES_PER_MB, "MB")
    } else {
        format_bytes_with_unit(bytes, BYTES_PER_GB, "GB")
    }
}

fn format_bytes_with_unit(bytes: u64, unit: u64, suffix: &str) -> String {
    let whole = bytes / unit;
    let tenths = (bytes % unit) * 10 / unit;
    format!("{whole}.{tenths} {suffix}")
}
