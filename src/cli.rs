//! CLI definitions for groupvault.
//!
//! Uses clap for argument parsing with derive macros.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// groupvault - archive and search a chat group's history
#[derive(Parser, Debug)]
#[command(name = "groupvault")]
#[command(version)]
#[command(about = "Archive a GroupMe group's message history into SQLite and search it")]
#[command(long_about = r#"
groupvault crawls a group's message history backward from the newest message,
stores every message with its attachments and favorites in SQLite, and keeps a
full-text index beside it.

Quick start:
  1. export GROUPME_TOKEN=... GROUPME_GROUP_ID=...   (or put them in .env)
  2. Run: groupvault ingest
  3. Search: groupvault search "your query"
  4. Browse: groupvault serve --static-dir ./static
"#)]
pub struct Cli {
    /// Path to the database file
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Path to a config file (default: ~/.config/groupvault/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, short = 'f', default_value = "text", global = true)]
    pub format: OutputFormat,

    /// Be verbose (show debug info)
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    /// Be quiet (suppress non-error output)
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Crawl the group's history into the archive
    Ingest(IngestArgs),

    /// Serve the archive over HTTP
    Serve(ServeArgs),

    /// Full-text search the archive
    Search(SearchArgs),

    /// Show a message with the messages around it
    Show(ShowArgs),

    /// List messages before a message, newest first
    Before(PageArgs),

    /// List messages after a message, oldest first
    After(PageArgs),

    /// Show archive statistics
    Stats,

    /// Check that the search index matches stored messages
    Verify(VerifyArgs),

    /// Show or initialize configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Args, Debug)]
pub struct IngestArgs {
    /// Access token (overrides GROUPME_TOKEN)
    #[arg(long)]
    pub token: Option<String>,

    /// Group id (overrides GROUPME_GROUP_ID)
    #[arg(long)]
    pub group: Option<String>,

    /// Resume from this message id instead of the newest message
    #[arg(long)]
    pub before_id: Option<String>,

    /// Pause between pages in milliseconds
    #[arg(long)]
    pub delay_ms: Option<u64>,

    /// Stop after this many pages
    #[arg(long)]
    pub max_pages: Option<usize>,
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to bind
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(long, short = 'p')]
    pub port: Option<u16>,

    /// Directory of static files served for unmatched paths
    #[arg(long)]
    pub static_dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct SearchArgs {
    /// Search query (FTS5 syntax: phrases in quotes, AND/OR/NOT, prefix*)
    pub query: String,

    /// Maximum number of results
    #[arg(long, short = 'n')]
    pub limit: Option<usize>,
}

#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Message id
    pub id: String,

    /// Messages to show on each side
    #[arg(long, short = 'w')]
    pub window: Option<usize>,
}

#[derive(Args, Debug)]
pub struct PageArgs {
    /// Anchor message id
    pub id: String,

    /// Maximum number of messages
    #[arg(long, short = 'n')]
    pub limit: Option<usize>,
}

#[derive(Args, Debug)]
pub struct VerifyArgs {
    /// Rebuild the search index if it has drifted
    #[arg(long)]
    pub fix: bool,
}

#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Show effective configuration
    #[arg(long)]
    pub show: bool,

    /// Write a default config file
    #[arg(long)]
    pub init: bool,
}

#[derive(Args, Debug, Clone)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    JsonPretty,
    Compact,
}
