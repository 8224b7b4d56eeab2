//! Logging setup for groupvault.
//!
//! Everything goes through `tracing`. Logs are written to stderr so JSON on
//! stdout stays parseable, and `RUST_LOG` overrides the level picked here.
//!
//! ```rust
//! use groupvault::logging::{init_logging, LogConfig};
//!
//! init_logging(&LogConfig::default());
//! tracing::info!("archive opened");
//! ```

use std::fmt::Display;
use std::io::IsTerminal;
use std::time::Instant;

use tracing_subscriber::{
    EnvFilter, Layer, filter::LevelFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt,
};

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Most verbose level shown for this crate.
    pub level: LevelFilter,
    pub format: LogFormat,
    /// Include timestamps.
    pub timestamps: bool,
    /// Include the module path of each event.
    pub target: bool,
    /// Also show `tower_http` request logs at `level`.
    pub http: bool,
}

/// Log line layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line, for reading debug output.
    Pretty,
    /// One line per event.
    Compact,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LevelFilter::INFO,
            format: LogFormat::Compact,
            timestamps: true,
            target: false,
            http: false,
        }
    }
}

impl LogConfig {
    /// Errors only, no timestamps.
    #[must_use]
    pub fn quiet() -> Self {
        Self {
            level: LevelFilter::ERROR,
            timestamps: false,
            ..Self::default()
        }
    }

    /// Debug level with targets and request logs.
    #[must_use]
    pub fn verbose() -> Self {
        Self {
            level: LevelFilter::DEBUG,
            format: LogFormat::Pretty,
            target: true,
            http: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn with_http(mut self, http: bool) -> Self {
        self.http = http;
        self
    }

    /// The filter used when `RUST_LOG` is not set.
    #[must_use]
    pub fn filter_directives(&self) -> String {
        let level = self.level.to_string().to_lowercase();
        if self.http {
            format!("groupvault={level},tower_http={level}")
        } else {
            format!("groupvault={level}")
        }
    }
}

/// Install the global subscriber. Later calls are no-ops.
pub fn init_logging(config: &LogConfig) {
    let filter = match std::env::var("RUST_LOG") {
        Ok(_) => EnvFilter::from_default_env(),
        Err(_) => EnvFilter::new(config.filter_directives()),
    };

    let base = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .with_target(config.target);

    let layer = match (config.format, config.timestamps) {
        (LogFormat::Pretty, true) => base.pretty().boxed(),
        (LogFormat::Pretty, false) => base.pretty().without_time().boxed(),
        (LogFormat::Compact, true) => base.compact().boxed(),
        (LogFormat::Compact, false) => base.compact().without_time().boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init()
        .ok();
}

/// Pick a preset from the global `-q`/`-v` flags. `http` adds request logs
/// when serving.
pub fn init_cli_logging(quiet: bool, verbose: bool, http: bool) {
    let config = if quiet {
        LogConfig::quiet()
    } else if verbose {
        LogConfig::verbose()
    } else {
        LogConfig::default().with_http(http)
    };
    init_logging(&config);
}

/// Logs when a long-running operation starts and how it ended.
pub struct OperationGuard {
    name: &'static str,
    start: Instant,
}

impl OperationGuard {
    pub fn new(name: &'static str) -> Self {
        tracing::info!(operation = name, "Starting");
        Self {
            name,
            start: Instant::now(),
        }
    }

    pub fn complete(self, outcome: impl Display) {
        tracing::info!(
            operation = self.name,
            elapsed_ms = self.start.elapsed().as_millis(),
            %outcome,
            "Finished"
        );
    }

    pub fn fail(self, error: &dyn std::error::Error) {
        tracing::error!(
            operation = self.name,
            elapsed_ms = self.start.elapsed().as_millis(),
            %error,
            "Failed"
        );
    }
}
