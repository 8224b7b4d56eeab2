//! Configuration system for groupvault.
//!
//! Provides layered configuration from multiple sources:
//!
//! 1. **Compiled defaults** - Sensible defaults built into the binary
//! 2. **Config file** - `~/.config/groupvault/config.toml`, or `--config`
//! 3. **`.env` file** - loaded into the process environment if present
//! 4. **Environment variables** - `GROUPME_*` and `GROUPVAULT_*`
//! 5. **CLI arguments** - Highest priority, always wins
//!
//! # Example Configuration File
//!
//! ```toml
//! [paths]
//! db = "~/.local/share/groupvault/groupvault.db"
//!
//! [feed]
//! group_id = "12345678"
//! page_size = 100
//! delay_ms = 2000
//!
//! [server]
//! host = "127.0.0.1"
//! port = 8080
//!
//! [query]
//! search_limit = 10
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{Result, ResultExt, VaultError};
use crate::query::QueryLimits;

/// Default upstream API root.
pub const DEFAULT_BASE_URL: &str = "https://api.groupme.com/v3";

/// Main configuration structure for groupvault.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path-related configuration.
    pub paths: PathsConfig,
    /// Upstream feed configuration.
    pub feed: FeedConfig,
    /// HTTP server configuration.
    pub server: ServerConfig,
    /// Query size limits.
    pub query: QueryConfig,
}

/// Path configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Path to the `SQLite` database file.
    /// Environment variable: `GROUPVAULT_DB`
    pub db: Option<PathBuf>,
}

/// Upstream feed configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Access token. Environment variable: `GROUPME_TOKEN`
    pub token: Option<String>,
    /// Group to archive. Environment variable: `GROUPME_GROUP_ID`
    pub group_id: Option<String>,
    pub base_url: String,
    /// Messages requested per page.
    pub page_size: u32,
    /// Pause between pages in milliseconds.
    /// Environment variable: `GROUPVAULT_DELAY_MS`
    pub delay_ms: u64,
    pub timeout_secs: u64,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Environment variable: `GROUPVAULT_HOST`
    pub host: String,
    /// Environment variable: `GROUPVAULT_PORT`
    pub port: u16,
    /// Directory served for unmatched paths.
    /// Environment variable: `GROUPVAULT_STATIC_DIR`
    pub static_dir: Option<PathBuf>,
}

/// Query size limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    pub search_limit: usize,
    pub detail_window: usize,
    pub max_page: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            token: None,
            group_id: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            page_size: 100,
            delay_ms: 2000,
            timeout_secs: 30,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            static_dir: None,
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        let limits = QueryLimits::default();
        Self {
            search_limit: limits.search_limit,
            detail_window: limits.detail_window,
            max_page: limits.max_page,
        }
    }
}

impl FeedConfig {
    /// Pause between page requests.
    #[must_use]
    pub const fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// Load a `.env` file from the working directory into the process
/// environment. A missing file is not an error.
pub fn load_dotenv() {
    match dotenvy::dotenv() {
        Ok(path) => debug!("Loaded environment from {}", path.display()),
        Err(e) if e.not_found() => {}
        Err(e) => warn!("Failed to load .env: {}", e),
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// An explicit `path` must exist and parse; the user config file is
    /// optional and a broken one is skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::ConfigError`] for an unreadable explicit file and
    /// [`VaultError::EnvVarError`] for a malformed numeric variable.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();

        match path {
            Some(path) => config.merge(Self::read_file(path)?),
            None => {
                if let Some(user_config) = Self::load_user_config() {
                    config.merge(user_config);
                }
            }
        }

        config.apply_env_overrides()?;

        debug!("Configuration loaded: {:?}", config.redacted());
        Ok(config)
    }

    /// Read and parse a config file.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::ConfigError`] if the file cannot be read or parsed.
    pub fn read_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| VaultError::ConfigError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let config = toml::from_str(&content).map_err(|e| VaultError::ConfigError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        info!("Loaded config from: {}", path.display());
        Ok(config)
    }

    /// Load configuration from a file, or `None` if it is absent or broken.
    pub fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            debug!("Config file not found: {}", path.display());
            return None;
        }

        match Self::read_file(path) {
            Ok(config) => Some(config),
            Err(e) => {
                warn!("{}", e);
                None
            }
        }
    }

    fn load_user_config() -> Option<Self> {
        let config_path = Self::user_config_path()?;
        Self::load_from_file(&config_path)
    }

    /// Get the path to the user configuration file.
    #[must_use]
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("groupvault").join("config.toml"))
    }

    /// Apply overrides from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::EnvVarError`] if a numeric variable does not parse.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_env_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides using `lookup` to read variables.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::EnvVarError`] if a numeric variable does not parse.
    pub fn apply_env_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        // Feed credentials
        if let Some(token) = get("GROUPME_TOKEN") {
            self.feed.token = Some(token);
        }
        if let Some(group_id) = get("GROUPME_GROUP_ID") {
            self.feed.group_id = Some(group_id);
        }
        if let Some(delay) = get("GROUPVAULT_DELAY_MS") {
            self.feed.delay_ms = parse_var("GROUPVAULT_DELAY_MS", &delay)?;
        }

        // Paths
        if let Some(db) = get("GROUPVAULT_DB") {
            self.paths.db = Some(PathBuf::from(db));
        }

        // Server
        if let Some(host) = get("GROUPVAULT_HOST") {
            self.server.host = host;
        }
        if let Some(port) = get("GROUPVAULT_PORT") {
            self.server.port = parse_var("GROUPVAULT_PORT", &port)?;
        }
        if let Some(dir) = get("GROUPVAULT_STATIC_DIR") {
            self.server.static_dir = Some(PathBuf::from(dir));
        }

        Ok(())
    }

    /// Merge another config into this one (other takes precedence).
    fn merge(&mut self, other: Self) {
        // Paths
        if other.paths.db.is_some() {
            self.paths.db = other.paths.db;
        }

        // Feed
        if other.feed.token.is_some() {
            self.feed.token = other.feed.token;
        }
        if other.feed.group_id.is_some() {
            self.feed.group_id = other.feed.group_id;
        }
        self.feed.base_url = other.feed.base_url;
        self.feed.page_size = other.feed.page_size;
        self.feed.delay_ms = other.feed.delay_ms;
        self.feed.timeout_secs = other.feed.timeout_secs;

        // Server
        self.server.host = other.server.host;
        self.server.port = other.server.port;
        if other.server.static_dir.is_some() {
            self.server.static_dir = other.server.static_dir;
        }

        // Query
        self.query = other.query;
    }

    /// Get the database path, using defaults if not configured.
    pub fn db_path(&self) -> PathBuf {
        self.paths
            .db
            .clone()
            .unwrap_or_else(crate::default_db_path)
    }

    /// Query limits with zero values replaced by defaults.
    #[must_use]
    pub fn query_limits(&self) -> QueryLimits {
        let defaults = QueryLimits::default();
        let or_default = |value: usize, default: usize| if value == 0 { default } else { value };
        QueryLimits {
            search_limit: or_default(self.query.search_limit, defaults.search_limit),
            detail_window: or_default(self.query.detail_window, defaults.detail_window),
            max_page: or_default(self.query.max_page, defaults.max_page),
        }
    }

    /// Check that the feed credentials are present before any request is made.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::EnvVarError`] naming the missing variable.
    pub fn validate_feed(&self) -> Result<()> {
        let missing = |value: &Option<String>| value.as_deref().is_none_or(|v| v.trim().is_empty());
        if missing(&self.feed.token) {
            return Err(VaultError::env_var("GROUPME_TOKEN", "access token is not set"));
        }
        if missing(&self.feed.group_id) {
            return Err(VaultError::env_var("GROUPME_GROUP_ID", "group id is not set"));
        }
        if self.feed.page_size == 0 {
            return Err(VaultError::ConfigError {
                path: Self::user_config_path().unwrap_or_default(),
                reason: "feed.page_size must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// A copy safe to print or log: the access token is masked.
    #[must_use]
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.feed.token.is_some() {
            copy.feed.token = Some("********".to_string());
        }
        copy
    }

    /// Write this configuration to `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent directory cannot be created or the file
    /// cannot be written.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .context(format!("Creating {}", parent.display()))?;
        }

        let content = toml::to_string_pretty(self).map_err(|e| VaultError::ConfigError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        std::fs::write(path, content).context(format!("Writing {}", path.display()))?;
        info!("Saved config to: {}", path.display());
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(var: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| VaultError::env_var(var, format!("'{value}' is not a valid number")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.feed.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.feed.page_size, 100);
        assert_eq!(config.feed.delay(), Duration::from_secs(2));
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.query_limits(), QueryLimits::default());
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml).unwrap();
        assert_eq!(config.server.port, parsed.server.port);
        assert_eq!(config.query.search_limit, parsed.query.search_limit);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let parsed: Config = toml::from_str("[feed]\ngroup_id = \"77\"\n").unwrap();
        assert_eq!(parsed.feed.group_id.as_deref(), Some("77"));
        assert_eq!(parsed.feed.page_size, 100);
        assert_eq!(parsed.server.host, "127.0.0.1");
    }

    #[test]
    fn test_config_merge() {
        let mut base = Config::default();
        base.feed.token = Some("from-base".to_string());
        let mut other = Config::default();
        other.server.port = 9000;
        other.paths.db = Some(PathBuf::from("/custom/path"));

        base.merge(other);

        assert_eq!(base.server.port, 9000);
        assert_eq!(base.paths.db, Some(PathBuf::from("/custom/path")));
        assert_eq!(base.feed.token.as_deref(), Some("from-base"));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_env_overrides_from(env(&[
                ("GROUPME_TOKEN", "tok"),
                ("GROUPME_GROUP_ID", "123"),
                ("GROUPVAULT_DB", "/tmp/gv.db"),
                ("GROUPVAULT_PORT", "9191"),
                ("GROUPVAULT_DELAY_MS", "0"),
                ("GROUPVAULT_HOST", ""),
            ]))
            .unwrap();

        assert_eq!(config.feed.token.as_deref(), Some("tok"));
        assert_eq!(config.feed.group_id.as_deref(), Some("123"));
        assert_eq!(config.db_path(), PathBuf::from("/tmp/gv.db"));
        assert_eq!(config.server.port, 9191);
        assert!(config.feed.delay().is_zero());
        // Empty values do not override.
        assert_eq!(config.server.host, "127.0.0.1");
        config.validate_feed().unwrap();
    }

    #[test]
    fn test_bad_port_is_env_error() {
        let mut config = Config::default();
        let err = config
            .apply_env_overrides_from(env(&[("GROUPVAULT_PORT", "eighty")]))
            .unwrap_err();
        assert!(matches!(err, VaultError::EnvVarError { ref var, .. } if var == "GROUPVAULT_PORT"));
    }

    #[test]
    fn test_validate_feed_reports_missing_token() {
        let mut config = Config::default();
        config.feed.group_id = Some("1".to_string());
        let err = config.validate_feed().unwrap_err();
        assert!(matches!(err, VaultError::EnvVarError { ref var, .. } if var == "GROUPME_TOKEN"));
    }

    #[test]
    fn test_redacted_masks_token() {
        let mut config = Config::default();
        config.feed.token = Some("super-secret".to_string());
        let shown = toml::to_string(&config.redacted()).unwrap();
        assert!(!shown.contains("super-secret"));
    }

    #[test]
    fn test_zero_limits_fall_back() {
        let mut config = Config::default();
        config.query.max_page = 0;
        assert_eq!(config.query_limits().max_page, 100);
    }

    #[test]
    fn test_explicit_file_must_parse() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[server\nport = ").unwrap();
        assert!(matches!(
            Config::load(Some(path.as_path())),
            Err(VaultError::ConfigError { .. })
        ));
    }

    #[test]
    fn test_save_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config.feed.group_id = Some("555".to_string());
        config.save_to(&path).unwrap();

        let loaded = Config::read_file(&path).unwrap();
        assert_eq!(loaded.feed.group_id.as_deref(), Some("555"));
    }
}
