//! Configuration management for the archive.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";
/// Default SQLite busy timeout in milliseconds.
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;
/// Default maximum connections per account pool.
pub const DEFAULT_POOL_MAX_SIZE: u32 = 4;
/// Default number of messages requested per MAM page.
pub const DEFAULT_MAM_PAGE_SIZE: u32 = 50;
/// Default timeout for one MAM page request.
pub const DEFAULT_MAM_TIMEOUT_SECS: u64 = 30;

/// Archive configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Overrides the default per-account storage root.
    #[serde(default)]
    pub storage_root: Option<PathBuf>,
    /// SQLite busy-retry window.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// Maximum pooled connections per open archive.
    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,
    /// Messages requested per MAM page.
    #[serde(default = "default_mam_page_size")]
    pub mam_page_size: u32,
    /// Timeout for one MAM page request.
    #[serde(default = "default_mam_timeout_secs")]
    pub mam_timeout_secs: u64,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

fn default_pool_max_size() -> u32 {
    DEFAULT_POOL_MAX_SIZE
}

fn default_mam_page_size() -> u32 {
    DEFAULT_MAM_PAGE_SIZE
}

fn default_mam_timeout_secs() -> u64 {
    DEFAULT_MAM_TIMEOUT_SECS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            storage_root: None,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            pool_max_size: DEFAULT_POOL_MAX_SIZE,
            mam_page_size: DEFAULT_MAM_PAGE_SIZE,
            mam_timeout_secs: DEFAULT_MAM_TIMEOUT_SECS,
        }
    }
}

impl Config {
    /// Create a new Config with default values, then override from environment.
    pub fn new() -> Self {
        let mut config = Self::default();
        config.load_from_env();
        config
    }

    /// Load configuration from the config file, falling back to defaults.
    ///
    /// Environment variables are applied last.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the config file.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    /// Apply the storage root override (if any) to a set of paths.
    pub fn resolve_paths(&self, paths: Paths) -> Paths {
        match &self.storage_root {
            Some(root) => paths.with_storage_root(root.clone()),
            None => paths,
        }
    }

    /// SQLite busy timeout as a duration.
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// MAM page request timeout as a duration.
    pub fn mam_timeout(&self) -> Duration {
        Duration::from_secs(self.mam_timeout_secs)
    }

    fn validate(&self) -> CoreResult<()> {
        if self.pool_max_size == 0 {
            return Err(CoreError::Config("pool_max_size must be at least 1".to_string()));
        }
        if self.mam_page_size == 0 {
            return Err(CoreError::Config("mam_page_size must be at least 1".to_string()));
        }
        Ok(())
    }

    fn load_from_env(&mut self) {
        if let Ok(log_level) = std::env::var("ARCHIVE_LOG_LEVEL") {
            self.log_level = log_level;
        }
        if let Ok(root) = std::env::var("ARCHIVE_STORAGE_ROOT") {
            if !root.trim().is_empty() {
                self.storage_root = Some(PathBuf::from(root));
            }
        }
        if let Some(size) = parse_env("ARCHIVE_MAM_PAGE_SIZE") {
            self.mam_page_size = size;
        }
        if let Some(secs) = parse_env("ARCHIVE_MAM_TIMEOUT_SECS") {
            self.mam_timeout_secs = secs;
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|raw| raw.trim().parse().ok())
}
