//! File system paths for the archive.

use crate::{CoreError, CoreResult};
use std::path::PathBuf;

/// Base directory name under the user's home directory.
const BASE_DIR_NAME: &str = ".mam-archive";
/// Directory holding one subdirectory per account archive.
const ACCOUNTS_DIR_NAME: &str = "accounts";
/// Directory holding one sync index file per account.
const SYNC_INDEX_DIR_NAME: &str = "sync-index";

/// Manages file system paths for the archive.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Base directory for config and logs (~/.mam-archive)
    base_dir: PathBuf,
    /// Root directory for per-account storage (~/.mam-archive/accounts)
    storage_root: PathBuf,
}

impl Paths {
    /// Create a new Paths instance rooted at `~/.mam-archive`.
    pub fn new() -> CoreResult<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| CoreError::Path("Could not determine home directory".to_string()))?;

        Ok(Self::with_base_dir(home.join(BASE_DIR_NAME)))
    }

    /// Create a new Paths instance with a custom base directory.
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self {
            storage_root: base_dir.join(ACCOUNTS_DIR_NAME),
            base_dir,
        }
    }

    /// Replace the storage root, keeping the base directory.
    pub fn with_storage_root(mut self, storage_root: PathBuf) -> Self {
        self.storage_root = storage_root;
        self
    }

    /// Get the base directory.
    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    /// Get the config file path (<base>/config.json).
    pub fn config_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    /// Get the logs directory (<base>/logs).
    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    /// Get the archive log file path (<base>/logs/archive.log).
    pub fn log_file(&self) -> PathBuf {
        self.logs_dir().join("archive.log")
    }

    /// Get the storage root holding per-account archives.
    pub fn storage_root(&self) -> &PathBuf {
        &self.storage_root
    }

    /// Get the storage directory of one account's archive.
    ///
    /// `account` must be a bare address; it is used verbatim as a directory name.
    pub fn account_dir(&self, account: &str) -> PathBuf {
        self.storage_root.join(account)
    }

    /// Get the directory holding persisted sync indexes.
    pub fn sync_index_dir(&self) -> PathBuf {
        self.storage_root.join(SYNC_INDEX_DIR_NAME)
    }

    /// Get the sync index file of one account.
    pub fn sync_index_file(&self, account: &str) -> PathBuf {
        self.sync_index_dir().join(format!("{account}.json"))
    }

    /// Ensure all required directories exist.
    pub fn ensure_dirs(&self) -> CoreResult<()> {
        std::fs::create_dir_all(&self.base_dir)?;
        std::fs::create_dir_all(&self.storage_root)?;
        std::fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_paths_with_base_dir() {
        let base = PathBuf::from("/tmp/test-archive");
        let paths = Paths::with_base_dir(base.clone());

        assert_eq!(paths.base_dir(), &base);
        assert_eq!(paths.config_file(), base.join("config.json"));
        assert_eq!(paths.logs_dir(), base.join("logs"));
        assert_eq!(paths.log_file(), base.join("logs/archive.log"));
        assert_eq!(paths.storage_root(), &base.join("accounts"));
        assert_eq!(
            paths.account_dir("alice@example.com"),
            base.join("accounts/alice@example.com")
        );
        assert_eq!(
            paths.sync_index_file("alice@example.com"),
            base.join("accounts/sync-index/alice@example.com.json")
        );
    }

    #[test]
    fn test_with_storage_root_keeps_base() {
        let paths = Paths::with_base_dir(PathBuf::from("/base"))
            .with_storage_root(PathBuf::from("/data"));

        assert_eq!(paths.config_file(), PathBuf::from("/base/config.json"));
        assert_eq!(paths.account_dir("a@b"), PathBuf::from("/data/a@b"));
    }

    #[test]
    fn test_paths_default() {
        let paths = Paths::new().unwrap();
        let home = dirs::home_dir().unwrap();

        assert_eq!(paths.base_dir(), &home.join(".mam-archive"));
    }

    #[test]
    fn test_ensure_dirs_creates_directories() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("archive");
        let paths = Paths::with_base_dir(base.clone());

        assert!(!base.exists());

        paths.ensure_dirs().unwrap();
        paths.ensure_dirs().unwrap();

        assert!(base.is_dir());
        assert!(paths.logs_dir().is_dir());
        assert!(paths.storage_root().is_dir());
    }
}
