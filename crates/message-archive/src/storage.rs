//! On-disk layout of one account archive.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::{ArchiveError, ArchiveResult};

/// Layout version written to the `VERSION` marker.
pub const STORAGE_VERSION: u32 = 1;

const VERSION_FILE: &str = "VERSION";
const DOCUMENTS_DIR: &str = "documents";
const DATABASE_FILE: &str = "archive.sqlite";

/// Paths inside one account's archive directory.
#[derive(Debug, Clone)]
pub struct StorageLayout {
    dir: PathBuf,
}

impl StorageLayout {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn version_file(&self) -> PathBuf {
        self.dir.join(VERSION_FILE)
    }

    pub fn documents_dir(&self) -> PathBuf {
        self.dir.join(DOCUMENTS_DIR)
    }

    pub fn database_file(&self) -> PathBuf {
        self.dir.join(DATABASE_FILE)
    }

    /// True once the archive has been initialized on disk.
    pub fn exists(&self) -> bool {
        self.version_file().is_file()
    }

    /// Read the layout version, `None` if the marker is missing.
    pub fn version(&self) -> ArchiveResult<Option<u32>> {
        let path = self.version_file();
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&path)?;
        raw.trim()
            .parse()
            .map(Some)
            .map_err(|_| ArchiveError::Storage(format!("Corrupt version marker: {raw:?}")))
    }

    /// Create the directory tree and version marker if missing.
    ///
    /// Fails on a layout written by a newer version.
    pub fn initialize(&self) -> ArchiveResult<()> {
        std::fs::create_dir_all(self.documents_dir())?;

        match self.version()? {
            Some(version) if version > STORAGE_VERSION => Err(ArchiveError::Storage(format!(
                "Archive layout version {version} is newer than supported {STORAGE_VERSION}"
            ))),
            Some(_) => Ok(()),
            None => {
                std::fs::write(self.version_file(), format!("{STORAGE_VERSION}\n"))?;
                info!(dir = %self.dir.display(), version = STORAGE_VERSION, "Archive storage initialized");
                Ok(())
            }
        }
    }

    /// Remove the archive directory. Missing directories are not an error.
    pub fn remove(&self) -> ArchiveResult<()> {
        match std::fs::remove_dir_all(&self.dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
