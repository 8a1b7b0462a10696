//! Connection pool for one archive database.
//!
//! WAL mode lets pooled readers proceed while a write is in progress.

use std::path::Path;
use std::time::Duration;

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use tracing::info;

use crate::{migrations, ArchiveResult};

/// Configuration for the archive pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum connections in the pool.
    pub max_size: u32,
    /// How long SQLite retries a locked database.
    pub busy_timeout: Duration,
    /// Connection acquisition timeout.
    pub connection_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: archive_config_and_utils::DEFAULT_POOL_MAX_SIZE,
            busy_timeout: Duration::from_millis(archive_config_and_utils::DEFAULT_BUSY_TIMEOUT_MS),
            connection_timeout: Duration::from_secs(30),
        }
    }
}

/// Thread-safe pool of connections to one archive database.
#[derive(Clone)]
pub struct ArchivePool {
    pool: Pool<SqliteConnectionManager>,
}

impl ArchivePool {
    /// Open the database, creating it if needed, and run pending migrations.
    pub fn open(path: &Path, config: &PoolConfig) -> ArchiveResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let busy_timeout_ms = config.busy_timeout.as_millis();
        let manager = SqliteConnectionManager::file(path).with_init(move |conn| {
            conn.execute_batch(&format!(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                PRAGMA foreign_keys = ON;
                PRAGMA temp_store = MEMORY;
                PRAGMA busy_timeout = {busy_timeout_ms};
                "
            ))?;
            Ok(())
        });

        let pool = Pool::builder()
            .max_size(config.max_size)
            .min_idle(Some(1))
            .connection_timeout(config.connection_timeout)
            .build(manager)?;

        info!(
            path = %path.display(),
            max_size = config.max_size,
            "Archive pool created"
        );

        {
            let conn = pool.get()?;
            migrations::run_migrations(&conn)?;
        }

        Ok(Self { pool })
    }

    /// Get a connection, blocking until one is available or the timeout passes.
    pub fn get(&self) -> ArchiveResult<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    /// Connections currently open (active + idle).
    pub fn connections(&self) -> u32 {
        self.pool.state().connections
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_pool_open_runs_migrations() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("nested/archive.sqlite");

        let pool = ArchivePool::open(&db_path, &PoolConfig::default()).unwrap();
        let conn = pool.get().unwrap();

        assert_eq!(
            migrations::schema_version(&conn).unwrap(),
            migrations::CURRENT_VERSION
        );
        let mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[test]
    fn test_pool_applies_busy_timeout() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config = PoolConfig {
            busy_timeout: Duration::from_millis(1234),
            ..PoolConfig::default()
        };
        let pool = ArchivePool::open(&temp_dir.path().join("a.sqlite"), &config).unwrap();

        let timeout: i64 = pool
            .get()
            .unwrap()
            .query_row("PRAGMA busy_timeout", [], |row| row.get(0))
            .unwrap();
        assert_eq!(timeout, 1234);
    }

    #[test]
    fn test_pool_concurrent_access() {
        let temp_dir = tempfile::tempdir().unwrap();
        let pool = Arc::new(
            ArchivePool::open(&temp_dir.path().join("c.sqlite"), &PoolConfig::default()).unwrap(),
        );

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let pool = Arc::clone(&pool);
                thread::spawn(move || {
                    let conn = pool.get().unwrap();
                    let result: i32 = conn.query_row("SELECT ?1", [i], |row| row.get(0)).unwrap();
                    assert_eq!(result, i);
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert!(pool.connections() >= 1);
    }
}
