//! Schema migrations for the archive database.
//!
//! Migrations run in order and are tracked in the `migrations` table.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::ArchiveResult;

/// Current schema version.
pub const CURRENT_VERSION: i32 = 3;

/// Run all pending migrations.
pub fn run_migrations(conn: &Connection) -> ArchiveResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    let current_version: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM migrations",
        [],
        |row| row.get(0),
    )?;

    debug!(current_version, target_version = CURRENT_VERSION, "Running migrations");

    if current_version < 1 {
        migrate_v1_initial_schema(conn)?;
    }
    if current_version < 2 {
        migrate_v2_thrashed_flag(conn)?;
    }
    if current_version < 3 {
        migrate_v3_stanza_id_scope(conn)?;
    }

    Ok(())
}

/// Schema version recorded in the database.
pub fn schema_version(conn: &Connection) -> ArchiveResult<i32> {
    Ok(conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM migrations",
        [],
        |row| row.get(0),
    )?)
}

fn record_migration(conn: &Connection, version: i32, name: &str) -> ArchiveResult<()> {
    conn.execute(
        "INSERT INTO migrations (version, name) VALUES (?1, ?2)",
        rusqlite::params![version, name],
    )?;
    debug!(version, name, "Migration applied");
    Ok(())
}

/// V1: message identity and metadata tables.
fn migrate_v1_initial_schema(conn: &Connection) -> ArchiveResult<()> {
    info!("Applying migration v1: initial schema");

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS messages (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            uuid TEXT NOT NULL UNIQUE,
            account TEXT NOT NULL,
            counterpart TEXT NOT NULL,
            direction TEXT NOT NULL,
            type TEXT NOT NULL,
            origin_id TEXT,
            stanza_id TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_messages_account
            ON messages(account);
        CREATE INDEX IF NOT EXISTS idx_messages_counterpart
            ON messages(counterpart);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_messages_origin_id
            ON messages(account, origin_id) WHERE origin_id IS NOT NULL;
        CREATE UNIQUE INDEX IF NOT EXISTS idx_messages_stanza_id
            ON messages(account, stanza_id) WHERE stanza_id IS NOT NULL;

        CREATE TABLE IF NOT EXISTS metadata (
            uuid TEXT PRIMARY KEY REFERENCES messages(uuid) ON DELETE CASCADE,
            created INTEGER,
            transmitted INTEGER,
            read INTEGER,
            error TEXT,
            is_carbon_copy INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_metadata_created
            ON metadata(created);
        CREATE INDEX IF NOT EXISTS idx_metadata_transmitted
            ON metadata(transmitted);
        ",
    )?;

    record_migration(conn, 1, "initial_schema")?;
    Ok(())
}

/// V2: soft-delete flag on metadata.
fn migrate_v2_thrashed_flag(conn: &Connection) -> ArchiveResult<()> {
    info!("Applying migration v2: thrashed flag");

    conn.execute_batch(
        "
        ALTER TABLE metadata ADD COLUMN thrashed INTEGER NOT NULL DEFAULT 0;
        ",
    )?;

    record_migration(conn, 2, "thrashed_flag")?;
    Ok(())
}

/// V3: record who issued a stanza id; ids from different issuers never collide.
fn migrate_v3_stanza_id_scope(conn: &Connection) -> ArchiveResult<()> {
    info!("Applying migration v3: stanza id scope");

    conn.execute_batch(
        "
        ALTER TABLE messages ADD COLUMN stanza_id_scope TEXT;

        DROP INDEX IF EXISTS idx_messages_stanza_id;
        CREATE UNIQUE INDEX IF NOT EXISTS idx_messages_scoped_stanza_id
            ON messages(account, stanza_id_scope, stanza_id) WHERE stanza_id IS NOT NULL;
        ",
    )?;

    record_migration(conn, 3, "stanza_id_scope")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        assert_eq!(schema_version(&conn).unwrap(), CURRENT_VERSION);
        let applied: i64 = conn
            .query_row("SELECT COUNT(*) FROM migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(applied, CURRENT_VERSION as i64);
    }

    #[test]
    fn schema_has_thrashed_column() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let thrashed: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM pragma_table_info('metadata') WHERE name = 'thrashed'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(thrashed, 1);
    }

    #[test]
    fn stanza_ids_are_unique_per_issuer() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let insert = |uuid: &str, scope: &str| {
            conn.execute(
                "INSERT INTO messages (uuid, account, counterpart, direction, type, stanza_id, stanza_id_scope)
                 VALUES (?1, 'alice@example.com', 'bob@example.net', 'inbound', 'chat', 's-1', ?2)",
                rusqlite::params![uuid, scope],
            )
        };
        insert("u-1", "account").unwrap();
        insert("u-2", "host").unwrap();
        assert!(insert("u-3", "host").is_err());
    }
}
