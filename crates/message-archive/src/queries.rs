//! Standalone query functions over the archive tables.
//!
//! Each function takes a `&Connection` (or a `&Transaction`, which derefs to
//! one) so they work with pooled and in-memory connections alike.

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use stanza_model::{MessageType, StanzaIdScope};
use uuid::Uuid;

use crate::{ArchiveError, ArchiveResult, Direction, MessageRecord, Metadata, NewMessage};

const RECORD_COLUMNS: &str =
    "m.uuid, m.account, m.counterpart, m.direction, m.type, m.origin_id, m.stanza_id, m.stanza_id_scope";

/// Sort order shared by listings. Undated messages sort as the most recent.
const LISTING_ORDER: &str = "COALESCE(md.transmitted, md.created, 9223372036854775807) DESC,
         COALESCE(md.created, 9223372036854775807) DESC,
         m.seq DESC";

// ==========================================
// Writes
// ==========================================

/// Insert identity and metadata rows. Run inside a transaction.
pub fn insert_message(
    conn: &Connection,
    message: &NewMessage,
    metadata: &Metadata,
) -> ArchiveResult<()> {
    conn.execute(
        "INSERT INTO messages (uuid, account, counterpart, direction, type, origin_id, stanza_id, stanza_id_scope)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            message.id.to_string(),
            message.account,
            message.counterpart,
            message.direction.as_str(),
            message.message_type.as_str(),
            message.origin_id,
            message.stanza_id,
            message.stanza_id_scope.map(|scope| scope.as_str()),
        ],
    )?;
    conn.execute(
        "INSERT INTO metadata (uuid, created, transmitted, read, error, is_carbon_copy, thrashed)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            message.id.to_string(),
            metadata.created.map(to_millis),
            metadata.transmitted.map(to_millis),
            metadata.read.map(to_millis),
            metadata.error,
            metadata.is_carbon_copy,
            metadata.thrashed,
        ],
    )?;
    Ok(())
}

/// Replace all metadata fields. Returns false if the message does not exist.
pub fn update_metadata(conn: &Connection, id: Uuid, metadata: &Metadata) -> ArchiveResult<bool> {
    let rows = conn.execute(
        "UPDATE metadata
         SET created = ?2, transmitted = ?3, read = ?4, error = ?5, is_carbon_copy = ?6, thrashed = ?7
         WHERE uuid = ?1",
        params![
            id.to_string(),
            metadata.created.map(to_millis),
            metadata.transmitted.map(to_millis),
            metadata.read.map(to_millis),
            metadata.error,
            metadata.is_carbon_copy,
            metadata.thrashed,
        ],
    )?;
    Ok(rows == 1)
}

/// Set the transmission outcome of a message.
pub fn update_transmission(
    conn: &Connection,
    id: Uuid,
    transmitted: Option<DateTime<Utc>>,
    error: Option<&str>,
) -> ArchiveResult<bool> {
    let rows = conn.execute(
        "UPDATE metadata SET transmitted = ?2, error = ?3 WHERE uuid = ?1",
        params![id.to_string(), transmitted.map(to_millis), error],
    )?;
    Ok(rows == 1)
}

pub fn set_thrashed(conn: &Connection, id: Uuid, thrashed: bool) -> ArchiveResult<bool> {
    let rows = conn.execute(
        "UPDATE metadata SET thrashed = ?2 WHERE uuid = ?1",
        params![id.to_string(), thrashed],
    )?;
    Ok(rows == 1)
}

/// Delete a message; metadata follows through the foreign key.
pub fn delete_message(conn: &Connection, id: Uuid) -> ArchiveResult<bool> {
    let rows = conn.execute(
        "DELETE FROM messages WHERE uuid = ?1",
        params![id.to_string()],
    )?;
    Ok(rows == 1)
}

// ==========================================
// Lookups
// ==========================================

/// Find an archived message sharing either dedup key. Stanza ids only match
/// ids from the same issuer.
pub fn find_duplicate(
    conn: &Connection,
    account: &str,
    origin_id: Option<&str>,
    stanza_id: Option<(StanzaIdScope, &str)>,
) -> ArchiveResult<Option<Uuid>> {
    if origin_id.is_none() && stanza_id.is_none() {
        return Ok(None);
    }
    let (scope, stanza_id) = match stanza_id {
        Some((scope, id)) => (Some(scope.as_str()), Some(id)),
        None => (None, None),
    };
    let mut stmt = conn.prepare_cached(
        "SELECT uuid FROM messages
         WHERE account = ?1
           AND ((?2 IS NOT NULL AND origin_id = ?2)
             OR (?3 IS NOT NULL AND stanza_id = ?3 AND stanza_id_scope = ?4))
         ORDER BY seq ASC
         LIMIT 1",
    )?;
    let found: Option<String> = stmt
        .query_row(params![account, origin_id, stanza_id, scope], |row| row.get(0))
        .optional()?;
    found.map(|raw| parse_uuid(&raw)).transpose()
}

pub fn get_message(conn: &Connection, id: Uuid) -> ArchiveResult<Option<MessageRecord>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {RECORD_COLUMNS} FROM messages m WHERE m.uuid = ?1"
    ))?;
    let result = stmt.query_row(params![id.to_string()], map_record);

    match result {
        Ok(record) => Ok(Some(record)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn get_metadata(conn: &Connection, id: Uuid) -> ArchiveResult<Option<Metadata>> {
    let mut stmt = conn.prepare_cached(
        "SELECT created, transmitted, read, error, is_carbon_copy, thrashed
         FROM metadata WHERE uuid = ?1",
    )?;
    let result = stmt.query_row(params![id.to_string()], |row| {
        Ok(Metadata {
            created: row.get::<_, Option<i64>>(0)?.and_then(from_millis),
            transmitted: row.get::<_, Option<i64>>(1)?.and_then(from_millis),
            read: row.get::<_, Option<i64>>(2)?.and_then(from_millis),
            error: row.get(3)?,
            is_carbon_copy: row.get(4)?,
            thrashed: row.get(5)?,
        })
    });

    match result {
        Ok(metadata) => Ok(Some(metadata)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

// ==========================================
// Listings
// ==========================================

/// Every visible message, newest first.
pub fn list_all(conn: &Connection) -> ArchiveResult<Vec<MessageRecord>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {RECORD_COLUMNS}
         FROM messages m JOIN metadata md ON md.uuid = m.uuid
         WHERE md.thrashed = 0
         ORDER BY {LISTING_ORDER}"
    ))?;
    let records = stmt.query_map([], map_record)?.collect::<Result<Vec<_>, _>>()?;
    Ok(records)
}

/// Visible messages exchanged with one counterpart, newest first.
pub fn list_conversation(conn: &Connection, counterpart: &str) -> ArchiveResult<Vec<MessageRecord>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {RECORD_COLUMNS}
         FROM messages m JOIN metadata md ON md.uuid = m.uuid
         WHERE md.thrashed = 0 AND m.counterpart = ?1
         ORDER BY {LISTING_ORDER}"
    ))?;
    let records = stmt
        .query_map(params![counterpart], map_record)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(records)
}

/// The newest visible message of each conversation, newest conversation first.
pub fn list_recent(conn: &Connection) -> ArchiveResult<Vec<MessageRecord>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT uuid, account, counterpart, direction, type, origin_id, stanza_id, stanza_id_scope
         FROM (
             SELECT {RECORD_COLUMNS},
                    COALESCE(md.transmitted, md.created, 9223372036854775807) AS sort_sent,
                    COALESCE(md.created, 9223372036854775807) AS sort_created,
                    m.seq AS seq,
                    ROW_NUMBER() OVER (PARTITION BY m.counterpart ORDER BY {LISTING_ORDER}) AS row_rank
             FROM messages m JOIN metadata md ON md.uuid = m.uuid
             WHERE md.thrashed = 0
         )
         WHERE row_rank = 1
         ORDER BY sort_sent DESC, sort_created DESC, seq DESC"
    ))?;
    let records = stmt.query_map([], map_record)?.collect::<Result<Vec<_>, _>>()?;
    Ok(records)
}

/// Outbound messages neither transmitted nor failed, oldest first.
pub fn list_pending(conn: &Connection) -> ArchiveResult<Vec<MessageRecord>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {RECORD_COLUMNS}
         FROM messages m JOIN metadata md ON md.uuid = m.uuid
         WHERE m.direction = 'outbound'
           AND md.transmitted IS NULL
           AND md.error IS NULL
           AND md.thrashed = 0
         ORDER BY m.seq ASC"
    ))?;
    let records = stmt.query_map([], map_record)?.collect::<Result<Vec<_>, _>>()?;
    Ok(records)
}

/// Number of visible messages.
pub fn count_messages(conn: &Connection) -> ArchiveResult<usize> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM metadata WHERE thrashed = 0",
        [],
        |row| row.get(0),
    )?;
    Ok(count as usize)
}

// ==========================================
// Helpers
// ==========================================

fn map_record(row: &Row<'_>) -> rusqlite::Result<MessageRecord> {
    let uuid: String = row.get(0)?;
    let direction: String = row.get(3)?;
    let message_type: String = row.get(4)?;
    let scope: Option<String> = row.get(7)?;

    Ok(MessageRecord {
        id: Uuid::parse_str(&uuid).map_err(|e| conversion_error(0, e))?,
        account: row.get(1)?,
        counterpart: row.get(2)?,
        direction: Direction::parse(&direction).ok_or_else(|| {
            conversion_error(3, ArchiveError::Storage(format!("unknown direction '{direction}'")))
        })?,
        message_type: MessageType::from_attr(Some(&message_type))
            .map_err(|e| conversion_error(4, e))?,
        origin_id: row.get(5)?,
        stanza_id: row.get(6)?,
        stanza_id_scope: scope
            .map(|raw| {
                StanzaIdScope::parse(&raw).ok_or_else(|| {
                    conversion_error(7, ArchiveError::Storage(format!("unknown stanza id scope '{raw}'")))
                })
            })
            .transpose()?,
    })
}

fn conversion_error<E>(column: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(err))
}

fn parse_uuid(raw: &str) -> ArchiveResult<Uuid> {
    Uuid::parse_str(raw).map_err(|e| ArchiveError::Storage(format!("Invalid uuid '{raw}': {e}")))
}

fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
}
