//! Archive error types.

use thiserror::Error;
use uuid::Uuid;

/// Archive error type.
///
/// Cloneable so one failure can be handed to every caller waiting on it.
/// Storage causes are kept as strings for that reason.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArchiveError {
    /// The stanza does not have the shape of an archivable message.
    #[error("Invalid message: {0}")]
    Validation(String),

    /// Neither sender nor recipient is the archive's account.
    #[error("Message does not belong to account {0}")]
    AccountMismatch(String),

    /// A message with the same dedup key is already archived.
    #[error("Duplicate of archived message {0}")]
    DuplicateMessage(Uuid),

    #[error("Message not found: {0}")]
    NotFound(Uuid),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("No archive exists for {0}")]
    DoesNotExist(String),

    /// The archive was deleted while the operation was pending.
    #[error("Archive for {0} was deleted")]
    Deleted(String),

    #[error("Archive is closed")]
    Closed,
}

/// Result type alias using ArchiveError.
pub type ArchiveResult<T> = Result<T, ArchiveError>;

impl From<rusqlite::Error> for ArchiveError {
    fn from(err: rusqlite::Error) -> Self {
        ArchiveError::Storage(format!("SQLite error: {err}"))
    }
}

impl From<r2d2::Error> for ArchiveError {
    fn from(err: r2d2::Error) -> Self {
        ArchiveError::Storage(format!("Connection error: {err}"))
    }
}

impl From<std::io::Error> for ArchiveError {
    fn from(err: std::io::Error) -> Self {
        ArchiveError::Storage(format!("IO error: {err}"))
    }
}

impl From<tokio::task::JoinError> for ArchiveError {
    fn from(err: tokio::task::JoinError) -> Self {
        ArchiveError::Storage(format!("Blocking task failed: {err}"))
    }
}
