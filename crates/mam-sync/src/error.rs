//! Sync error types.

use message_archive::ArchiveError;
use thiserror::Error;

use crate::TransportError;

/// Sync error type. Cloneable so a shared fetch can report to every caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// The request already started fetching.
    #[error("Sync request already running")]
    AlreadyRunning,

    /// The server's answer did not carry a usable fin element.
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("Sync request timed out")]
    Timeout,

    #[error("Transport error: {0}")]
    Transport(TransportError),

    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("Storage error: {0}")]
    Storage(String),

    /// The fetch was dropped before it produced a result.
    #[error("Sync request cancelled")]
    Cancelled,
}

/// Result type alias using SyncError.
pub type SyncResult<T> = Result<T, SyncError>;

impl From<TransportError> for SyncError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout => SyncError::Timeout,
            other => SyncError::Transport(other),
        }
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::Storage(format!("IO error: {err}"))
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Storage(format!("JSON error: {err}"))
    }
}

impl From<tokio::task::JoinError> for SyncError {
    fn from(err: tokio::task::JoinError) -> Self {
        SyncError::Storage(format!("Blocking task failed: {err}"))
    }
}
