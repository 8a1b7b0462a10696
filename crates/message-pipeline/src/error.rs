//! Pipeline error types.

use message_archive::ArchiveError;
use thiserror::Error;

/// Pipeline error type. Cloneable so one open failure reaches every queued item.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    /// The item was dropped before it could be archived.
    #[error("Pipeline item cancelled")]
    Cancelled,
}

/// Result type alias using PipelineError.
pub type PipelineResult<T> = Result<T, PipelineError>;
