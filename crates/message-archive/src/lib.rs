//! Durable per-account message archive.
//!
//! Each account owns one directory:
//!
//! ```text
//! <storage_root>/<account>/
//!   VERSION            storage layout version
//!   documents/<uuid>.xml
//!   archive.sqlite     identity + metadata tables
//! ```
//!
//! [`Archive`] is the async entry point. Reads run concurrently, writes are
//! exclusive, and every committed write is announced as an [`ArchiveChange`].

mod archive;
mod document_store;
mod error;
pub mod migrations;
mod models;
mod pool;
pub mod queries;
mod storage;

pub use archive::{Archive, ArchiveOptions};
pub use document_store::DocumentStore;
pub use error::{ArchiveError, ArchiveResult};
pub use models::{ArchiveChange, Direction, MessageRecord, Metadata, NewMessage};
pub use pool::{ArchivePool, PoolConfig};
pub use storage::{StorageLayout, STORAGE_VERSION};

#[cfg(test)]
mod tests;
