//! Archive lifecycle management.
//!
//! [`ArchiveManager`] owns every open [`message_archive::Archive`] of the
//! process. Concurrent opens of one account are coalesced so its storage is
//! never opened twice, and deletion fails any open still in flight.

mod manager;
mod opener;

pub use manager::ArchiveManager;
pub use opener::{ArchiveOpener, StorageOpener};
