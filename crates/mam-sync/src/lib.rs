//! Message Archive Management synchronization.
//!
//! - [`Partition`] / [`Index`]: known spans of remote archive ids, merged as
//!   pages arrive in any order
//! - [`SyncRequest`]: one page fetch, correlating streamed results with the
//!   final `fin` response
//! - [`SyncCoordinator`]: per-account entry point that issues fetches and
//!   keeps the persisted index
//! - [`Transport`]: the connection the engine sends through

mod coordinator;
mod error;
mod index;
mod partition;
mod request;
mod transport;

pub use coordinator::SyncCoordinator;
pub use error::{SyncError, SyncResult};
pub use index::{Index, INDEX_VERSION};
pub use partition::{merge, Merge, Partition};
pub use request::{PageResult, RequestPhase, SyncRequest};
pub use transport::{Transport, TransportError};

#[cfg(test)]
mod tests;
