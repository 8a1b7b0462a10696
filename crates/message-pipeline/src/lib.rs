//! Message flow between the connection and the archive.
//!
//! - [`Filter`]: composable inbound filter chain (carbons, MAM results)
//! - [`InboundPipeline`]: archives incoming stanzas, queueing them while
//!   the account's archive opens
//! - [`OutboundDispatcher`]: transmits pending outbound messages and records
//!   the outcome

mod error;
mod filter;
mod inbound;
mod outbound;

pub use error::{PipelineError, PipelineResult};
pub use filter::{default_chain, run_chain, Filter, FilterOutcome, Item, Tags};
pub use inbound::InboundPipeline;
pub use outbound::{Dispatch, OutboundDispatcher};

#[cfg(test)]
mod tests;
