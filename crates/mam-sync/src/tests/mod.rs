//! Scenario tests for the sync engine.
//!
//! - `harness.rs`     - scriptable transport and stanza builders
//! - `request.rs`     - page fetch state machine
//! - `coordinator.rs` - fetch routing, coalescing and index upkeep
//! - `convergence.rs` - randomized partition insertion orders

mod convergence;
pub(crate) mod harness;
