//! Scenario tests for the message pipeline.
//!
//! - `harness.rs`  - send-scripted transport, gated archive opener, builders
//! - `inbound.rs`  - queueing while opening, carbons, duplicates, MAM routing
//! - `outbound.rs` - dispatch outcomes, in-flight tracking, reconnect resend

mod inbound;
mod outbound;
