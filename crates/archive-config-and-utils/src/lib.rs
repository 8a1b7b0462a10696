//! Core configuration and utilities shared by the archive crates.
//!
//! - [`Config`]: JSON config file with environment overrides
//! - [`Paths`]: on-disk layout (base dir, per-account storage, sync indexes)
//! - [`init_logging`]: tracing subscriber setup
//! - [`SingleFlight`]: coalesces concurrent operations on the same key

mod config;
mod error;
mod logging;
mod paths;
pub mod single_flight;

pub use config::{
    Config, DEFAULT_BUSY_TIMEOUT_MS, DEFAULT_LOG_LEVEL, DEFAULT_MAM_PAGE_SIZE,
    DEFAULT_MAM_TIMEOUT_SECS, DEFAULT_POOL_MAX_SIZE,
};
pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, parse_level, LogConfig};
pub use paths::Paths;
pub use single_flight::{Join, SingleFlight, Waiters};
