//! Logging initialization.
//!
//! Services call [`init_logging`] once at startup and use `tracing` macros
//! everywhere else. `RUST_LOG` overrides the configured level.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

use crate::CoreResult;

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name of the service, recorded as the root span of every line.
    pub service_name: String,
    /// Default log level filter (e.g., "debug", "info", "warn").
    pub default_level: String,
    /// Optional log file; lines are appended.
    pub log_path: Option<PathBuf>,
    /// Write JSON lines instead of the compact text format.
    pub json: bool,
    /// Also emit logs to stderr.
    pub also_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "mam-archive".into(),
            default_level: "info".into(),
            log_path: None,
            json: false,
            also_stderr: true,
        }
    }
}

/// Initialize the global tracing subscriber.
///
/// Returns `Ok(false)` when a global subscriber was already installed (for
/// example by an earlier call or a test harness); the existing one is kept.
pub fn init_logging(config: &LogConfig) -> CoreResult<bool> {
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    if let Some(path) = &config.log_path {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let writer = Mutex::new(file);
        if config.json {
            layers.push(fmt::layer().json().with_writer(writer).boxed());
        } else {
            layers.push(fmt::layer().with_ansi(false).with_writer(writer).boxed());
        }
    }

    if config.also_stderr {
        layers.push(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .compact()
                .boxed(),
        );
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_level));

    let installed = tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .is_ok();

    if installed {
        tracing::info!(service = %config.service_name, level = %config.default_level, "Logging initialized");
    }
    Ok(installed)
}

/// Parse a log level string into a tracing Level.
pub fn parse_level(level: &str) -> tracing::Level {
    match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" | "warning" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}
