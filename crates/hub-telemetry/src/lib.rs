//! # Hub Telemetry
//!
//! Installs the process-wide `tracing` subscriber.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use hub_telemetry::{init_logging, LoggingConfig};
//!
//! init_logging(&LoggingConfig::default())?;
//! tracing::info!(port = 8444, "hub starting");
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Description |
//! |----------|-------------|
//! | `RUST_LOG` | Overrides `logging.level` |

mod config;

pub use config::LoggingConfig;

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("invalid log filter '{filter}': {message}")]
    InvalidFilter { filter: String, message: String },

    /// A global subscriber is already installed (e.g. by an earlier test).
    #[error("logging already initialized")]
    AlreadyInitialized,
}

/// Build the filter: `RUST_LOG` first, then the configured level.
pub fn build_filter(config: &LoggingConfig) -> Result<EnvFilter, TelemetryError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.level).map_err(|e| TelemetryError::InvalidFilter {
        filter: config.level.clone(),
        message: e.to_string(),
    })
}

/// Install the global subscriber.
///
/// Calling this more than once returns [`TelemetryError::AlreadyInitialized`].
pub fn init_logging(config: &LoggingConfig) -> Result<(), TelemetryError> {
    let filter = build_filter(config)?;
    let registry = tracing_subscriber::registry().with(filter);

    let result = if config.json {
        registry
            .with(fmt::layer().json().with_current_span(true).with_target(true))
            .try_init()
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(config.thread_ids),
            )
            .try_init()
    };
    result.map_err(|_| TelemetryError::AlreadyInitialized)
}

/// Install a test-writer subscriber; repeated calls are ignored.
pub fn init_test_logging() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(fmt::layer().with_test_writer())
        .try_init();
}
