//! Logging configuration.

use serde::{Deserialize, Serialize};

/// The `[logging]` section of the hub configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive (`info`, `hub_gateway=debug,info`, ...).
    ///
    /// `RUST_LOG` takes precedence when set.
    pub level: String,

    /// Emit one JSON object per line instead of human-readable text.
    pub json: bool,

    /// Include thread ids in human-readable output.
    pub thread_ids: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            thread_ids: true,
        }
    }
}

impl LoggingConfig {
    pub fn with_level(level: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            ..Self::default()
        }
    }
}
