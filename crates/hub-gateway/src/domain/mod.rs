//! Domain types for the hub gateway.
//!
//! Configuration, identifiers, error kinds and counters.

pub mod config;
pub mod correlation;
pub mod error;
pub mod stats;

pub use config::{ConfigError, HubConfig, LimitsConfig, StorageBackend, TimeoutConfig};
pub use correlation::{RequestId, SessionId};
pub use error::{ApiError, ApiResult, ErrorKind, HubError};
pub use stats::{HubStats, StatsSnapshot};
