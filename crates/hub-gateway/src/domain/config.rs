//! Hub configuration with validation.
//!
//! Every section is `#[serde(default)]`, so a TOML file only needs the keys it
//! changes. Durations are written as `"30s"`, `"500ms"`, `"5m"` or `"2h"`.

use crate::authn::Role;
use hub_telemetry::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Main hub configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    pub server: ServerConfig,
    pub limits: LimitsConfig,
    pub timeouts: TimeoutConfig,
    pub authn: AuthnConfig,
    pub cors: CorsConfig,
    pub storage: StorageConfig,
    pub digitwin: DigitwinSection,
    pub logging: LoggingConfig,
}

impl HubConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.limits.max_request_size == 0 {
            return Err(ConfigError::InvalidLimit(
                "max_request_size cannot be 0".into(),
            ));
        }
        if self.limits.max_frame_size == 0 {
            return Err(ConfigError::InvalidLimit("max_frame_size cannot be 0".into()));
        }
        if self.limits.channel_capacity == 0 {
            return Err(ConfigError::InvalidLimit(
                "channel_capacity cannot be 0".into(),
            ));
        }

        for (name, value) in [
            ("request", self.timeouts.request),
            ("dispatch", self.timeouts.dispatch),
            ("short", self.timeouts.short),
            ("ping_interval", self.timeouts.ping_interval),
            ("gc_interval", self.timeouts.gc_interval),
        ] {
            if value.is_zero() {
                return Err(ConfigError::InvalidTimeout(format!("{name} cannot be 0")));
            }
        }

        if let Some(secret) = &self.authn.signing_secret {
            let bytes = hex::decode(secret)
                .map_err(|_| ConfigError::InvalidSecret("signing_secret must be hex".into()))?;
            if bytes.len() < 32 {
                return Err(ConfigError::InvalidSecret(
                    "signing_secret must be at least 32 bytes".into(),
                ));
            }
        }

        if self.storage.backend != StorageBackend::Memory && self.storage.path.is_none() {
            return Err(ConfigError::Invalid(format!(
                "storage backend {:?} requires storage.path",
                self.storage.backend
            )));
        }
        if self.storage.flush_interval.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "flush_interval cannot be 0".into(),
            ));
        }

        Ok(())
    }

    /// Socket address to bind.
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.server.host, self.server.port)
    }

    /// Base URL used in injected Forms.
    pub fn public_url(&self) -> String {
        if let Some(url) = &self.server.public_url {
            return url.trim_end_matches('/').to_string();
        }
        let scheme = if self.server.tls.is_some() { "https" } else { "http" };
        let host = if self.server.host.is_unspecified() {
            "localhost".to_string()
        } else {
            self.server.host.to_string()
        };
        format!("{scheme}://{host}:{}", self.server.port)
    }

    /// Lifetime of an action record: twice the RPC timeout.
    pub fn action_lifetime(&self) -> Duration {
        self.timeouts.request * 2
    }
}

/// Listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address
    pub host: IpAddr,
    /// Port (default: 8444)
    pub port: u16,
    /// Externally visible base URL for Forms
    pub public_url: Option<String>,
    /// Server TLS; plain HTTP when absent
    pub tls: Option<TlsConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
            port: 8444,
            public_url: None,
            tls: None,
        }
    }
}

/// TLS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    /// Path to the PEM server certificate chain
    pub cert_path: PathBuf,
    /// Path to the PEM private key
    pub key_path: PathBuf,
    /// Hub CA certificate, published to clients
    pub ca_cert_path: Option<PathBuf>,
}

/// Request and push limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Max request body size in bytes (default: 1MB)
    pub max_request_size: usize,
    /// Max serialized push message size in bytes (default: 256KB)
    pub max_frame_size: usize,
    /// Outbound queue length per push channel; a full queue closes the channel
    pub channel_capacity: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_request_size: 1024 * 1024,
            max_frame_size: 256 * 1024,
            channel_capacity: 256,
        }
    }
}

/// Timeout configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// RPC-style action invocation and property write
    #[serde(with = "humantime_serde")]
    pub request: Duration,
    /// Wait for capacity on the agent's push channel
    #[serde(with = "humantime_serde")]
    pub dispatch: Duration,
    /// Login, refresh and directory reads
    #[serde(with = "humantime_serde")]
    pub short: Duration,
    /// Push channel heartbeat
    #[serde(with = "humantime_serde")]
    pub ping_interval: Duration,
    /// How long a session outlives its last push channel
    #[serde(with = "humantime_serde")]
    pub reconnect_grace: Duration,
    /// Expiry of sessions that never attach a push channel
    #[serde(with = "humantime_serde")]
    pub session_idle: Duration,
    /// Action record and session sweep cadence
    #[serde(with = "humantime_serde")]
    pub gc_interval: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request: Duration::from_secs(30),
            dispatch: Duration::from_secs(3),
            short: Duration::from_secs(5),
            ping_interval: Duration::from_secs(20),
            reconnect_grace: Duration::from_secs(5 * 60),
            session_idle: Duration::from_secs(60 * 60),
            gc_interval: Duration::from_secs(10),
        }
    }
}

/// A client seeded from configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSeed {
    #[serde(rename = "clientID", alias = "client_id")]
    pub client_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub role: Role,
    /// Plain password; hashed on load.
    pub password: String,
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthnConfig {
    /// Hex signing key; random per process when absent
    pub signing_secret: Option<String>,
    #[serde(with = "humantime_serde")]
    pub consumer_token_validity: Duration,
    #[serde(with = "humantime_serde")]
    pub agent_token_validity: Duration,
    /// JSON client store
    pub clients_file: Option<PathBuf>,
    /// Inline clients for development and tests
    pub clients: Vec<ClientSeed>,
}

impl Default for AuthnConfig {
    fn default() -> Self {
        Self {
            signing_secret: None,
            consumer_token_validity: Duration::from_secs(60 * 60),
            agent_token_validity: Duration::from_secs(90 * 24 * 60 * 60),
            clients_file: None,
            clients: Vec::new(),
        }
    }
}

/// CORS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Enable CORS
    pub enabled: bool,
    /// Allowed origins ("*" for all)
    pub allowed_origins: Vec<String>,
    pub allowed_methods: Vec<String>,
    pub allowed_headers: Vec<String>,
    /// Max age for preflight cache in seconds
    pub max_age: u64,
    pub allow_credentials: bool,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allowed_origins: vec!["*".to_string()],
            allowed_methods: ["GET", "POST", "DELETE", "OPTIONS"]
                .iter()
                .map(|m| m.to_string())
                .collect(),
            allowed_headers: vec![
                "Content-Type".to_string(),
                "Authorization".to_string(),
                "Prefer".to_string(),
            ],
            max_age: 86400,
            allow_credentials: false,
        }
    }
}

/// Storage backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    File,
    Rocksdb,
}

/// Digitwin persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// File path (file backend) or directory (rocksdb backend)
    pub path: Option<PathBuf>,
    #[serde(with = "humantime_serde")]
    pub flush_interval: Duration,
    /// Dirty Thing count triggering an early flush
    pub flush_threshold: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            path: None,
            flush_interval: Duration::from_secs(5),
            flush_threshold: 100,
        }
    }
}

/// Digitwin behaviour
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DigitwinSection {
    /// Reject agent property updates for names missing from the TD
    pub strict: bool,
}

/// Configuration errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// Invalid size or count limit
    #[error("invalid limit: {0}")]
    InvalidLimit(String),
    /// Invalid timeout value
    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),
    #[error("invalid signing secret: {0}")]
    InvalidSecret(String),
    /// General configuration error
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Humantime serde module for Duration serialization
pub mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() != 0 {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        } else {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub fn parse_duration(s: &str) -> Result<Duration, &'static str> {
        let s = s.trim();
        // "ms" before "s" and "m"
        if let Some(ms) = s.strip_suffix("ms") {
            ms.trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| "invalid milliseconds")
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid seconds")
        } else if let Some(mins) = s.strip_suffix('m') {
            scaled(mins, 60, "invalid minutes")
        } else if let Some(hours) = s.strip_suffix('h') {
            scaled(hours, 3600, "invalid hours")
        } else if let Some(days) = s.strip_suffix('d') {
            scaled(days, 86400, "invalid days")
        } else {
            // Try parsing as plain seconds
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid duration format")
        }
    }

    fn scaled(count: &str, unit_secs: u64, invalid: &'static str) -> Result<Duration, &'static str> {
        let count = count.trim().parse::<u64>().map_err(|_| invalid)?;
        count
            .checked_mul(unit_secs)
            .map(Duration::from_secs)
            .ok_or("duration overflow")
    }
}
