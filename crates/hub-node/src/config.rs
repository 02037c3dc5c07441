//! Configuration loading: TOML file, then `HUB_*` environment overrides.

use anyhow::{Context, Result};
use hub_gateway::HubConfig;
use std::path::{Path, PathBuf};

/// Environment variables consulted after the config file.
pub const ENV_PORT: &str = "HUB_PORT";
pub const ENV_HOST: &str = "HUB_HOST";
pub const ENV_SIGNING_SECRET: &str = "HUB_SIGNING_SECRET";
pub const ENV_STORAGE_PATH: &str = "HUB_STORAGE_PATH";
pub const ENV_LOG: &str = "HUB_LOG";

/// Load the configuration file (defaults when `path` is `None`), apply the
/// process environment and validate.
pub fn load_config(path: Option<&Path>) -> Result<HubConfig> {
    let mut config = match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading config file {}", path.display()))?;
            toml::from_str(&text)
                .with_context(|| format!("parsing config file {}", path.display()))?
        }
        None => HubConfig::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    config.validate().context("invalid configuration")?;
    Ok(config)
}

/// Apply overrides read through `lookup`.
pub fn apply_env_overrides<F>(config: &mut HubConfig, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(port) = lookup(ENV_PORT) {
        config.server.port = port
            .parse()
            .with_context(|| format!("{ENV_PORT}={port} is not a port"))?;
    }
    if let Some(host) = lookup(ENV_HOST) {
        config.server.host = host
            .parse()
            .with_context(|| format!("{ENV_HOST}={host} is not an IP address"))?;
    }
    if let Some(secret) = lookup(ENV_SIGNING_SECRET) {
        config.authn.signing_secret = Some(secret);
    }
    if let Some(path) = lookup(ENV_STORAGE_PATH) {
        config.storage.path = Some(PathBuf::from(path));
    }
    if let Some(level) = lookup(ENV_LOG) {
        config.logging.level = level;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_overrides_applied() {
        let mut config = HubConfig::default();
        apply_env_overrides(
            &mut config,
            env(&[
                (ENV_PORT, "9000"),
                (ENV_HOST, "127.0.0.1"),
                (ENV_STORAGE_PATH, "/var/lib/hub/twin.db"),
                (ENV_LOG, "debug"),
            ]),
        )
        .unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host.to_string(), "127.0.0.1");
        assert_eq!(
            config.storage.path.as_deref(),
            Some(Path::new("/var/lib/hub/twin.db"))
        );
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_bad_port_rejected() {
        let mut config = HubConfig::default();
        let err = apply_env_overrides(&mut config, env(&[(ENV_PORT, "http")])).unwrap_err();
        assert!(err.to_string().contains(ENV_PORT));
    }

    #[test]
    fn test_no_overrides_keeps_file_values() {
        let mut config = HubConfig::default();
        config.server.port = 7000;
        apply_env_overrides(&mut config, env(&[])).unwrap();
        assert_eq!(config.server.port, 7000);
        assert!(config.authn.signing_secret.is_none());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[server]\nport = 8555\n\n[timeouts]\nrequest = \"2s\"\n\n[digitwin]\nstrict = true"
        )
        .unwrap();
        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.timeouts.request.as_secs(), 2);
        assert!(config.digitwin.strict);
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = load_config(Some(Path::new("/nonexistent/hub.toml"))).unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/hub.toml"));
    }
}
