//! # Hub Node
//!
//! Start-up plumbing for the `hub` executable: configuration, storage
//! backend selection, serving and agent token issuance.
//!
//! ## Environment Variables
//!
//! | Variable | Overrides |
//! |----------|-----------|
//! | `HUB_PORT` | `server.port` |
//! | `HUB_HOST` | `server.host` |
//! | `HUB_SIGNING_SECRET` | `authn.signing_secret` |
//! | `HUB_STORAGE_PATH` | `storage.path` |
//! | `HUB_LOG` | `logging.level` |

pub mod config;
pub mod server;
pub mod storage;

pub use config::{apply_env_overrides, load_config};
pub use server::{run, shutdown_signal};
pub use storage::open_digitwin;

use anyhow::{Context, Result};
use hub_digitwin::{DigitwinConfig, DigitwinStore};
use hub_gateway::{Authenticator, HubConfig, HubService};

/// Issue a long-lived agent token for a client in the configured store.
///
/// Only useful with a configured `authn.signing_secret`; an ephemeral key
/// would make the token worthless once this process exits.
pub fn issue_agent_token(config: HubConfig, client_id: &str) -> Result<String> {
    if config.authn.signing_secret.is_none() {
        anyhow::bail!("agent tokens require authn.signing_secret (or HUB_SIGNING_SECRET)");
    }
    let hub = HubService::new(config, DigitwinStore::in_memory(DigitwinConfig::default()))
        .context("loading client store")?;
    hub.authenticator()
        .create_agent_token(client_id)
        .with_context(|| format!("issuing agent token for {client_id}"))
}
