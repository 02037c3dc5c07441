//! Digital twin storage backend selection.

use anyhow::{Context, Result};
use hub_digitwin::{DigitwinConfig, DigitwinStore};
use hub_gateway::domain::StorageBackend;
use hub_gateway::HubConfig;
use hub_storage::{shared, FileBackedKvStore};
use tracing::info;

/// Open the configured backend and replay it into a [`DigitwinStore`].
pub fn open_digitwin(config: &HubConfig) -> Result<DigitwinStore> {
    let digitwin_config = DigitwinConfig {
        strict: config.digitwin.strict,
        flush_threshold: config.storage.flush_threshold,
    };
    let storage = &config.storage;

    let backend = match storage.backend {
        StorageBackend::Memory => {
            info!("digitwin storage: memory");
            return Ok(DigitwinStore::in_memory(digitwin_config));
        }
        StorageBackend::File => {
            let path = storage
                .path
                .as_deref()
                .context("storage.path is required for the file backend")?;
            info!(path = %path.display(), "digitwin storage: file");
            let store = FileBackedKvStore::open(path)
                .with_context(|| format!("opening storage file {}", path.display()))?;
            shared(store)
        }
        StorageBackend::Rocksdb => open_rocksdb(config)?,
    };

    let store = DigitwinStore::open(backend, digitwin_config).context("replaying digitwin")?;
    info!(things = store.len(), "digitwin loaded");
    Ok(store)
}

#[cfg(feature = "rocksdb")]
fn open_rocksdb(config: &HubConfig) -> Result<hub_storage::SharedKvStore> {
    use hub_storage::{RocksDbConfig, RocksDbStore};

    let path = config
        .storage
        .path
        .as_deref()
        .context("storage.path is required for the rocksdb backend")?;
    info!(path = %path.display(), "digitwin storage: rocksdb");
    let store = RocksDbStore::open(RocksDbConfig::new(path.to_string_lossy()))
        .with_context(|| format!("opening rocksdb at {}", path.display()))?;
    Ok(shared(store))
}

#[cfg(not(feature = "rocksdb"))]
fn open_rocksdb(_config: &HubConfig) -> Result<hub_storage::SharedKvStore> {
    anyhow::bail!("storage backend rocksdb requires building with --features rocksdb")
}
