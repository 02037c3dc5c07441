//! # Hub Storage
//!
//! Outbound storage port for the Digitwin persistence layer.
//!
//! The Digitwin keeps its working set in memory and writes dirty Things
//! behind to a [`KeyValueStore`]. On start-up it replays the store through a
//! [`KvCursor`] to rebuild the directory.
//!
//! ## Backends
//!
//! | Backend | Type | Use |
//! |---------|------|-----|
//! | memory | [`InMemoryKvStore`] | tests, ephemeral hubs |
//! | file | [`FileBackedKvStore`] | single-file persistence, no native build |
//! | rocksdb | `RocksDbStore` (feature `rocksdb`) | production |

pub mod errors;
pub mod file;
pub mod memory;
pub mod ports;
#[cfg(feature = "rocksdb")]
pub mod rocks;

pub use errors::KvStoreError;
pub use file::FileBackedKvStore;
pub use memory::InMemoryKvStore;
pub use ports::{shared, BatchOperation, KeyValueStore, KvCursor, KvEntry, SharedKvStore};
#[cfg(feature = "rocksdb")]
pub use rocks::{RocksDbConfig, RocksDbStore};
