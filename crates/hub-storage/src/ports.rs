//! # Outbound Port
//!
//! Abstract key-value interface required by the Digitwin.

use crate::errors::KvStoreError;
use parking_lot::Mutex;
use std::sync::Arc;

/// A stored key/value pair.
pub type KvEntry = (Vec<u8>, Vec<u8>);

/// Abstract interface for key-value database operations.
///
/// Production: `RocksDbStore` (feature `rocksdb`)
/// Testing: [`InMemoryKvStore`](crate::InMemoryKvStore)
pub trait KeyValueStore: Send + Sync {
    /// Get a value by key.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvStoreError>;

    /// Put a single key-value pair.
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), KvStoreError>;

    /// Delete a key. Deleting a missing key is not an error.
    fn delete(&mut self, key: &[u8]) -> Result<(), KvStoreError>;

    /// Execute an atomic batch write.
    ///
    /// Either all operations in the batch are applied, or none are.
    fn atomic_batch_write(&mut self, operations: Vec<BatchOperation>) -> Result<(), KvStoreError>;

    /// Check if a key exists.
    fn exists(&self, key: &[u8]) -> Result<bool, KvStoreError> {
        self.get(key).map(|v| v.is_some())
    }

    /// Open a cursor over every key starting with `prefix`, in key order.
    fn cursor(&self, prefix: &[u8]) -> Result<KvCursor, KvStoreError>;
}

/// Batch operation for atomic writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOperation {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

impl BatchOperation {
    pub fn put(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        BatchOperation::Put {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn delete(key: impl Into<Vec<u8>>) -> Self {
        BatchOperation::Delete { key: key.into() }
    }
}

/// Forward cursor over a prefix scan.
///
/// The cursor reads from a snapshot taken when it was opened; writes made after
/// that are not visible through it.
#[derive(Debug, Default)]
pub struct KvCursor {
    entries: std::vec::IntoIter<KvEntry>,
}

impl KvCursor {
    /// Build a cursor from entries; they are sorted by key here.
    pub fn from_entries(mut entries: Vec<KvEntry>) -> Self {
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Self {
            entries: entries.into_iter(),
        }
    }

    /// Return up to `n` further entries. An empty batch means the end.
    pub fn next_n(&mut self, n: usize) -> Vec<KvEntry> {
        self.entries.by_ref().take(n).collect()
    }

    pub fn remaining(&self) -> usize {
        self.entries.len()
    }
}

impl Iterator for KvCursor {
    type Item = KvEntry;

    fn next(&mut self) -> Option<Self::Item> {
        self.entries.next()
    }
}

/// A store shared between the Digitwin and its flusher task.
pub type SharedKvStore = Arc<Mutex<dyn KeyValueStore>>;

/// Wrap a backend for sharing.
pub fn shared<S: KeyValueStore + 'static>(store: S) -> SharedKvStore {
    Arc::new(Mutex::new(store))
}
