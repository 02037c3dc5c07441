use crate::errors::KvStoreError;
use crate::ports::{BatchOperation, KeyValueStore, KvCursor};
use std::collections::BTreeMap;

/// In-memory key-value store.
///
/// Nothing survives the process; used by tests and by hubs configured with the
/// `memory` backend.
#[derive(Debug, Default)]
pub struct InMemoryKvStore {
    data: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl KeyValueStore for InMemoryKvStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvStoreError> {
        Ok(self.data.get(key).cloned())
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), KvStoreError> {
        self.data.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), KvStoreError> {
        self.data.remove(key);
        Ok(())
    }

    fn atomic_batch_write(&mut self, operations: Vec<BatchOperation>) -> Result<(), KvStoreError> {
        // Single owner behind the port's mutex, so applying in order is atomic.
        for op in operations {
            match op {
                BatchOperation::Put { key, value } => {
                    self.data.insert(key, value);
                }
                BatchOperation::Delete { key } => {
                    self.data.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn exists(&self, key: &[u8]) -> Result<bool, KvStoreError> {
        Ok(self.data.contains_key(key))
    }

    fn cursor(&self, prefix: &[u8]) -> Result<KvCursor, KvStoreError> {
        let entries = self
            .data
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(KvCursor::from_entries(entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_delete() {
        let mut store = InMemoryKvStore::new();
        store.put(b"dtw:T1", b"{}").unwrap();
        assert_eq!(store.get(b"dtw:T1").unwrap(), Some(b"{}".to_vec()));
        assert!(store.exists(b"dtw:T1").unwrap());
        store.delete(b"dtw:T1").unwrap();
        assert!(!store.exists(b"dtw:T1").unwrap());
        store.delete(b"dtw:T1").unwrap();
    }

    #[test]
    fn test_cursor_respects_prefix() {
        let mut store = InMemoryKvStore::new();
        store
            .atomic_batch_write(vec![
                BatchOperation::put(b"dtw:a".to_vec(), b"1".to_vec()),
                BatchOperation::put(b"dtw:b".to_vec(), b"2".to_vec()),
                BatchOperation::put(b"meta:x".to_vec(), b"3".to_vec()),
                BatchOperation::put(b"dtx:z".to_vec(), b"4".to_vec()),
            ])
            .unwrap();
        let keys: Vec<_> = store.cursor(b"dtw:").unwrap().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![b"dtw:a".to_vec(), b"dtw:b".to_vec()]);
    }

    #[test]
    fn test_batch_delete() {
        let mut store = InMemoryKvStore::new();
        store.put(b"k", b"v").unwrap();
        store
            .atomic_batch_write(vec![BatchOperation::delete(b"k".to_vec()), BatchOperation::put(b"j".to_vec(), b"w".to_vec())])
            .unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.get(b"k").unwrap().is_none());
    }
}
