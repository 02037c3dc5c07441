use crate::errors::KvStoreError;
use crate::ports::{BatchOperation, KeyValueStore, KvCursor};
use fs2::FileExt;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// File-backed key-value store.
///
/// Keeps the whole map in memory and rewrites one binary file on every
/// mutation, atomically via a temp file and rename. Suitable for hubs with a
/// few thousand Things; the write-behind flusher batches changes so rewrites
/// happen once per flush, not once per update.
///
/// File format: `[key_len:u32 LE][key][value_len:u32 LE][value]...`
///
/// A sibling `<file>.lock` is held with an exclusive advisory lock for the
/// lifetime of the store so two hubs cannot share one file.
pub struct FileBackedKvStore {
    data: BTreeMap<Vec<u8>, Vec<u8>>,
    path: PathBuf,
    _lock: File,
}

impl FileBackedKvStore {
    /// Open the store at `path`, creating parent directories as needed.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, KvStoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let lock = Self::acquire_lock(&path)?;

        let data = match std::fs::metadata(&path) {
            Ok(meta) => {
                tracing::info!(path = %path.display(), bytes = meta.len(), "opening storage file");
                Self::load_from_file(&path)?
            }
            Err(_) => {
                tracing::info!(path = %path.display(), "no existing storage file");
                BTreeMap::new()
            }
        };
        tracing::debug!(keys = data.len(), "storage file loaded");

        Ok(Self {
            data,
            path,
            _lock: lock,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn acquire_lock(path: &Path) -> Result<File, KvStoreError> {
        let lock_path = path.with_extension("lock");
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)?;
        if file.try_lock_exclusive().is_err() {
            let mut contents = String::new();
            let pid = file
                .read_to_string(&mut contents)
                .ok()
                .and_then(|_| contents.trim().parse().ok());
            return Err(KvStoreError::Locked {
                pid,
                path: lock_path,
            });
        }
        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        Ok(file)
    }

    fn load_from_file(path: &Path) -> Result<BTreeMap<Vec<u8>, Vec<u8>>, KvStoreError> {
        let mut bytes = Vec::new();
        File::open(path)?.read_to_end(&mut bytes)?;

        let mut data = BTreeMap::new();
        let mut pos = 0;
        while pos < bytes.len() {
            let key = read_chunk(&bytes, &mut pos)?;
            let value = read_chunk(&bytes, &mut pos)?;
            data.insert(key, value);
        }
        Ok(data)
    }

    fn save_to_file(&self) -> Result<(), KvStoreError> {
        let mut bytes = Vec::new();
        for (key, value) in &self.data {
            write_chunk(&mut bytes, key)?;
            write_chunk(&mut bytes, value)?;
        }

        let temp_path = self.path.with_extension("tmp");
        let mut file = File::create(&temp_path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        std::fs::rename(&temp_path, &self.path)?;
        Ok(())
    }
}

fn read_chunk(bytes: &[u8], pos: &mut usize) -> Result<Vec<u8>, KvStoreError> {
    let corrupt = |what: &str| KvStoreError::Corruption {
        message: format!("truncated {what} at offset {pos}"),
    };
    let len_bytes: [u8; 4] = bytes
        .get(*pos..*pos + 4)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| corrupt("length"))?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    let start = *pos + 4;
    let chunk = bytes
        .get(start..start + len)
        .ok_or_else(|| corrupt("chunk"))?
        .to_vec();
    *pos = start + len;
    Ok(chunk)
}

fn write_chunk(out: &mut Vec<u8>, chunk: &[u8]) -> Result<(), KvStoreError> {
    let len = u32::try_from(chunk.len()).map_err(|_| KvStoreError::Io {
        message: format!("chunk of {} bytes exceeds file format limit", chunk.len()),
    })?;
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(chunk);
    Ok(())
}

impl KeyValueStore for FileBackedKvStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvStoreError> {
        Ok(self.data.get(key).cloned())
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), KvStoreError> {
        self.atomic_batch_write(vec![BatchOperation::put(key, value)])
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), KvStoreError> {
        self.atomic_batch_write(vec![BatchOperation::delete(key)])
    }

    fn atomic_batch_write(&mut self, operations: Vec<BatchOperation>) -> Result<(), KvStoreError> {
        let previous = self.data.clone();
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
        // Roll the map back when the file could not be replaced.
        self.save_to_file().inspect_err(|_| self.data = previous)
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
