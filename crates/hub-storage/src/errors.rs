use std::path::PathBuf;
use thiserror::Error;

/// Key-value backend errors.
#[derive(Debug, Error)]
pub enum KvStoreError {
    /// I/O error during read/write.
    #[error("KV store I/O error: {message}")]
    Io { message: String },

    /// Stored bytes could not be decoded.
    #[error("KV store corruption: {message}")]
    Corruption { message: String },

    /// Another process holds the store.
    #[error("KV store already in use{} ({})", .pid.map(|p| format!(" by process {p}")).unwrap_or_default(), .path.display())]
    Locked { pid: Option<u32>, path: PathBuf },
}

impl KvStoreError {
    pub fn io(err: impl std::fmt::Display) -> Self {
        Self::Io {
            message: err.to_string(),
        }
    }
}

impl From<std::io::Error> for KvStoreError {
    fn from(err: std::io::Error) -> Self {
        Self::io(err)
    }
}
