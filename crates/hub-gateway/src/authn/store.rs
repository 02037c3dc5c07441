//! Client records and password hashing.

use super::{AuthError, Role};
use parking_lot::RwLock;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use subtle::ConstantTimeEq;

/// A registered client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientRecord {
    #[serde(rename = "clientID")]
    pub client_id: String,
    #[serde(default)]
    pub display_name: String,
    pub role: Role,
    /// `salt$hex(sha256(salt || password))`
    pub password_hash: String,
}

/// Hash a password with a fresh random salt.
pub fn hash_password(password: &str) -> String {
    let mut salt = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt);
    let salt = hex::encode(salt);
    format!("{}${}", salt, digest(&salt, password))
}

/// Check a password against a stored `salt$hex` hash in constant time.
pub fn verify_password(stored: &str, password: &str) -> bool {
    let Some((salt, expected)) = stored.split_once('$') else {
        return false;
    };
    let actual = digest(salt, password);
    actual.as_bytes().ct_eq(expected.as_bytes()).into()
}

fn digest(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

/// Client store, optionally backed by a JSON file.
#[derive(Debug, Default)]
pub struct AuthnStore {
    clients: RwLock<HashMap<String, ClientRecord>>,
    path: Option<PathBuf>,
}

impl AuthnStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load clients from `path`. A missing file yields an empty store that
    /// will be created on the first [`AuthnStore::save`].
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AuthError> {
        let path = path.as_ref().to_path_buf();
        let clients = match std::fs::read(&path) {
            Ok(bytes) => {
                let records: Vec<ClientRecord> = serde_json::from_slice(&bytes)
                    .map_err(|e| AuthError::Store(format!("{}: {}", path.display(), e)))?;
                records
                    .into_iter()
                    .map(|r| (r.client_id.clone(), r))
                    .collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(AuthError::Store(format!("{}: {}", path.display(), e))),
        };
        tracing::info!(path = %path.display(), clients = clients.len(), "client store loaded");
        Ok(Self {
            clients: RwLock::new(clients),
            path: Some(path),
        })
    }

    /// Write all clients back to the store file, if any.
    pub fn save(&self) -> Result<(), AuthError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let mut records: Vec<ClientRecord> = self.clients.read().values().cloned().collect();
        records.sort_by(|a, b| a.client_id.cmp(&b.client_id));
        let json = serde_json::to_vec_pretty(&records).map_err(|e| AuthError::Store(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AuthError::Store(e.to_string()))?;
        }
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, json).map_err(|e| AuthError::Store(e.to_string()))?;
        std::fs::rename(&tmp, path).map_err(|e| AuthError::Store(e.to_string()))
    }

    /// Add a client with a plain password.
    pub fn add_client(
        &self,
        client_id: &str,
        display_name: &str,
        role: Role,
        password: &str,
    ) -> Result<(), AuthError> {
        let mut clients = self.clients.write();
        if clients.contains_key(client_id) {
            return Err(AuthError::DuplicateClient(client_id.to_string()));
        }
        clients.insert(
            client_id.to_string(),
            ClientRecord {
                client_id: client_id.to_string(),
                display_name: display_name.to_string(),
                role,
                password_hash: hash_password(password),
            },
        );
        Ok(())
    }

    /// Insert or replace a client with a plain password.
    pub fn upsert_client(&self, client_id: &str, display_name: &str, role: Role, password: &str) {
        self.clients.write().insert(
            client_id.to_string(),
            ClientRecord {
                client_id: client_id.to_string(),
                display_name: display_name.to_string(),
                role,
                password_hash: hash_password(password),
            },
        );
    }

    pub fn remove_client(&self, client_id: &str) -> bool {
        self.clients.write().remove(client_id).is_some()
    }

    pub fn get(&self, client_id: &str) -> Option<ClientRecord> {
        self.clients.read().get(client_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.clients.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.read().is_empty()
    }

    /// Verify the password of a client.
    pub fn verify(&self, client_id: &str, password: &str) -> Result<ClientRecord, AuthError> {
        let record = self.get(client_id).ok_or(AuthError::InvalidCredentials)?;
        if verify_password(&record.password_hash, password) {
            Ok(record)
        } else {
            Err(AuthError::InvalidCredentials)
        }
    }
}
