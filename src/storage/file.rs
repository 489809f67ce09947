//! JSON file-based storage.
//!
//! The whole keyspace lives in one snapshot file that is rewritten atomically
//! (temp file + rename) on every mutation.

use super::{child_names, Storage, StorageError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::fs;
use tokio::sync::RwLock;

#[derive(Debug, Serialize, Deserialize, Default)]
struct StorageSnapshot {
    /// Values are kept as JSON documents when they parse as such, so the file
    /// stays readable by operators.
    entries: BTreeMap<String, serde_json::Value>,
}

pub struct FileStorage {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl FileStorage {
    pub async fn new(path: PathBuf) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let entries = match fs::read(&path).await {
            Ok(bytes) => {
                let snapshot: StorageSnapshot =
                    serde_json::from_slice(&bytes).map_err(|source| StorageError::Decode {
                        key: path.display().to_string(),
                        source,
                    })?;
                snapshot
                    .entries
                    .into_iter()
                    .map(|(key, value)| {
                        let bytes = match value {
                            serde_json::Value::String(raw) => raw.into_bytes(),
                            other => other.to_string().into_bytes(),
                        };
                        (key, bytes)
                    })
                    .collect()
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => return Err(err.into()),
        };

        tracing::debug!("Loaded {} storage entries from {}", entries.len(), path.display());

        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    async fn persist(&self, entries: &BTreeMap<String, Vec<u8>>) -> Result<(), StorageError> {
        let snapshot = StorageSnapshot {
            entries: entries
                .iter()
                .map(|(key, bytes)| {
                    // Strings are reserved for raw payloads so they reload byte-exact.
                    let value = match serde_json::from_slice(bytes) {
                        Ok(serde_json::Value::String(_)) | Err(_) => serde_json::Value::String(
                            String::from_utf8_lossy(bytes).into_owned(),
                        ),
                        Ok(value) => value,
                    };
                    (key.clone(), value)
                })
                .collect(),
        };
        let data = serde_json::to_vec_pretty(&snapshot).map_err(|source| StorageError::Encode {
            key: self.path.display().to_string(),
            source,
        })?;
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, data).await?;
        fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl Storage for FileStorage {
    fn is_persistent(&self) -> bool {
        true
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        // Hold the write lock across persist so snapshots land in order.
        let mut entries = self.entries.write().await;
        let previous = entries.insert(key.to_string(), value);
        if let Err(err) = self.persist(&entries).await {
            match previous {
                Some(old) => entries.insert(key.to_string(), old),
                None => entries.remove(key),
            };
            return Err(err);
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.write().await;
        let Some(previous) = entries.remove(key) else {
            return Ok(());
        };
        if let Err(err) = self.persist(&entries).await {
            entries.insert(key.to_string(), previous);
            return Err(err);
        }
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let entries = self.entries.read().await;
        Ok(child_names(prefix, entries.keys().map(String::as_str)))
    }
}
