//! Durable key/value storage with pluggable backends.
//!
//! Supports:
//! - `memory`: In-memory storage (non-persistent, for testing)
//! - `file`: Single JSON snapshot file
//! - `sqlite`: SQLite database, one row per entry
//!
//! Keys are slash-separated paths (`config`, `roles/viewer`). Values are raw
//! bytes; the engine stores JSON documents through [`get_json`] and [`put_json`].

mod file;
mod memory;
mod sqlite;

pub use file::FileStorage;
pub use memory::InMemoryStorage;
pub use sqlite::SqliteStorage;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Error from a storage backend.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("failed to decode entry {key}: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode entry {key}: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("storage task failed: {0}")]
    Task(String),
}

/// Storage trait - implemented by all storage backends.
///
/// Backends must give read-after-write consistency per key. No cross-key
/// transactions are offered or required.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Whether this store persists data across restarts.
    fn is_persistent(&self) -> bool;

    /// Read the raw value stored at `key`.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Write `value` at `key`, replacing any previous value.
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError>;

    /// Remove `key`. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// List the direct children of `prefix`, sorted lexically.
    ///
    /// Nested entries are collapsed to their first path segment with a
    /// trailing `/`, the way hierarchical listings usually behave.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}

/// Shared storage handle.
pub type SharedStorage = Arc<dyn Storage>;

/// Read and decode a JSON entry.
pub async fn get_json<T: DeserializeOwned>(
    storage: &dyn Storage,
    key: &str,
) -> Result<Option<T>, StorageError> {
    match storage.get(key).await? {
        Some(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| StorageError::Decode {
                key: key.to_string(),
                source,
            }),
        None => Ok(None),
    }
}

/// Encode and write a JSON entry.
pub async fn put_json<T: Serialize + ?Sized>(
    storage: &dyn Storage,
    key: &str,
    value: &T,
) -> Result<(), StorageError> {
    let bytes = serde_json::to_vec(value).map_err(|source| StorageError::Encode {
        key: key.to_string(),
        source,
    })?;
    storage.put(key, bytes).await
}

/// Collapse full keys under `prefix` into sorted, de-duplicated child names.
pub(crate) fn child_names<'a>(prefix: &str, keys: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut out: Vec<String> = keys
        .filter_map(|key| key.strip_prefix(prefix))
        .filter(|rest| !rest.is_empty())
        .map(|rest| match rest.find('/') {
            Some(idx) => rest[..=idx].to_string(),
            None => rest.to_string(),
        })
        .collect();
    out.sort();
    out.dedup();
    out
}

/// Storage backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageType {
    Memory,
    #[default]
    File,
    Sqlite,
}

impl StorageType {
    /// Parse from environment variable value.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "memory" | "inmem" => Some(Self::Memory),
            "file" | "json" => Some(Self::File),
            "sqlite" | "db" => Some(Self::Sqlite),
            _ => None,
        }
    }
}

/// Create a storage backend based on type and data directory.
pub async fn create_storage(
    storage_type: StorageType,
    data_dir: PathBuf,
) -> Result<SharedStorage, StorageError> {
    match storage_type {
        StorageType::Memory => Ok(Arc::new(InMemoryStorage::new())),
        StorageType::File => {
            let store = FileStorage::new(data_dir.join("storage.json")).await?;
            Ok(Arc::new(store))
        }
        StorageType::Sqlite => {
            let store = SqliteStorage::new(data_dir.join("storage.db")).await?;
            Ok(Arc::new(store))
        }
    }
}
