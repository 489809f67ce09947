//! SQLite-based storage.

use super::{child_names, Storage, StorageError};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

const SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS entries (
    key TEXT PRIMARY KEY NOT NULL,
    value BLOB NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStorage {
    pub async fn new(db_path: PathBuf) -> Result<Self, StorageError> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let conn = tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path)?;
            conn.execute_batch(SCHEMA)?;
            Ok::<_, StorageError>(conn)
        })
        .await
        .map_err(|e| StorageError::Task(e.to_string()))??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a closure against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, rusqlite::Error> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            f(&conn).map_err(StorageError::from)
        })
        .await
        .map_err(|e| StorageError::Task(e.to_string()))?
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    fn is_persistent(&self) -> bool {
        true
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT value FROM entries WHERE key = ?1",
                params![key],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()
        })
        .await
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        let key = key.to_string();
        let now = chrono::Utc::now().to_rfc3339();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO entries (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![key, value, now],
            )
            .map(|_| ())
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM entries WHERE key = ?1", params![key])
                .map(|_| ())
        })
        .await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let owned_prefix = prefix.to_string();
        let keys = self
            .with_conn(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT key FROM entries WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key",
                )?;
                let rows = stmt.query_map(params![owned_prefix], |row| row.get::<_, String>(0))?;
                rows.collect::<Result<Vec<_>, _>>()
            })
            .await?;
        Ok(child_names(prefix, keys.iter().map(String::as_str)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_list_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStorage::new(dir.path().join("storage.db")).await.unwrap();

        store.put("roles/viewer", b"one".to_vec()).await.unwrap();
        store.put("roles/viewer", b"two".to_vec()).await.unwrap();
        store.put("roles/admin", b"three".to_vec()).await.unwrap();
        store.put("rolesx", b"other".to_vec()).await.unwrap();

        assert_eq!(store.get("roles/viewer").await.unwrap(), Some(b"two".to_vec()));
        assert_eq!(store.list("roles/").await.unwrap(), vec!["admin", "viewer"]);

        store.delete("roles/viewer").await.unwrap();
        store.delete("roles/viewer").await.unwrap();
        assert!(store.get("roles/viewer").await.unwrap().is_none());
        assert_eq!(store.list("roles/").await.unwrap(), vec!["admin"]);
    }

    #[tokio::test]
    async fn like_wildcards_in_prefix_are_literal() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStorage::new(dir.path().join("storage.db")).await.unwrap();

        store.put("roles/a_b", b"x".to_vec()).await.unwrap();
        store.put("roles_x/a", b"x".to_vec()).await.unwrap();

        assert_eq!(store.list("roles_").await.unwrap(), vec!["x/"]);
    }
}
