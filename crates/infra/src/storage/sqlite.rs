//! SQLite-backed implementation of the storage port.
//!
//! Provides the durable key/value blob store the outbox persists its
//! envelopes into. Every call crosses onto the blocking pool; the connection
//! mutex serializes operations, which is exactly the ordering guarantee the
//! storage contract asks for (a read observed after a delete reflects the
//! later write).

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use driftq_core::StorageAdapter;
use driftq_domain::Result;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension};
use tokio::task;
use tracing::debug;

use crate::errors::InfraError;

const CREATE_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS kv_store (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )";

const GET_SQL: &str = "SELECT value FROM kv_store WHERE key = ?1";

const SET_SQL: &str = "INSERT INTO kv_store (key, value) VALUES (?1, ?2)
    ON CONFLICT(key) DO UPDATE SET value = excluded.value";

const DELETE_SQL: &str = "DELETE FROM kv_store WHERE key = ?1";

const KEYS_SQL: &str = "SELECT key FROM kv_store";

const CLEAR_SQL: &str = "DELETE FROM kv_store";

/// Durable SQLite key/value store.
pub struct SqliteStorageAdapter {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStorageAdapter {
    /// Open (or create) the database at `path` and prepare the store table.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path.as_ref()).map_err(InfraError::from)?;
        Self::initialize(conn, Some(path.as_ref()))
    }

    /// Open a private in-memory database. Useful for tests; not durable.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(InfraError::from)?;
        Self::initialize(conn, None)
    }

    fn initialize(conn: Connection, path: Option<&Path>) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL").map_err(InfraError::from)?;
        conn.pragma_update(None, "synchronous", "NORMAL").map_err(InfraError::from)?;
        conn.execute_batch(CREATE_TABLE_SQL).map_err(InfraError::from)?;

        if let Some(path) = path {
            debug!(path = %path.display(), "sqlite storage opened");
        }
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    async fn run_blocking<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        task::spawn_blocking(move || -> Result<T> {
            let conn = conn.lock();
            op(&conn).map_err(|e| InfraError::from(e).into())
        })
        .await
        .map_err(InfraError::from)?
    }
}

#[async_trait]
impl StorageAdapter for SqliteStorageAdapter {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_owned();
        self.run_blocking(move |conn| {
            conn.query_row(GET_SQL, [&key], |row| row.get::<_, String>(0)).optional()
        })
        .await
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let key = key.to_owned();
        let value = value.to_owned();
        self.run_blocking(move |conn| conn.execute(SET_SQL, [&key, &value]).map(|_| ())).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let key = key.to_owned();
        self.run_blocking(move |conn| conn.execute(DELETE_SQL, [&key]).map(|_| ())).await
    }

    async fn keys(&self) -> Result<Vec<String>> {
        self.run_blocking(move |conn| {
            let mut stmt = conn.prepare(KEYS_SQL)?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            rows.collect()
        })
        .await
    }

    async fn clear(&self) -> Result<()> {
        self.run_blocking(move |conn| conn.execute(CLEAR_SQL, []).map(|_| ())).await
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn set_get_delete_round_trip() {
        let storage = SqliteStorageAdapter::in_memory().expect("opens");

        storage.set("tx:1", "{\"id\":\"1\"}").await.expect("set succeeds");
        assert_eq!(
            storage.get("tx:1").await.expect("get succeeds"),
            Some("{\"id\":\"1\"}".to_string())
        );

        storage.delete("tx:1").await.expect("delete succeeds");
        assert_eq!(storage.get("tx:1").await.expect("get succeeds"), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn set_overwrites_existing_value() {
        let storage = SqliteStorageAdapter::in_memory().expect("opens");

        storage.set("tx:1", "old").await.expect("set succeeds");
        storage.set("tx:1", "new").await.expect("set succeeds");

        assert_eq!(storage.get("tx:1").await.expect("get succeeds"), Some("new".to_string()));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn keys_and_clear() {
        let storage = SqliteStorageAdapter::in_memory().expect("opens");
        storage.set("tx:1", "a").await.expect("set succeeds");
        storage.set("tx:2", "b").await.expect("set succeeds");
        storage.set("meta:cursor", "c").await.expect("set succeeds");

        let mut keys = storage.keys().await.expect("keys succeeds");
        keys.sort();
        assert_eq!(keys, vec!["meta:cursor", "tx:1", "tx:2"]);

        storage.clear().await.expect("clear succeeds");
        assert!(storage.keys().await.expect("keys succeeds").is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn values_survive_reopen() {
        let temp_dir = TempDir::new().expect("temp dir created");
        let db_path = temp_dir.path().join("outbox.db");

        {
            let storage = SqliteStorageAdapter::open(&db_path).expect("opens");
            storage.set("tx:persisted", "payload").await.expect("set succeeds");
        }

        let reopened = SqliteStorageAdapter::open(&db_path).expect("reopens");
        assert_eq!(
            reopened.get("tx:persisted").await.expect("get succeeds"),
            Some("payload".to_string())
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delete_missing_key_is_noop() {
        let storage = SqliteStorageAdapter::in_memory().expect("opens");
        storage.delete("tx:ghost").await.expect("delete succeeds");
    }
}
