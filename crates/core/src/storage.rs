//! In-memory storage fallback
//!
//! Non-durable [`StorageAdapter`] used when the caller supplies no storage
//! override, and as the shared-storage stand-in in tests. Durable adapters
//! live in `driftq-infra`.

use std::collections::HashMap;

use async_trait::async_trait;
use driftq_domain::Result;
use parking_lot::Mutex;

use crate::ports::StorageAdapter;

/// `HashMap`-backed storage adapter. Cloning is not supported; share it via
/// `Arc` so sibling coordinators in tests observe the same entries.
#[derive(Debug, Default)]
pub struct MemoryStorageAdapter {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStorageAdapter {
    /// Create an empty adapter
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl StorageAdapter for MemoryStorageAdapter {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.entries.lock().keys().cloned().collect())
    }

    async fn clear(&self) -> Result<()> {
        self.entries.lock().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for the in-memory adapter.
    use super::*;

    /// Validates basic CRUD behavior of the memory adapter.
    ///
    /// Assertions:
    /// - Confirms set/get round-trips values.
    /// - Confirms delete removes entries and absent keys read as `None`.
    #[tokio::test]
    async fn test_memory_adapter_crud() {
        let storage = MemoryStorageAdapter::new();

        storage.set("tx:1", "{}").await.expect("set succeeds");
        assert_eq!(storage.get("tx:1").await.expect("get succeeds"), Some("{}".to_string()));

        storage.delete("tx:1").await.expect("delete succeeds");
        assert_eq!(storage.get("tx:1").await.expect("get succeeds"), None);
    }

    /// Validates `keys` and `clear` behavior.
    ///
    /// Assertions:
    /// - Confirms `keys` enumerates every stored key.
    /// - Confirms `clear` empties the store.
    #[tokio::test]
    async fn test_memory_adapter_keys_and_clear() {
        let storage = MemoryStorageAdapter::new();
        storage.set("tx:1", "a").await.expect("set succeeds");
        storage.set("meta:x", "b").await.expect("set succeeds");

        let mut keys = storage.keys().await.expect("keys succeeds");
        keys.sort();
        assert_eq!(keys, vec!["meta:x".to_string(), "tx:1".to_string()]);

        storage.clear().await.expect("clear succeeds");
        assert!(storage.is_empty());
    }
}
