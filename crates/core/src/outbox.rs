//! Durable transaction outbox
//!
//! Storage-backed mapping from transaction id to serialized envelope, keyed
//! under the `tx:` prefix. `add` has overwrite semantics and doubles as the
//! in-place update primitive (last-write-wins by id); `update` is
//! read-modify-write on top of it. Ordering is established by
//! `(created_at, id)`, never by storage iteration order.

use std::collections::BTreeSet;
use std::sync::Arc;

use driftq_domain::constants::TX_KEY_PREFIX;
use driftq_domain::{
    CollectionRegistry, OutboxError, Result, Transaction, TransactionPatch,
};
use tracing::{debug, warn};

use crate::metrics::OutboxMetrics;
use crate::ports::StorageAdapter;
use crate::serializer;

/// Durable FIFO queue of pending transactions.
pub struct Outbox {
    storage: Arc<dyn StorageAdapter>,
    collections: Arc<CollectionRegistry>,
    metrics: Arc<OutboxMetrics>,
}

impl Outbox {
    /// Build an outbox over a storage adapter and the caller's collection
    /// registry
    pub fn new(
        storage: Arc<dyn StorageAdapter>,
        collections: Arc<CollectionRegistry>,
        metrics: Arc<OutboxMetrics>,
    ) -> Self {
        Self { storage, collections, metrics }
    }

    fn storage_key(id: &str) -> String {
        format!("{TX_KEY_PREFIX}{id}")
    }

    /// Serialize and write a transaction, overwriting any previous envelope
    /// with the same id
    pub async fn add(&self, tx: &Transaction) -> Result<()> {
        let blob = serializer::serialize(tx)?;
        self.storage.set(&Self::storage_key(&tx.id), &blob).await
    }

    /// Read one transaction. Deserialize failures are logged and read as
    /// `None`; storage failures propagate.
    pub async fn get(&self, id: &str) -> Result<Option<Transaction>> {
        let Some(blob) = self.storage.get(&Self::storage_key(id)).await? else {
            return Ok(None);
        };

        match serializer::deserialize(&blob, &self.collections) {
            Ok(tx) => Ok(Some(tx)),
            Err(err) => {
                warn!(tx_id = %id, error = %err, "undecodable outbox envelope");
                Ok(None)
            }
        }
    }

    /// Enumerate every stored transaction, ascending by `(created_at, id)`.
    ///
    /// Undecodable envelopes are pruned from storage (best effort) so the
    /// next enumeration starts clean.
    pub async fn get_all(&self) -> Result<Vec<Transaction>> {
        let mut transactions = Vec::new();

        for key in self.transaction_keys().await? {
            let Some(blob) = self.storage.get(&key).await? else {
                continue;
            };

            match serializer::deserialize(&blob, &self.collections) {
                Ok(tx) => transactions.push(tx),
                Err(err) => {
                    warn!(key = %key, error = %err, "pruning undecodable outbox envelope");
                    self.metrics.record_pruned_envelope();
                    if let Err(prune_err) = self.storage.delete(&key).await {
                        warn!(key = %key, error = %prune_err, "failed to prune envelope");
                    }
                }
            }
        }

        transactions.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        Ok(transactions)
    }

    /// Transactions whose global keys intersect `keys`
    pub async fn get_by_keys(&self, keys: &BTreeSet<String>) -> Result<Vec<Transaction>> {
        let all = self.get_all().await?;
        Ok(all.into_iter().filter(|tx| tx.touches_any(keys)).collect())
    }

    /// Read-modify-write the transaction with `id`. Fails with `NotFound`
    /// when the id is absent (or its envelope is undecodable).
    pub async fn update(&self, id: &str, patch: &TransactionPatch) -> Result<Transaction> {
        let Some(mut tx) = self.get(id).await? else {
            return Err(OutboxError::NotFound(format!("outbox transaction {id}")));
        };

        patch.apply(&mut tx);
        self.add(&tx).await?;
        Ok(tx)
    }

    /// Delete one transaction; absent ids are a no-op
    pub async fn remove(&self, id: &str) -> Result<()> {
        self.storage.delete(&Self::storage_key(id)).await
    }

    /// Delete several transactions
    pub async fn remove_many(&self, ids: &[String]) -> Result<()> {
        for id in ids {
            self.remove(id).await?;
        }
        Ok(())
    }

    /// Delete every `tx:`-prefixed entry. Foreign keys in the same store are
    /// left alone.
    pub async fn clear(&self) -> Result<()> {
        let keys = self.transaction_keys().await?;
        let count = keys.len();
        for key in keys {
            self.storage.delete(&key).await?;
        }
        debug!(removed = count, "outbox cleared");
        Ok(())
    }

    /// Number of stored envelopes
    pub async fn count(&self) -> Result<usize> {
        Ok(self.transaction_keys().await?.len())
    }

    async fn transaction_keys(&self) -> Result<Vec<String>> {
        let keys = self.storage.keys().await?;
        Ok(keys.into_iter().filter(|key| key.starts_with(TX_KEY_PREFIX)).collect())
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for the outbox, against the in-memory adapter.
    use std::collections::HashMap;

    use driftq_domain::{Collection, Mutation, MutationType};

    use super::*;
    use crate::storage::MemoryStorageAdapter;

    struct StubCollection;

    impl Collection for StubCollection {
        fn id(&self) -> &str {
            "todos"
        }
    }

    fn setup() -> (Outbox, Arc<MemoryStorageAdapter>) {
        let storage = Arc::new(MemoryStorageAdapter::new());
        let mut registry = CollectionRegistry::new();
        registry.register(Arc::new(StubCollection));
        let outbox = Outbox::new(
            Arc::clone(&storage) as Arc<dyn StorageAdapter>,
            Arc::new(registry),
            Arc::new(OutboxMetrics::new()),
        );
        (outbox, storage)
    }

    fn tx(id: &str, created_at: i64, key: &str) -> Transaction {
        let coll: Arc<dyn Collection> = Arc::new(StubCollection);
        Transaction::new(
            id,
            "m",
            vec![Mutation::new(coll, key, MutationType::Insert, None, None)],
            format!("idem-{id}"),
            created_at,
            HashMap::new(),
        )
    }

    #[tokio::test]
    async fn add_get_remove_round_trip() {
        let (outbox, _storage) = setup();
        let original = tx("tx-1", 100, "todos/1");

        outbox.add(&original).await.expect("add succeeds");
        let loaded = outbox.get("tx-1").await.expect("get succeeds").expect("present");
        assert_eq!(loaded, original);

        outbox.remove("tx-1").await.expect("remove succeeds");
        assert!(outbox.get("tx-1").await.expect("get succeeds").is_none());
        assert_eq!(outbox.count().await.expect("count succeeds"), 0);
    }

    #[tokio::test]
    async fn get_all_sorts_and_prunes() {
        let (outbox, storage) = setup();
        outbox.add(&tx("tx-b", 200, "todos/2")).await.expect("add succeeds");
        outbox.add(&tx("tx-a", 100, "todos/1")).await.expect("add succeeds");
        storage.set("tx:broken", "{not json").await.expect("set succeeds");
        storage.set("meta:other", "untouched").await.expect("set succeeds");

        let all = outbox.get_all().await.expect("get_all succeeds");
        let ids: Vec<String> = all.into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec!["tx-a", "tx-b"]);

        // broken envelope was pruned, foreign key untouched
        assert!(storage.get("tx:broken").await.expect("get succeeds").is_none());
        assert!(storage.get("meta:other").await.expect("get succeeds").is_some());
        assert_eq!(outbox.count().await.expect("count succeeds"), 2);
    }

    #[tokio::test]
    async fn get_by_keys_filters_on_intersection() {
        let (outbox, _storage) = setup();
        outbox.add(&tx("tx-a", 100, "todos/1")).await.expect("add succeeds");
        outbox.add(&tx("tx-b", 200, "todos/2")).await.expect("add succeeds");

        let wanted: BTreeSet<String> = ["todos/2".to_string()].into();
        let matches = outbox.get_by_keys(&wanted).await.expect("get_by_keys succeeds");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].id, "tx-b");
    }

    #[tokio::test]
    async fn update_patches_and_persists() {
        let (outbox, _storage) = setup();
        outbox.add(&tx("tx-a", 100, "todos/1")).await.expect("add succeeds");

        let patch = TransactionPatch::new().with_retry_count(2).with_next_attempt_at(9_000);
        let updated = outbox.update("tx-a", &patch).await.expect("update succeeds");
        assert_eq!(updated.retry_count, 2);

        let reloaded = outbox.get("tx-a").await.expect("get succeeds").expect("present");
        assert_eq!(reloaded.retry_count, 2);
        assert_eq!(reloaded.next_attempt_at, 9_000);
    }

    #[tokio::test]
    async fn update_missing_id_is_not_found() {
        let (outbox, _storage) = setup();

        let err = outbox
            .update("ghost", &TransactionPatch::new().with_retry_count(1))
            .await
            .expect_err("must fail");
        assert!(matches!(err, OutboxError::NotFound(_)));
    }

    #[tokio::test]
    async fn clear_leaves_foreign_keys() {
        let (outbox, storage) = setup();
        outbox.add(&tx("tx-a", 100, "todos/1")).await.expect("add succeeds");
        storage.set("meta:cursor", "42").await.expect("set succeeds");

        outbox.clear().await.expect("clear succeeds");

        assert_eq!(outbox.count().await.expect("count succeeds"), 0);
        assert!(storage.get("meta:cursor").await.expect("get succeeds").is_some());
    }

    #[tokio::test]
    async fn remove_many_deletes_each() {
        let (outbox, _storage) = setup();
        outbox.add(&tx("tx-a", 100, "todos/1")).await.expect("add succeeds");
        outbox.add(&tx("tx-b", 200, "todos/2")).await.expect("add succeeds");

        outbox
            .remove_many(&["tx-a".to_string(), "tx-b".to_string()])
            .await
            .expect("remove_many succeeds");
        assert_eq!(outbox.count().await.expect("count succeeds"), 0);
    }
}
