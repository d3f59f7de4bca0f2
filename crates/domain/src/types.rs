//! Domain types for the mutation outbox
//!
//! A [`Transaction`] is the in-memory unit of work: an ordered list of per-row
//! mutations plus the bookkeeping the executor needs (idempotency key, retry
//! counters, last error). The [`TransactionEnvelope`] is the same record in
//! its storable shape: mutations carry only the collection id, never a live
//! collection reference. The serializer in `driftq-core` converts between the
//! two and re-attaches collections through the [`CollectionRegistry`].

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::constants::ENVELOPE_VERSION;
use crate::errors::ErrorInfo;

/// Per-row mutation kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationType {
    Insert,
    Update,
    Delete,
}

impl fmt::Display for MutationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Insert => write!(f, "insert"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// Handle to a client-side collection.
///
/// The reactive store owns the real collection objects; the outbox only needs
/// a stable identifier to re-attach references when envelopes are loaded from
/// storage.
pub trait Collection: Send + Sync {
    /// Stable identifier used to key the registry and the stored envelope.
    fn id(&self) -> &str;
}

/// Registry of live collections keyed by collection id.
///
/// Supplied by the caller at configuration time; consulted by the serializer
/// on every envelope load. A missing id is a recoverable deserialize failure.
#[derive(Clone, Default)]
pub struct CollectionRegistry {
    collections: HashMap<String, Arc<dyn Collection>>,
}

impl CollectionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a collection under its own id. Last registration wins.
    pub fn register(&mut self, collection: Arc<dyn Collection>) {
        self.collections.insert(collection.id().to_string(), collection);
    }

    /// Look up a collection by id
    pub fn get(&self, id: &str) -> Option<Arc<dyn Collection>> {
        self.collections.get(id).cloned()
    }

    /// Whether the id resolves to a registered collection
    pub fn contains(&self, id: &str) -> bool {
        self.collections.contains_key(id)
    }

    /// Number of registered collections
    pub fn len(&self) -> usize {
        self.collections.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }
}

impl fmt::Debug for CollectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionRegistry")
            .field("ids", &self.collections.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// One per-row operation inside a transaction, with its live collection
/// reference attached.
#[derive(Clone)]
pub struct Mutation {
    pub global_key: String,
    pub kind: MutationType,
    pub modified: Option<serde_json::Value>,
    pub original: Option<serde_json::Value>,
    pub collection_id: String,
    pub collection: Arc<dyn Collection>,
}

impl Mutation {
    /// Build a mutation against a live collection.
    pub fn new(
        collection: Arc<dyn Collection>,
        global_key: impl Into<String>,
        kind: MutationType,
        original: Option<serde_json::Value>,
        modified: Option<serde_json::Value>,
    ) -> Self {
        let collection_id = collection.id().to_string();
        Self { global_key: global_key.into(), kind, modified, original, collection_id, collection }
    }
}

impl fmt::Debug for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutation")
            .field("global_key", &self.global_key)
            .field("kind", &self.kind)
            .field("modified", &self.modified)
            .field("original", &self.original)
            .field("collection_id", &self.collection_id)
            .finish_non_exhaustive()
    }
}

// Live collection references are identity, not state: two mutations are equal
// when everything but the attached Arc matches.
impl PartialEq for Mutation {
    fn eq(&self, other: &Self) -> bool {
        self.global_key == other.global_key
            && self.kind == other.kind
            && self.modified == other.modified
            && self.original == other.original
            && self.collection_id == other.collection_id
    }
}

/// In-memory transaction: the unit queued, persisted and executed.
///
/// Immutable by convention once created; only the executor touches
/// `retry_count`, `next_attempt_at` and `last_error`.
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub id: String,
    pub mutation_fn_name: String,
    pub mutations: Vec<Mutation>,
    /// Global keys extracted from `mutations`, for targeted queries
    pub keys: BTreeSet<String>,
    /// Stable across retries; handed to the mutation function so the server
    /// can deduplicate repeated attempts of the same transaction
    pub idempotency_key: String,
    /// Creation instant, epoch milliseconds; set once, never mutated
    pub created_at: i64,
    pub retry_count: u32,
    /// Earliest wall-clock instant (epoch ms) the next attempt may run
    pub next_attempt_at: i64,
    pub last_error: Option<ErrorInfo>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub version: u32,
}

impl Transaction {
    /// Assemble a new transaction. `keys` is derived from `mutations`;
    /// `next_attempt_at` starts at `created_at` so the first attempt is
    /// immediately eligible.
    pub fn new(
        id: impl Into<String>,
        mutation_fn_name: impl Into<String>,
        mutations: Vec<Mutation>,
        idempotency_key: impl Into<String>,
        created_at: i64,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Self {
        let keys = mutations.iter().map(|m| m.global_key.clone()).collect();
        Self {
            id: id.into(),
            mutation_fn_name: mutation_fn_name.into(),
            mutations,
            keys,
            idempotency_key: idempotency_key.into(),
            created_at,
            retry_count: 0,
            next_attempt_at: created_at,
            last_error: None,
            metadata,
            version: ENVELOPE_VERSION,
        }
    }

    /// FIFO sort key. Wall clocks do not guarantee unique `created_at`, so
    /// ties break on id to keep ordering deterministic.
    pub fn sort_key(&self) -> (i64, &str) {
        (self.created_at, self.id.as_str())
    }

    /// Whether any of the transaction's global keys intersects `keys`.
    pub fn touches_any(&self, keys: &BTreeSet<String>) -> bool {
        self.keys.intersection(keys).next().is_some()
    }

    /// Reference-free view handed to the mutation function.
    pub fn summary(&self) -> TransactionSummary {
        TransactionSummary {
            id: self.id.clone(),
            mutations: self.mutations.iter().map(MutationRecord::from).collect(),
            metadata: self.metadata.clone(),
        }
    }
}

/// What the mutation function sees: the transaction minus executor
/// bookkeeping and live references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionSummary {
    pub id: String,
    pub mutations: Vec<MutationRecord>,
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Stored form of a [`Mutation`]: collection id only, no live reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationRecord {
    pub global_key: String,
    #[serde(rename = "type")]
    pub kind: MutationType,
    pub modified: Option<serde_json::Value>,
    pub original: Option<serde_json::Value>,
    pub collection_id: String,
}

impl From<&Mutation> for MutationRecord {
    fn from(mutation: &Mutation) -> Self {
        Self {
            global_key: mutation.global_key.clone(),
            kind: mutation.kind,
            modified: mutation.modified.clone(),
            original: mutation.original.clone(),
            collection_id: mutation.collection_id.clone(),
        }
    }
}

/// On-disk envelope: the transaction in its storable shape.
///
/// Unknown `version` values are discarded with a warning on load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionEnvelope {
    pub id: String,
    pub mutation_fn_name: String,
    pub mutations: Vec<MutationRecord>,
    pub keys: Vec<String>,
    pub idempotency_key: String,
    pub created_at: i64,
    pub retry_count: u32,
    pub next_attempt_at: i64,
    pub last_error: Option<ErrorInfo>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub version: u32,
}

impl From<&Transaction> for TransactionEnvelope {
    fn from(tx: &Transaction) -> Self {
        Self {
            id: tx.id.clone(),
            mutation_fn_name: tx.mutation_fn_name.clone(),
            mutations: tx.mutations.iter().map(MutationRecord::from).collect(),
            keys: tx.keys.iter().cloned().collect(),
            idempotency_key: tx.idempotency_key.clone(),
            created_at: tx.created_at,
            retry_count: tx.retry_count,
            next_attempt_at: tx.next_attempt_at,
            last_error: tx.last_error.clone(),
            metadata: tx.metadata.clone(),
            version: tx.version,
        }
    }
}

/// Partial update applied by `Outbox::update` (read-modify-write).
#[derive(Debug, Clone, Default)]
pub struct TransactionPatch {
    pub retry_count: Option<u32>,
    pub next_attempt_at: Option<i64>,
    pub last_error: Option<Option<ErrorInfo>>,
}

impl TransactionPatch {
    /// Create an empty patch
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the retry count
    #[must_use]
    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = Some(retry_count);
        self
    }

    /// Set the next-attempt instant (epoch ms)
    #[must_use]
    pub fn with_next_attempt_at(mut self, next_attempt_at: i64) -> Self {
        self.next_attempt_at = Some(next_attempt_at);
        self
    }

    /// Set or clear the last error
    #[must_use]
    pub fn with_last_error(mut self, last_error: Option<ErrorInfo>) -> Self {
        self.last_error = Some(last_error);
        self
    }

    /// Apply the patch to a transaction in place
    pub fn apply(&self, tx: &mut Transaction) {
        if let Some(retry_count) = self.retry_count {
            tx.retry_count = retry_count;
        }
        if let Some(next_attempt_at) = self.next_attempt_at {
            tx.next_attempt_at = next_attempt_at;
        }
        if let Some(ref last_error) = self.last_error {
            tx.last_error = last_error.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for domain types.
    use super::*;

    struct StubCollection {
        id: String,
    }

    impl Collection for StubCollection {
        fn id(&self) -> &str {
            &self.id
        }
    }

    fn collection(id: &str) -> Arc<dyn Collection> {
        Arc::new(StubCollection { id: id.to_string() })
    }

    fn sample_mutation(coll: &Arc<dyn Collection>, key: &str) -> Mutation {
        Mutation::new(
            Arc::clone(coll),
            key,
            MutationType::Insert,
            None,
            Some(serde_json::json!({"name": "row"})),
        )
    }

    /// Validates `Transaction::new` behavior for the derived fields scenario.
    ///
    /// Assertions:
    /// - Confirms `tx.keys` contains every mutation's global key.
    /// - Confirms `tx.retry_count` equals `0`.
    /// - Confirms `tx.next_attempt_at` equals `tx.created_at`.
    /// - Ensures `tx.last_error.is_none()` evaluates to true.
    /// - Confirms `tx.version` equals `ENVELOPE_VERSION`.
    #[test]
    fn test_transaction_new_derives_fields() {
        let coll = collection("todos");
        let mutations = vec![sample_mutation(&coll, "todos/1"), sample_mutation(&coll, "todos/2")];
        let tx = Transaction::new(
            "tx-1",
            "upsertTodos",
            mutations,
            "idem-1",
            1_700_000_000_000,
            HashMap::new(),
        );

        assert!(tx.keys.contains("todos/1"));
        assert!(tx.keys.contains("todos/2"));
        assert_eq!(tx.retry_count, 0);
        assert_eq!(tx.next_attempt_at, tx.created_at);
        assert!(tx.last_error.is_none());
        assert_eq!(tx.version, ENVELOPE_VERSION);
    }

    /// Validates `Transaction::sort_key` behavior for the tie-break scenario.
    ///
    /// Assertions:
    /// - Ensures equal `created_at` values order lexicographically by id.
    #[test]
    fn test_sort_key_tie_breaks_on_id() {
        let coll = collection("todos");
        let a = Transaction::new(
            "tx-a",
            "m",
            vec![sample_mutation(&coll, "k1")],
            "i-a",
            42,
            HashMap::new(),
        );
        let b = Transaction::new(
            "tx-b",
            "m",
            vec![sample_mutation(&coll, "k2")],
            "i-b",
            42,
            HashMap::new(),
        );

        assert!(a.sort_key() < b.sort_key());
    }

    /// Validates `Transaction::touches_any` behavior for key intersection.
    ///
    /// Assertions:
    /// - Ensures an overlapping key set matches.
    /// - Ensures a disjoint key set does not.
    #[test]
    fn test_touches_any() {
        let coll = collection("todos");
        let tx = Transaction::new(
            "tx-1",
            "m",
            vec![sample_mutation(&coll, "todos/1")],
            "i-1",
            1,
            HashMap::new(),
        );

        let hit: BTreeSet<String> = ["todos/1".to_string(), "other".to_string()].into();
        let miss: BTreeSet<String> = ["nope".to_string()].into();

        assert!(tx.touches_any(&hit));
        assert!(!tx.touches_any(&miss));
    }

    /// Validates `TransactionEnvelope::from` behavior for the envelope
    /// projection scenario.
    ///
    /// Assertions:
    /// - Confirms scalar fields survive the projection.
    /// - Confirms mutation records carry the collection id only.
    #[test]
    fn test_envelope_projection() {
        let coll = collection("todos");
        let tx = Transaction::new(
            "tx-1",
            "upsertTodos",
            vec![sample_mutation(&coll, "todos/1")],
            "idem-1",
            1_700_000_000_000,
            HashMap::from([("origin".to_string(), serde_json::json!("ui"))]),
        );

        let envelope = TransactionEnvelope::from(&tx);

        assert_eq!(envelope.id, tx.id);
        assert_eq!(envelope.idempotency_key, tx.idempotency_key);
        assert_eq!(envelope.created_at, tx.created_at);
        assert_eq!(envelope.mutations.len(), 1);
        assert_eq!(envelope.mutations[0].collection_id, "todos");
        assert_eq!(envelope.keys, vec!["todos/1".to_string()]);
        assert_eq!(envelope.metadata.get("origin"), Some(&serde_json::json!("ui")));
    }

    /// Validates `MutationRecord` serde behavior for the wire field naming
    /// scenario.
    ///
    /// Assertions:
    /// - Ensures the mutation kind serializes under the `type` key.
    /// - Ensures the kind value is lowercase.
    #[test]
    fn test_mutation_record_serde_field_names() {
        let coll = collection("todos");
        let record = MutationRecord::from(&sample_mutation(&coll, "todos/1"));

        let json = serde_json::to_value(&record).expect("serializes");
        assert_eq!(json.get("type"), Some(&serde_json::json!("insert")));
    }

    /// Validates `TransactionPatch::apply` behavior for the partial update
    /// scenario.
    ///
    /// Assertions:
    /// - Confirms patched fields change.
    /// - Confirms unpatched fields are untouched.
    #[test]
    fn test_patch_apply() {
        let coll = collection("todos");
        let mut tx = Transaction::new(
            "tx-1",
            "m",
            vec![sample_mutation(&coll, "todos/1")],
            "i-1",
            100,
            HashMap::new(),
        );

        let error = ErrorInfo {
            name: "Transient".to_string(),
            message: "socket reset".to_string(),
            stack: None,
        };
        TransactionPatch::new()
            .with_retry_count(3)
            .with_next_attempt_at(4_000)
            .with_last_error(Some(error.clone()))
            .apply(&mut tx);

        assert_eq!(tx.retry_count, 3);
        assert_eq!(tx.next_attempt_at, 4_000);
        assert_eq!(tx.last_error, Some(error));
        assert_eq!(tx.created_at, 100);
        assert_eq!(tx.id, "tx-1");
    }

    /// Validates `Mutation` equality ignores the attached collection
    /// reference.
    ///
    /// Assertions:
    /// - Confirms mutations with distinct Arc instances but equal data
    ///   compare equal.
    #[test]
    fn test_mutation_equality_ignores_live_reference() {
        let a = sample_mutation(&collection("todos"), "todos/1");
        let b = sample_mutation(&collection("todos"), "todos/1");

        assert_eq!(a, b);
    }
}
