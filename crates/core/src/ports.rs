//! Port interfaces consumed by the outbox core
//!
//! All concrete back-ends (storage, leader election, connectivity) and the
//! caller-supplied mutation functions are reached through these traits. The
//! core ships in-memory fallbacks for each (see [`crate::storage`],
//! [`crate::election`], [`crate::online`]); durable implementations live in
//! `driftq-infra`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use driftq_domain::{MutationError, Result, Transaction, TransactionSummary};
use futures::future::BoxFuture;

/// Identifier handed back by subscription-style ports; pass it to the
/// matching `unsubscribe` to detach the callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Callback invoked with the new leadership state
pub type LeadershipCallback = Arc<dyn Fn(bool) + Send + Sync>;

/// Callback invoked when connectivity is restored
pub type OnlineCallback = Arc<dyn Fn() + Send + Sync>;

/// Callback invoked when a transaction names a mutation function missing
/// from the registry
pub type UnknownMutationFnCallback = Arc<dyn Fn(&str, &Transaction) + Send + Sync>;

/// Pure filter applied to the replayed transaction set at leadership
/// acquisition; must return a subset of its input
pub type BeforeRetryFilter = Arc<dyn Fn(Vec<Transaction>) -> Vec<Transaction> + Send + Sync>;

/// Durable key/value blob store.
///
/// Must be durable across process restarts for the outbox persistence
/// semantics to hold, and is assumed to serialize its own operations: a `get`
/// observed after a `delete` reflects the later write.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Read the value stored under `key`, if any
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write `value` under `key`, overwriting any previous value
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Delete the entry under `key`; absent keys are a no-op
    async fn delete(&self, key: &str) -> Result<()>;

    /// Enumerate every stored key
    async fn keys(&self) -> Result<Vec<String>>;

    /// Remove every entry
    async fn clear(&self) -> Result<()>;
}

/// Exclusive-leadership primitive coordinating sibling instances.
///
/// Implementations must deliver leadership to at most one instance at a time
/// across the process group they coordinate.
#[async_trait]
pub trait LeaderElection: Send + Sync {
    /// Ask for leadership. Returns true when this instance now holds it.
    /// Implementations may grant leadership later (on handover) through the
    /// change callbacks even when this returns false.
    async fn request_leadership(&self) -> Result<bool>;

    /// Give up leadership if held
    async fn release_leadership(&self) -> Result<()>;

    /// Whether this instance currently holds leadership
    fn is_leader(&self) -> bool;

    /// Register a callback fired on every leadership change observed by this
    /// instance
    fn on_leadership_change(&self, callback: LeadershipCallback) -> SubscriptionId;

    /// Detach a previously registered callback
    fn unsubscribe(&self, id: SubscriptionId);

    /// Release per-instance resources. Default: nothing to do.
    fn dispose(&self) {}
}

/// Connectivity-restoration signal.
///
/// Hosts bridge whatever real signal they have (browser online events, NBC
/// probes, a reconnect in their transport) into `notify_online`.
pub trait OnlineDetector: Send + Sync {
    /// Register a callback fired when connectivity is restored
    fn subscribe(&self, callback: OnlineCallback) -> SubscriptionId;

    /// Detach a previously registered callback
    fn unsubscribe(&self, id: SubscriptionId);

    /// Report that connectivity has been restored
    fn notify_online(&self);

    /// Drop all subscribers and release resources
    fn dispose(&self);
}

/// What a mutation function receives for one attempt.
///
/// `idempotency_key` is stable across every retry of the same transaction so
/// the server can deduplicate.
#[derive(Debug, Clone)]
pub struct MutationContext {
    pub transaction: TransactionSummary,
    pub idempotency_key: String,
}

impl MutationContext {
    /// Build the context for one attempt of `tx`
    pub fn for_transaction(tx: &Transaction) -> Self {
        Self { transaction: tx.summary(), idempotency_key: tx.idempotency_key.clone() }
    }
}

/// Caller-supplied remote mutation operation.
///
/// Must fail with [`MutationError::NonRetriable`] when the server reports a
/// permanent rejection (malformed payload, authorization, ...); every other
/// failure is subject to the retry policy.
#[async_trait]
pub trait MutationFn: Send + Sync {
    /// Execute one attempt of the transaction against the server
    async fn execute(
        &self,
        ctx: MutationContext,
    ) -> std::result::Result<serde_json::Value, MutationError>;
}

type BoxedMutationFuture = BoxFuture<'static, std::result::Result<serde_json::Value, MutationError>>;

/// Adapter so plain async closures can be registered as mutation functions.
struct FnMutation<F> {
    func: F,
}

#[async_trait]
impl<F> MutationFn for FnMutation<F>
where
    F: Fn(MutationContext) -> BoxedMutationFuture + Send + Sync,
{
    async fn execute(
        &self,
        ctx: MutationContext,
    ) -> std::result::Result<serde_json::Value, MutationError> {
        (self.func)(ctx).await
    }
}

/// Registry of mutation functions keyed by symbolic name.
#[derive(Clone, Default)]
pub struct MutationRegistry {
    functions: HashMap<String, Arc<dyn MutationFn>>,
}

impl MutationRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a mutation function under `name`. Last registration wins.
    pub fn register(&mut self, name: impl Into<String>, function: Arc<dyn MutationFn>) {
        self.functions.insert(name.into(), function);
    }

    /// Register a plain async closure under `name`
    pub fn register_fn<F, Fut>(&mut self, name: impl Into<String>, func: F)
    where
        F: Fn(MutationContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = std::result::Result<serde_json::Value, MutationError>>
            + Send
            + 'static,
    {
        let boxed = move |ctx: MutationContext| -> BoxedMutationFuture { Box::pin(func(ctx)) };
        self.register(name, Arc::new(FnMutation { func: boxed }));
    }

    /// Look up a mutation function by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn MutationFn>> {
        self.functions.get(name).cloned()
    }

    /// Whether `name` resolves to a registered function
    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Number of registered functions
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl fmt::Debug for MutationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutationRegistry")
            .field("names", &self.functions.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Narrow capability through which the executor settles caller waiters.
///
/// The coordinator implements this over its waiter map; injecting the
/// capability instead of the coordinator itself keeps the executor free of a
/// back-reference to its owner.
pub trait WaiterSink: Send + Sync {
    /// Settle the waiter for `id` with a success value (`None` models the
    /// "handled elsewhere" resolution used by non-leader instances)
    fn resolve(&self, id: &str, value: Option<serde_json::Value>);

    /// Settle the waiter for `id` with a terminal error
    fn reject(&self, id: &str, error: MutationError);
}
