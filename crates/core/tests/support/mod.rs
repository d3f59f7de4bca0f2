//! Shared helpers for the core integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use driftq_core::ports::{LeaderElection, LeadershipCallback, SubscriptionId};
use driftq_core::MutationRegistry;
use driftq_domain::{
    Collection, CollectionRegistry, Mutation, MutationError, MutationType, Result, Transaction,
};
use parking_lot::Mutex;

/// Minimal collection stub carrying just an id.
pub struct TestCollection {
    id: String,
}

impl TestCollection {
    pub fn named(id: &str) -> Arc<dyn Collection> {
        Arc::new(Self { id: id.to_string() })
    }
}

impl Collection for TestCollection {
    fn id(&self) -> &str {
        &self.id
    }
}

/// Registry containing one collection per id.
pub fn collections(ids: &[&str]) -> CollectionRegistry {
    let mut registry = CollectionRegistry::new();
    for id in ids {
        registry.register(TestCollection::named(id));
    }
    registry
}

/// A transaction with a single insert mutation, for direct executor/outbox
/// tests.
pub fn insert_transaction(id: &str, created_at: i64, global_key: &str) -> Transaction {
    Transaction::new(
        id,
        "submit",
        vec![Mutation::new(
            TestCollection::named("todos"),
            global_key,
            MutationType::Insert,
            None,
            Some(serde_json::json!({"title": "row"})),
        )],
        format!("idem-{id}"),
        created_at,
        HashMap::new(),
    )
}

/// Mutation registry with a scripted function: the first `failures` calls
/// fail transiently, later calls return `{"ok": 1}`. Returns the shared
/// attempt counter and the idempotency keys observed per attempt.
pub fn flaky_registry(
    name: &str,
    failures: usize,
) -> (MutationRegistry, Arc<AtomicUsize>, Arc<Mutex<Vec<String>>>) {
    let attempts = Arc::new(AtomicUsize::new(0));
    let seen_keys = Arc::new(Mutex::new(Vec::new()));
    let mut registry = MutationRegistry::new();
    let counter = Arc::clone(&attempts);
    let keys = Arc::clone(&seen_keys);
    registry.register_fn(name, move |ctx| {
        let attempt = counter.fetch_add(1, AtomicOrdering::SeqCst) + 1;
        keys.lock().push(ctx.idempotency_key.clone());
        async move {
            if attempt <= failures {
                Err(MutationError::Transient(format!("attempt {attempt} refused")))
            } else {
                Ok(serde_json::json!({"ok": 1}))
            }
        }
    });
    (registry, attempts, seen_keys)
}

/// Leader election that never grants leadership (models a follower tab).
#[derive(Default)]
pub struct DeniedElection {
    listeners: Mutex<Vec<LeadershipCallback>>,
}

impl DeniedElection {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl LeaderElection for DeniedElection {
    async fn request_leadership(&self) -> Result<bool> {
        Ok(false)
    }

    async fn release_leadership(&self) -> Result<()> {
        Ok(())
    }

    fn is_leader(&self) -> bool {
        false
    }

    fn on_leadership_change(&self, callback: LeadershipCallback) -> SubscriptionId {
        let mut listeners = self.listeners.lock();
        listeners.push(callback);
        SubscriptionId(listeners.len() as u64 - 1)
    }

    fn unsubscribe(&self, _id: SubscriptionId) {}
}

/// Poll `condition` until it holds or the timeout elapses.
pub async fn wait_until<F>(condition: F, timeout: Duration) -> bool
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
