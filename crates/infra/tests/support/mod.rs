//! Shared helpers for the infra integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

use driftq_core::MutationRegistry;
use driftq_domain::{Collection, CollectionRegistry, MutationError};

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

/// Registry whose function succeeds on every call, counting attempts.
pub fn succeeding_registry(name: &str) -> (MutationRegistry, Arc<AtomicUsize>) {
    let attempts = Arc::new(AtomicUsize::new(0));
    let mut registry = MutationRegistry::new();
    let counter = Arc::clone(&attempts);
    registry.register_fn(name, move |_ctx| {
        counter.fetch_add(1, AtomicOrdering::SeqCst);
        async move { Ok(serde_json::json!({"ok": 1})) }
    });
    (registry, attempts)
}

/// Registry whose function never returns, counting how often it was entered.
pub fn hanging_registry(name: &str) -> (MutationRegistry, Arc<AtomicUsize>) {
    let started = Arc::new(AtomicUsize::new(0));
    let mut registry = MutationRegistry::new();
    let counter = Arc::clone(&started);
    registry.register_fn(name, move |_ctx| {
        counter.fetch_add(1, AtomicOrdering::SeqCst);
        async move {
            futures::future::pending::<Result<serde_json::Value, MutationError>>().await
        }
    });
    (registry, started)
}
