//! Draft builder
//!
//! Caller-side builder that accumulates per-row mutations and, on commit,
//! assembles a transaction (fresh id, idempotency key, creation timestamp)
//! and persists it through the coordinator. The returned handle exposes the
//! transaction id and the waiter future settled at terminal state.

use std::collections::HashMap;
use std::sync::Arc;

use driftq_domain::{
    Collection, Mutation, MutationType, OutboxError, Result, Transaction,
};
use tracing::debug;
use uuid::Uuid;

use crate::coordinator::OfflineCoordinator;
use crate::waiters::{WaiterFuture, WaiterOutcome};

/// Options for [`OfflineCoordinator::create_draft`].
#[derive(Debug, Clone)]
pub struct DraftOptions {
    pub mutation_fn_name: String,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl DraftOptions {
    /// Create options naming the mutation function that will execute the
    /// committed transaction
    pub fn new(mutation_fn_name: impl Into<String>) -> Self {
        Self { mutation_fn_name: mutation_fn_name.into(), metadata: HashMap::new() }
    }

    /// Attach an opaque metadata entry carried with the transaction
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Accumulates mutations for one transaction.
pub struct Draft {
    coordinator: OfflineCoordinator,
    mutation_fn_name: String,
    metadata: HashMap<String, serde_json::Value>,
    mutations: Vec<Mutation>,
}

impl Draft {
    pub(crate) fn new(coordinator: OfflineCoordinator, options: DraftOptions) -> Self {
        Self {
            coordinator,
            mutation_fn_name: options.mutation_fn_name,
            metadata: options.metadata,
            mutations: Vec::new(),
        }
    }

    /// Record an insert of a new row
    pub fn insert(
        &mut self,
        collection: &Arc<dyn Collection>,
        global_key: impl Into<String>,
        modified: serde_json::Value,
    ) -> &mut Self {
        self.mutations.push(Mutation::new(
            Arc::clone(collection),
            global_key,
            MutationType::Insert,
            None,
            Some(modified),
        ));
        self
    }

    /// Record an update of an existing row
    pub fn update(
        &mut self,
        collection: &Arc<dyn Collection>,
        global_key: impl Into<String>,
        original: serde_json::Value,
        modified: serde_json::Value,
    ) -> &mut Self {
        self.mutations.push(Mutation::new(
            Arc::clone(collection),
            global_key,
            MutationType::Update,
            Some(original),
            Some(modified),
        ));
        self
    }

    /// Record a deletion of an existing row
    pub fn delete(
        &mut self,
        collection: &Arc<dyn Collection>,
        global_key: impl Into<String>,
        original: serde_json::Value,
    ) -> &mut Self {
        self.mutations.push(Mutation::new(
            Arc::clone(collection),
            global_key,
            MutationType::Delete,
            Some(original),
            None,
        ));
        self
    }

    /// Number of accumulated mutations
    pub fn mutation_count(&self) -> usize {
        self.mutations.len()
    }

    /// Assemble the transaction and persist it through the coordinator.
    ///
    /// Fails when the draft is empty or references an unregistered
    /// collection; persistence failures bubble up from storage.
    pub async fn commit(self) -> Result<DraftCommit> {
        if self.mutations.is_empty() {
            return Err(OutboxError::InvalidTransaction(
                "draft contains no mutations".to_string(),
            ));
        }

        let collections = self.coordinator.collections();
        for mutation in &self.mutations {
            if !collections.contains(&mutation.collection_id) {
                return Err(OutboxError::UnknownCollection(mutation.collection_id.clone()));
            }
        }

        let tx = Transaction::new(
            Uuid::new_v4().to_string(),
            self.mutation_fn_name,
            self.mutations,
            Uuid::new_v4().to_string(),
            self.coordinator.clock().epoch_ms(),
            self.metadata,
        );
        let transaction_id = tx.id.clone();
        debug!(tx_id = %transaction_id, mutations = tx.mutations.len(), "committing draft");

        // Register the waiter before persisting so a fast drain cannot settle
        // into the void
        let outcome = self.coordinator.wait_for(&transaction_id);
        self.coordinator.persist(tx).await?;

        Ok(DraftCommit { transaction_id, outcome })
    }
}

/// Handle returned by [`Draft::commit`].
pub struct DraftCommit {
    pub transaction_id: String,
    outcome: WaiterFuture,
}

impl DraftCommit {
    /// Cloneable future settled when the transaction reaches a terminal state
    pub fn outcome(&self) -> WaiterFuture {
        self.outcome.clone()
    }

    /// Await the terminal outcome
    pub async fn wait(self) -> WaiterOutcome {
        self.outcome.await
    }
}
