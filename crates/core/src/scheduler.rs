//! In-memory FIFO scheduler
//!
//! Holds the pending transaction set, invariant-sorted ascending by
//! `(created_at, id)`, and the single `running` flag. Execution is
//! deliberately sequential: the outbox guarantees per-row causal order across
//! the user's optimistic edits, and parallel execution would require
//! per-key serialization. `get_next_batch` therefore returns at most one
//! transaction regardless of the requested concurrency.

use driftq_domain::Transaction;
use tracing::trace;

/// Pending-set scheduler driven by the executor.
#[derive(Debug, Default)]
pub struct TransactionScheduler {
    pending: Vec<Transaction>,
    running: bool,
}

impl TransactionScheduler {
    /// Create an empty scheduler
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a transaction to the pending set, keeping FIFO order.
    /// Re-admitting an id replaces the previous entry.
    pub fn schedule(&mut self, tx: Transaction) {
        self.pending.retain(|existing| existing.id != tx.id);
        self.pending.push(tx);
        self.resort();
    }

    /// Next transactions ready to run by wall clock.
    ///
    /// The requested concurrency is ignored: while a transaction is running,
    /// or when nothing has reached its `next_attempt_at`, the batch is empty;
    /// otherwise it is the single oldest ready transaction.
    pub fn get_next_batch(&self, _max_concurrency: usize, now_ms: i64) -> Vec<Transaction> {
        if self.running || self.pending.is_empty() {
            return Vec::new();
        }

        self.pending
            .iter()
            .find(|tx| tx.next_attempt_at <= now_ms)
            .map(|tx| vec![tx.clone()])
            .unwrap_or_default()
    }

    /// Flag a transaction as running
    pub fn mark_started(&mut self) {
        self.running = true;
    }

    /// Remove a finished transaction from the pending set and clear the
    /// running flag
    pub fn mark_completed(&mut self, id: &str) {
        self.pending.retain(|tx| tx.id != id);
        self.running = false;
        trace!(tx_id = %id, pending = self.pending.len(), "transaction left scheduler");
    }

    /// Clear the running flag; the transaction stays pending with whatever
    /// fields the executor updated
    pub fn mark_failed(&mut self) {
        self.running = false;
    }

    /// Replace the pending entry with a matching id, then restore ordering
    pub fn update_transaction(&mut self, updated: Transaction) {
        self.update_transactions(vec![updated]);
    }

    /// Replace every pending entry with a matching id, then restore ordering
    pub fn update_transactions(&mut self, updated: Vec<Transaction>) {
        for replacement in updated {
            if let Some(slot) = self.pending.iter_mut().find(|tx| tx.id == replacement.id) {
                *slot = replacement;
            }
        }
        self.resort();
    }

    /// Snapshot copy of the pending set, in FIFO order
    pub fn pending_transactions(&self) -> Vec<Transaction> {
        self.pending.clone()
    }

    /// Earliest `next_attempt_at` across the pending set
    pub fn next_attempt_floor(&self) -> Option<i64> {
        self.pending.iter().map(|tx| tx.next_attempt_at).min()
    }

    /// Number of pending transactions
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Number of transactions currently executing (0 or 1)
    pub fn running_count(&self) -> usize {
        usize::from(self.running)
    }

    /// Remove one pending transaction without touching the running flag
    pub fn discard(&mut self, id: &str) {
        self.pending.retain(|tx| tx.id != id);
    }

    /// Drop all pending transactions and clear the running flag
    pub fn clear(&mut self) {
        self.pending.clear();
        self.running = false;
    }

    fn resort(&mut self) {
        self.pending.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    }
}
