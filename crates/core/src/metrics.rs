//! Outbox metrics for monitoring

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering as AtomicOrdering};

use serde::{Deserialize, Serialize};

/// Counters tracked across the outbox lifecycle
#[derive(Debug, Default)]
pub struct OutboxMetrics {
    pub total_enqueued: AtomicU64,
    pub total_replayed: AtomicU64,
    pub total_completed: AtomicU64,
    pub total_retried: AtomicU64,
    pub total_failed_permanent: AtomicU64,
    pub envelopes_pruned: AtomicU64,
    pub pending_size: AtomicUsize,
}

impl OutboxMetrics {
    /// Create new metrics instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a transaction accepted into the outbox
    pub fn record_enqueue(&self) {
        self.total_enqueued.fetch_add(1, AtomicOrdering::Relaxed);
    }

    /// Record transactions rescued from storage at leadership acquisition
    pub fn record_replayed(&self, count: u64) {
        self.total_replayed.fetch_add(count, AtomicOrdering::Relaxed);
    }

    /// Record a successful mutation call
    pub fn record_completion(&self) {
        self.total_completed.fetch_add(1, AtomicOrdering::Relaxed);
    }

    /// Record a retry being scheduled
    pub fn record_retry(&self) {
        self.total_retried.fetch_add(1, AtomicOrdering::Relaxed);
    }

    /// Record a permanent failure
    pub fn record_permanent_failure(&self) {
        self.total_failed_permanent.fetch_add(1, AtomicOrdering::Relaxed);
    }

    /// Record an undecodable envelope skipped during enumeration
    pub fn record_pruned_envelope(&self) {
        self.envelopes_pruned.fetch_add(1, AtomicOrdering::Relaxed);
    }

    /// Update the pending-set gauge
    pub fn update_pending_size(&self, size: usize) {
        self.pending_size.store(size, AtomicOrdering::Relaxed);
    }

    /// Get a snapshot of metrics
    pub fn snapshot(&self) -> OutboxMetricsSnapshot {
        OutboxMetricsSnapshot {
            total_enqueued: self.total_enqueued.load(AtomicOrdering::Relaxed),
            total_replayed: self.total_replayed.load(AtomicOrdering::Relaxed),
            total_completed: self.total_completed.load(AtomicOrdering::Relaxed),
            total_retried: self.total_retried.load(AtomicOrdering::Relaxed),
            total_failed_permanent: self.total_failed_permanent.load(AtomicOrdering::Relaxed),
            envelopes_pruned: self.envelopes_pruned.load(AtomicOrdering::Relaxed),
            pending_size: self.pending_size.load(AtomicOrdering::Relaxed),
        }
    }
}

/// Immutable metrics snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxMetricsSnapshot {
    pub total_enqueued: u64,
    pub total_replayed: u64,
    pub total_completed: u64,
    pub total_retried: u64,
    pub total_failed_permanent: u64,
    pub envelopes_pruned: u64,
    pub pending_size: usize,
}
