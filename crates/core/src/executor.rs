//! Transaction executor
//!
//! Drives the scheduler: picks the next ready transaction, invokes the named
//! mutation function, and routes the outcome back into the outbox, the
//! scheduler and the caller's waiter. Failures go through the retry policy;
//! retriable ones re-enter the pending set with backoff and arm a single
//! one-shot wake timer.
//!
//! Concurrent `execute_all` calls collapse onto one in-flight drain future;
//! callers all await the same result. Drain-path storage failures are logged
//! and end the current drain cycle, they never unwind into callbacks.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use driftq_domain::{ErrorInfo, MutationError, Result, Transaction, TransactionPatch};
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::metrics::OutboxMetrics;
use crate::outbox::Outbox;
use crate::ports::{
    BeforeRetryFilter, MutationContext, MutationRegistry, UnknownMutationFnCallback,
    WaiterSink,
};
use crate::retry::RetryPolicy;
use crate::scheduler::TransactionScheduler;
use crate::time::Clock;

type DrainFuture = Shared<BoxFuture<'static, ()>>;

/// Executor tunables and hooks carried over from the offline configuration.
pub struct ExecutorConfig {
    pub retry_policy: RetryPolicy,
    /// Reserved: execution is sequential until per-key serialization exists,
    /// so the scheduler ignores anything above 1
    pub max_concurrency: usize,
    pub on_unknown_mutation_fn: Option<UnknownMutationFnCallback>,
    pub before_retry: Option<BeforeRetryFilter>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            retry_policy: RetryPolicy::default(),
            max_concurrency: 1,
            on_unknown_mutation_fn: None,
            before_retry: None,
        }
    }
}

/// Cheaply cloneable handle around the shared executor state.
#[derive(Clone)]
pub struct TransactionExecutor {
    inner: Arc<ExecutorInner>,
}

struct ExecutorInner {
    outbox: Arc<Outbox>,
    scheduler: Mutex<TransactionScheduler>,
    retry_policy: RetryPolicy,
    mutation_fns: MutationRegistry,
    waiters: Arc<dyn WaiterSink>,
    clock: Arc<dyn Clock>,
    metrics: Arc<OutboxMetrics>,
    max_concurrency: usize,
    on_unknown_mutation_fn: Option<UnknownMutationFnCallback>,
    before_retry: Option<BeforeRetryFilter>,
    drain: Mutex<Option<DrainFuture>>,
    wake_timer: Mutex<Option<JoinHandle<()>>>,
    shutdown: AtomicBool,
}

impl TransactionExecutor {
    /// Build an executor over the outbox, the caller's mutation registry and
    /// the waiter sink the coordinator injects.
    pub fn new(
        outbox: Arc<Outbox>,
        mutation_fns: MutationRegistry,
        waiters: Arc<dyn WaiterSink>,
        clock: Arc<dyn Clock>,
        metrics: Arc<OutboxMetrics>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            inner: Arc::new(ExecutorInner {
                outbox,
                scheduler: Mutex::new(TransactionScheduler::new()),
                retry_policy: config.retry_policy,
                mutation_fns,
                waiters,
                clock,
                metrics,
                max_concurrency: config.max_concurrency,
                on_unknown_mutation_fn: config.on_unknown_mutation_fn,
                before_retry: config.before_retry,
                drain: Mutex::new(None),
                wake_timer: Mutex::new(None),
                shutdown: AtomicBool::new(false),
            }),
        }
    }

    /// Submit one transaction for execution (live path): schedule, then
    /// trigger a drain in the background.
    pub fn execute(&self, tx: Transaction) {
        if self.inner.shutdown.load(AtomicOrdering::SeqCst) {
            debug!(tx_id = %tx.id, "executor shut down, dropping submission");
            return;
        }

        {
            let mut scheduler = self.inner.scheduler.lock();
            scheduler.schedule(tx);
            self.inner.metrics.update_pending_size(scheduler.pending_count());
        }
        self.trigger_drain();
    }

    /// Drain until nothing is ready. Reentrancy-guarded: overlapping calls
    /// share the same in-flight drain.
    pub async fn execute_all(&self) {
        ExecutorInner::run_drain(Arc::clone(&self.inner)).await;
    }

    /// Replay the outbox into the scheduler. Called when leadership is
    /// acquired.
    ///
    /// The caller-supplied `before_retry` filter selects the subset to keep;
    /// the complement is deleted from the outbox. Every kept transaction has
    /// its `next_attempt_at` reset to now so stale backoff delays do not
    /// survive a restart.
    #[instrument(skip(self))]
    pub async fn load_pending_transactions(&self) -> Result<()> {
        let inner = &self.inner;
        let all = inner.outbox.get_all().await?;
        let total = all.len();

        let kept = match &inner.before_retry {
            Some(filter) => filter(all.clone()),
            None => all.clone(),
        };
        let kept_ids: HashSet<&str> = kept.iter().map(|tx| tx.id.as_str()).collect();
        let dropped: Vec<String> = all
            .iter()
            .filter(|tx| !kept_ids.contains(tx.id.as_str()))
            .map(|tx| tx.id.clone())
            .collect();
        if !dropped.is_empty() {
            info!(dropped = dropped.len(), "replay filter discarded persisted transactions");
            inner.outbox.remove_many(&dropped).await?;
        }

        let scheduled = kept.len();
        let now = inner.clock.epoch_ms();
        {
            let mut scheduler = inner.scheduler.lock();
            for mut tx in kept {
                tx.next_attempt_at = now;
                scheduler.schedule(tx);
            }
            inner.metrics.update_pending_size(scheduler.pending_count());
        }
        inner.metrics.record_replayed(scheduled as u64);
        info!(total, scheduled, "outbox replayed into scheduler");

        ExecutorInner::schedule_next_retry(inner);
        Ok(())
    }

    /// Make every pending transaction immediately eligible (connectivity
    /// restored: waiting out the old backoff window would be wasted time).
    pub fn reset_retry_delays(&self) {
        let now = self.inner.clock.epoch_ms();
        {
            let mut scheduler = self.inner.scheduler.lock();
            let updated: Vec<Transaction> = scheduler
                .pending_transactions()
                .into_iter()
                .map(|mut tx| {
                    tx.next_attempt_at = now;
                    tx
                })
                .collect();
            scheduler.update_transactions(updated);
        }
        ExecutorInner::schedule_next_retry(&self.inner);
    }

    /// Drop one pending transaction (caller-initiated outbox removal)
    pub fn discard(&self, id: &str) {
        let mut scheduler = self.inner.scheduler.lock();
        scheduler.discard(id);
        self.inner.metrics.update_pending_size(scheduler.pending_count());
    }

    /// Drop the pending set and cancel any armed wake timer
    pub fn clear(&self) {
        {
            let mut scheduler = self.inner.scheduler.lock();
            scheduler.clear();
            self.inner.metrics.update_pending_size(0);
        }
        self.inner.cancel_wake_timer();
    }

    /// Number of pending transactions
    pub fn pending_count(&self) -> usize {
        self.inner.scheduler.lock().pending_count()
    }

    /// Number of transactions currently executing (0 or 1)
    pub fn running_count(&self) -> usize {
        self.inner.scheduler.lock().running_count()
    }

    /// Stop accepting work and cancel the wake timer. An in-flight mutation
    /// call runs to completion but no new drain starts.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, AtomicOrdering::SeqCst);
        self.inner.cancel_wake_timer();
    }

    fn trigger_drain(&self) {
        let inner = Arc::clone(&self.inner);
        match Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    ExecutorInner::run_drain(inner).await;
                });
            }
            Err(_) => {
                warn!("no active runtime, drain not triggered");
            }
        }
    }
}

impl ExecutorInner {
    /// Await the in-flight drain (creating one if needed), then loop while
    /// ready work remains: a drain that finished between the slot check and
    /// a fresh `schedule` must not strand that submission.
    async fn run_drain(inner: Arc<Self>) {
        loop {
            let drain = Self::drain_future(&inner);
            drain.clone().await;
            inner.clear_drain_slot(&drain);

            if inner.shutdown.load(AtomicOrdering::SeqCst) {
                break;
            }
            let ready = {
                let scheduler = inner.scheduler.lock();
                let now = inner.clock.epoch_ms();
                !scheduler.get_next_batch(inner.max_concurrency, now).is_empty()
            };
            if !ready {
                break;
            }
        }
    }

    fn drain_future(inner: &Arc<Self>) -> DrainFuture {
        let mut slot = inner.drain.lock();
        if let Some(existing) = slot.as_ref() {
            return existing.clone();
        }

        let owned = Arc::clone(inner);
        let fresh: DrainFuture = async move { Self::drain_loop(owned).await }.boxed().shared();
        *slot = Some(fresh.clone());
        fresh
    }

    fn clear_drain_slot(&self, drain: &DrainFuture) {
        let mut slot = self.drain.lock();
        if slot.as_ref().map(|current| current.ptr_eq(drain)).unwrap_or(false) {
            *slot = None;
        }
    }

    async fn drain_loop(inner: Arc<Self>) {
        loop {
            if inner.shutdown.load(AtomicOrdering::SeqCst) {
                return;
            }

            let next = {
                let mut scheduler = inner.scheduler.lock();
                if scheduler.pending_count() == 0 {
                    None
                } else {
                    let now = inner.clock.epoch_ms();
                    let tx = scheduler.get_next_batch(inner.max_concurrency, now).pop();
                    if tx.is_some() {
                        scheduler.mark_started();
                    }
                    tx
                }
            };
            let Some(tx) = next else { break };

            if !Self::run_transaction(&inner, tx).await {
                break;
            }
        }

        Self::schedule_next_retry(&inner);
    }

    /// Execute one attempt. Returns false when a storage failure should end
    /// the drain cycle.
    async fn run_transaction(inner: &Arc<Self>, tx: Transaction) -> bool {
        debug!(
            tx_id = %tx.id,
            mutation_fn = %tx.mutation_fn_name,
            retry_count = tx.retry_count,
            "executing transaction"
        );

        let result = match inner.mutation_fns.get(&tx.mutation_fn_name) {
            Some(mutation_fn) => {
                mutation_fn.execute(MutationContext::for_transaction(&tx)).await
            }
            None => {
                warn!(
                    tx_id = %tx.id,
                    mutation_fn = %tx.mutation_fn_name,
                    "transaction names an unregistered mutation function"
                );
                if let Some(callback) = &inner.on_unknown_mutation_fn {
                    callback(&tx.mutation_fn_name, &tx);
                }
                Err(MutationError::UnknownFunction(tx.mutation_fn_name.clone()))
            }
        };

        match result {
            Ok(value) => Self::complete(inner, &tx, value).await,
            Err(error) if inner.retry_policy.should_retry(&error, tx.retry_count) => {
                Self::schedule_retry(inner, &tx, &error).await
            }
            Err(error) => Self::fail_permanently(inner, &tx, error).await,
        }
    }

    async fn complete(inner: &Arc<Self>, tx: &Transaction, value: serde_json::Value) -> bool {
        {
            let mut scheduler = inner.scheduler.lock();
            scheduler.mark_completed(&tx.id);
            inner.metrics.update_pending_size(scheduler.pending_count());
        }

        if let Err(error) = inner.outbox.remove(&tx.id).await {
            warn!(tx_id = %tx.id, error = %error, "failed to remove completed transaction");
            return false;
        }

        inner.metrics.record_completion();
        inner.waiters.resolve(&tx.id, Some(value));
        debug!(tx_id = %tx.id, "transaction completed");
        true
    }

    async fn fail_permanently(
        inner: &Arc<Self>,
        tx: &Transaction,
        error: MutationError,
    ) -> bool {
        {
            let mut scheduler = inner.scheduler.lock();
            scheduler.mark_completed(&tx.id);
            inner.metrics.update_pending_size(scheduler.pending_count());
        }

        if let Err(storage_error) = inner.outbox.remove(&tx.id).await {
            warn!(tx_id = %tx.id, error = %storage_error, "failed to remove dead transaction");
            return false;
        }

        inner.metrics.record_permanent_failure();
        warn!(
            tx_id = %tx.id,
            retry_count = tx.retry_count,
            error = %error,
            "transaction failed permanently"
        );
        inner.waiters.reject(&tx.id, error);
        true
    }

    async fn schedule_retry(inner: &Arc<Self>, tx: &Transaction, error: &MutationError) -> bool {
        let delay_ms = inner.retry_policy.calculate_delay(tx.retry_count);
        let now = inner.clock.epoch_ms();

        let mut updated = tx.clone();
        updated.retry_count = tx.retry_count.saturating_add(1);
        updated.next_attempt_at = now.saturating_add(delay_ms as i64);
        updated.last_error = Some(ErrorInfo::from(error));

        {
            let mut scheduler = inner.scheduler.lock();
            scheduler.mark_failed();
            scheduler.update_transaction(updated.clone());
        }

        let patch = TransactionPatch::new()
            .with_retry_count(updated.retry_count)
            .with_next_attempt_at(updated.next_attempt_at)
            .with_last_error(updated.last_error.clone());
        if let Err(storage_error) = inner.outbox.update(&tx.id, &patch).await {
            warn!(tx_id = %tx.id, error = %storage_error, "failed to persist retry state");
            return false;
        }

        inner.metrics.record_retry();
        info!(
            tx_id = %tx.id,
            retry_count = updated.retry_count,
            delay_ms,
            error = %error,
            "transaction scheduled for retry"
        );
        true
    }

    /// Arm a single one-shot wake timer for the earliest `next_attempt_at`
    /// across the pending set. Any prior timer is cancelled first; at most
    /// one timer is outstanding.
    fn schedule_next_retry(inner: &Arc<Self>) {
        let mut timer = inner.wake_timer.lock();
        if let Some(previous) = timer.take() {
            previous.abort();
        }
        if inner.shutdown.load(AtomicOrdering::SeqCst) {
            return;
        }

        let Some(next_attempt_at) = inner.scheduler.lock().next_attempt_floor() else {
            return;
        };
        let now = inner.clock.epoch_ms();
        let delay = Duration::from_millis(next_attempt_at.saturating_sub(now).max(0) as u64);

        let owned = Arc::clone(inner);
        match Handle::try_current() {
            Ok(runtime) => {
                let handle = runtime.spawn(async move {
                    tokio::time::sleep(delay).await;
                    if owned.shutdown.load(AtomicOrdering::SeqCst) {
                        return;
                    }
                    debug!("retry timer fired");
                    Self::run_drain(owned).await;
                });
                *timer = Some(handle);
            }
            Err(_) => {
                warn!("no active runtime, retry timer not armed");
            }
        }
    }

    fn cancel_wake_timer(&self) {
        if let Some(handle) = self.wake_timer.lock().take() {
            handle.abort();
        }
    }
}
