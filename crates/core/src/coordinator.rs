//! Offline coordinator
//!
//! Owns the lifecycle of the outbox core: builds the storage/outbox/executor
//! stack, takes part in leader election, replays the outbox when leadership
//! is acquired, reacts to connectivity restoration, registers caller waiters
//! and tears everything down on dispose.
//!
//! Cross-tab coordination happens entirely through the election primitive and
//! the shared storage: a non-leader instance persists nothing and resolves
//! caller waiters with `None` so UI flows unblock, while the leader owns the
//! outbox and the drain.

use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Weak};

use driftq_domain::{
    CollectionRegistry, OutboxError, Result, Transaction,
};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::{debug, info, instrument, warn};

use crate::config::OfflineConfig;
use crate::draft::{Draft, DraftOptions};
use crate::election::NullLeaderElection;
use crate::executor::{ExecutorConfig, TransactionExecutor};
use crate::metrics::{OutboxMetrics, OutboxMetricsSnapshot};
use crate::online::ManualOnlineDetector;
use crate::outbox::Outbox;
use crate::ports::{
    LeaderElection, LeadershipCallback, OnlineDetector, StorageAdapter, SubscriptionId, WaiterSink,
};
use crate::retry::RetryPolicy;
use crate::storage::MemoryStorageAdapter;
use crate::time::{Clock, SystemClock};
use crate::waiters::{WaiterFuture, WaiterRegistry};

/// Cheaply cloneable handle around the coordinator state.
#[derive(Clone)]
pub struct OfflineCoordinator {
    inner: Arc<CoordinatorInner>,
}

pub(crate) struct CoordinatorInner {
    outbox: Arc<Outbox>,
    executor: TransactionExecutor,
    leader_election: Arc<dyn LeaderElection>,
    online_detector: Arc<dyn OnlineDetector>,
    waiters: Arc<WaiterRegistry>,
    metrics: Arc<OutboxMetrics>,
    collections: Arc<CollectionRegistry>,
    clock: Arc<dyn Clock>,
    on_leadership_change: Option<LeadershipCallback>,
    is_leader: AtomicBool,
    leadership_subscription: Mutex<Option<SubscriptionId>>,
    online_subscription: Mutex<Option<SubscriptionId>>,
    disposed: AtomicBool,
}

impl OfflineCoordinator {
    /// Build and start a coordinator: wire the stack, subscribe to leadership
    /// and connectivity changes, then attempt the initial leadership request.
    /// When leadership is granted immediately, the outbox is replayed before
    /// this returns.
    #[instrument(skip(config))]
    pub async fn new(config: OfflineConfig) -> Result<Self> {
        config.validate()?;

        let clock: Arc<dyn Clock> =
            config.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let storage: Arc<dyn StorageAdapter> = config.storage.unwrap_or_else(|| {
            info!("no storage adapter supplied, falling back to non-durable in-memory storage");
            Arc::new(MemoryStorageAdapter::new())
        });
        let leader_election: Arc<dyn LeaderElection> = config
            .leader_election
            .unwrap_or_else(|| Arc::new(NullLeaderElection::new()));
        let online_detector: Arc<dyn OnlineDetector> = config
            .online_detector
            .unwrap_or_else(|| Arc::new(ManualOnlineDetector::new()));

        let collections = Arc::new(config.collections);
        let metrics = Arc::new(OutboxMetrics::new());
        let outbox = Arc::new(Outbox::new(
            Arc::clone(&storage),
            Arc::clone(&collections),
            Arc::clone(&metrics),
        ));
        let waiters = Arc::new(WaiterRegistry::new());

        let executor = TransactionExecutor::new(
            Arc::clone(&outbox),
            config.mutation_fns,
            Arc::clone(&waiters) as Arc<dyn WaiterSink>,
            Arc::clone(&clock),
            Arc::clone(&metrics),
            ExecutorConfig {
                retry_policy: RetryPolicy::new(config.max_retries, config.jitter),
                max_concurrency: config.max_concurrency,
                on_unknown_mutation_fn: config.on_unknown_mutation_fn,
                before_retry: config.before_retry,
            },
        );

        let inner = Arc::new(CoordinatorInner {
            outbox,
            executor,
            leader_election,
            online_detector,
            waiters,
            metrics,
            collections,
            clock,
            on_leadership_change: config.on_leadership_change,
            is_leader: AtomicBool::new(false),
            leadership_subscription: Mutex::new(None),
            online_subscription: Mutex::new(None),
            disposed: AtomicBool::new(false),
        });

        Self::subscribe_leadership(&inner);
        Self::subscribe_online(&inner);

        match inner.leader_election.request_leadership().await {
            Ok(true) => {
                if CoordinatorInner::note_leadership(&inner, true) {
                    inner.load_and_replay().await;
                }
            }
            Ok(false) => debug!("another instance holds leadership"),
            Err(error) => warn!(error = %error, "initial leadership request failed"),
        }

        Ok(Self { inner })
    }

    fn subscribe_leadership(inner: &Arc<CoordinatorInner>) {
        let weak = Arc::downgrade(inner);
        let subscription = inner.leader_election.on_leadership_change(Arc::new(
            move |is_leader| CoordinatorInner::on_leadership_event(&weak, is_leader),
        ));
        *inner.leadership_subscription.lock() = Some(subscription);
    }

    fn subscribe_online(inner: &Arc<CoordinatorInner>) {
        let weak = Arc::downgrade(inner);
        let subscription = inner
            .online_detector
            .subscribe(Arc::new(move || CoordinatorInner::on_connectivity_restored(&weak)));
        *inner.online_subscription.lock() = Some(subscription);
    }

    /// Start a draft accumulating mutations for one transaction
    pub fn create_draft(&self, options: DraftOptions) -> Draft {
        Draft::new(self.clone(), options)
    }

    /// Persist a transaction and hand it to the executor.
    ///
    /// On a non-leader instance nothing is persisted: the waiter resolves
    /// with `None` immediately and the authoritative instance handles the
    /// mutation.
    pub async fn persist(&self, tx: Transaction) -> Result<()> {
        if self.inner.disposed.load(AtomicOrdering::SeqCst) {
            return Err(OutboxError::Internal("coordinator disposed".to_string()));
        }

        if !self.is_offline_enabled() {
            debug!(tx_id = %tx.id, "not leader, resolving waiter without persisting");
            self.inner.waiters.resolve(&tx.id, None);
            return Ok(());
        }

        self.inner.outbox.add(&tx).await?;
        self.inner.metrics.record_enqueue();
        self.inner.executor.execute(tx);
        Ok(())
    }

    /// Future settled when the transaction with `id` reaches a terminal
    /// state. Idempotent per id.
    pub fn wait_for(&self, id: &str) -> WaiterFuture {
        self.inner.waiters.wait_for(id)
    }

    /// Remove one transaction from the outbox and the pending set
    pub async fn remove_from_outbox(&self, id: &str) -> Result<()> {
        self.inner.outbox.remove(id).await?;
        self.inner.executor.discard(id);
        Ok(())
    }

    /// Snapshot of every persisted transaction, in FIFO order
    pub async fn peek_outbox(&self) -> Result<Vec<Transaction>> {
        self.inner.outbox.get_all().await
    }

    /// Drop all persisted and scheduled state; in-flight mutations are not
    /// aborted
    pub async fn clear_outbox(&self) -> Result<()> {
        self.inner.outbox.clear().await?;
        self.inner.executor.clear();
        Ok(())
    }

    /// Report connectivity restoration to the detector
    pub fn notify_online(&self) {
        self.inner.online_detector.notify_online();
    }

    /// Number of pending transactions
    pub fn pending_count(&self) -> usize {
        self.inner.executor.pending_count()
    }

    /// Number of transactions currently executing (0 or 1)
    pub fn running_count(&self) -> usize {
        self.inner.executor.running_count()
    }

    /// Whether this instance owns the outbox (leadership held)
    pub fn is_offline_enabled(&self) -> bool {
        self.inner.is_leader.load(AtomicOrdering::SeqCst)
    }

    /// Snapshot of the outbox counters
    pub fn metrics(&self) -> OutboxMetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Tear down: detach listeners, release leadership, dispose
    /// collaborators and settle outstanding waiters with `None`.
    #[instrument(skip(self))]
    pub async fn dispose(&self) {
        if self.inner.disposed.swap(true, AtomicOrdering::SeqCst) {
            return;
        }
        info!("disposing offline coordinator");

        if let Some(subscription) = self.inner.leadership_subscription.lock().take() {
            self.inner.leader_election.unsubscribe(subscription);
        }
        if let Some(subscription) = self.inner.online_subscription.lock().take() {
            self.inner.online_detector.unsubscribe(subscription);
        }

        self.inner.executor.shutdown();

        if let Err(error) = self.inner.leader_election.release_leadership().await {
            warn!(error = %error, "failed to release leadership during dispose");
        }
        self.inner.is_leader.store(false, AtomicOrdering::SeqCst);

        self.inner.online_detector.dispose();
        self.inner.leader_election.dispose();
        self.inner.waiters.clear();
    }

    pub(crate) fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.inner.clock)
    }

    pub(crate) fn collections(&self) -> Arc<CollectionRegistry> {
        Arc::clone(&self.inner.collections)
    }
}

impl CoordinatorInner {
    /// Record a leadership transition; returns true when the state actually
    /// changed. Fires the caller callback on real transitions only.
    fn note_leadership(inner: &Arc<Self>, is_leader: bool) -> bool {
        if inner.disposed.load(AtomicOrdering::SeqCst) {
            return false;
        }
        let changed = inner.is_leader.swap(is_leader, AtomicOrdering::SeqCst) != is_leader;
        if changed {
            info!(is_leader, "leadership changed");
            if let Some(callback) = &inner.on_leadership_change {
                callback(is_leader);
            }
        }
        changed
    }

    fn on_leadership_event(weak: &Weak<Self>, is_leader: bool) {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        if !Self::note_leadership(&inner, is_leader) || !is_leader {
            return;
        }

        match Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    inner.load_and_replay().await;
                });
            }
            Err(_) => warn!("no active runtime, outbox replay not started"),
        }
    }

    fn on_connectivity_restored(weak: &Weak<Self>) {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        if inner.disposed.load(AtomicOrdering::SeqCst)
            || !inner.is_leader.load(AtomicOrdering::SeqCst)
        {
            return;
        }

        debug!("connectivity restored, resetting retry delays");
        let executor = inner.executor.clone();
        match Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    executor.reset_retry_delays();
                    executor.execute_all().await;
                });
            }
            Err(_) => warn!("no active runtime, connectivity drain not started"),
        }
    }

    /// Replay the outbox into the scheduler, then drain. Errors are logged,
    /// never thrown into event callbacks.
    async fn load_and_replay(&self) {
        if let Err(error) = self.executor.load_pending_transactions().await {
            warn!(error = %error, "outbox replay failed");
            return;
        }
        self.executor.execute_all().await;
    }
}
