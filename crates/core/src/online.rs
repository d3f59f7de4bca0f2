//! Connectivity-restoration detector
//!
//! The core never probes the network itself; hosts push their connectivity
//! signal through [`ManualOnlineDetector::notify_online`], which fans out to
//! subscribers. The coordinator uses the signal to reset retry delays and
//! kick a drain on the leader instance.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};

use parking_lot::Mutex;
use tracing::debug;

use crate::ports::{OnlineCallback, OnlineDetector, SubscriptionId};

/// Subscriber-list detector driven entirely by `notify_online`.
#[derive(Default)]
pub struct ManualOnlineDetector {
    disposed: AtomicBool,
    next_subscription: AtomicU64,
    listeners: Mutex<HashMap<u64, OnlineCallback>>,
}

impl ManualOnlineDetector {
    /// Create a new detector
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.listeners.lock().len()
    }
}

impl OnlineDetector for ManualOnlineDetector {
    fn subscribe(&self, callback: OnlineCallback) -> SubscriptionId {
        let id = self.next_subscription.fetch_add(1, AtomicOrdering::Relaxed);
        self.listeners.lock().insert(id, callback);
        SubscriptionId(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.listeners.lock().remove(&id.0);
    }

    fn notify_online(&self) {
        if self.disposed.load(AtomicOrdering::SeqCst) {
            return;
        }
        debug!("connectivity restored, notifying subscribers");
        let listeners: Vec<OnlineCallback> = self.listeners.lock().values().cloned().collect();
        for listener in listeners {
            listener();
        }
    }

    fn dispose(&self) {
        self.disposed.store(true, AtomicOrdering::SeqCst);
        self.listeners.lock().clear();
    }
}
