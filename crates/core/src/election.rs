//! Null leader election fallback
//!
//! When no real election primitive is available the core degrades to
//! single-instance mode: this implementation grants leadership to whoever
//! asks and never revokes it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};

use async_trait::async_trait;
use driftq_domain::Result;
use parking_lot::Mutex;
use tracing::debug;

use crate::ports::{LeaderElection, LeadershipCallback, SubscriptionId};

/// Always-leader election used when the caller supplies no primitive.
#[derive(Default)]
pub struct NullLeaderElection {
    leader: AtomicBool,
    next_subscription: AtomicU64,
    listeners: Mutex<HashMap<u64, LeadershipCallback>>,
}

impl NullLeaderElection {
    /// Create a new null election
    pub fn new() -> Self {
        Self::default()
    }

    fn notify(&self, is_leader: bool) {
        let listeners: Vec<LeadershipCallback> = self.listeners.lock().values().cloned().collect();
        for listener in listeners {
            listener(is_leader);
        }
    }
}

#[async_trait]
impl LeaderElection for NullLeaderElection {
    // Grants are returned to the requester directly; change callbacks are
    // reserved for transitions the requester did not initiate (handover,
    // revocation), which a null election never produces.
    async fn request_leadership(&self) -> Result<bool> {
        let was_leader = self.leader.swap(true, AtomicOrdering::SeqCst);
        if !was_leader {
            debug!("null election granted leadership");
        }
        Ok(true)
    }

    async fn release_leadership(&self) -> Result<()> {
        let was_leader = self.leader.swap(false, AtomicOrdering::SeqCst);
        if was_leader {
            self.notify(false);
        }
        Ok(())
    }

    fn is_leader(&self) -> bool {
        self.leader.load(AtomicOrdering::SeqCst)
    }

    fn on_leadership_change(&self, callback: LeadershipCallback) -> SubscriptionId {
        let id = self.next_subscription.fetch_add(1, AtomicOrdering::Relaxed);
        self.listeners.lock().insert(id, callback);
        SubscriptionId(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.listeners.lock().remove(&id.0);
    }

    fn dispose(&self) {
        self.listeners.lock().clear();
    }
}
