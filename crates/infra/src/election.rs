//! In-process leader election group.
//!
//! Coordinates sibling coordinator instances inside one process the way a
//! web-locks primitive coordinates tabs: at most one handle holds leadership,
//! later requesters queue, and releasing (or disposing) the current leader
//! promotes the next waiter and fires its leadership-change callbacks.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use driftq_core::{LeaderElection, LeadershipCallback, SubscriptionId};
use driftq_domain::Result;
use parking_lot::Mutex;
use tracing::{debug, info};

type ListenerMap = HashMap<u64, HashMap<u64, LeadershipCallback>>;

#[derive(Default)]
struct GroupInner {
    holder: Option<u64>,
    waiters: VecDeque<u64>,
    listeners: ListenerMap,
    next_handle: u64,
    next_subscription: u64,
}

impl GroupInner {
    /// Promote the first still-registered waiter; returns its callbacks.
    fn promote_next(&mut self) -> Vec<LeadershipCallback> {
        while let Some(candidate) = self.waiters.pop_front() {
            if !self.listeners.contains_key(&candidate) {
                continue;
            }
            self.holder = Some(candidate);
            info!(handle = candidate, "leadership handed over");
            return self
                .listeners
                .get(&candidate)
                .map(|subs| subs.values().cloned().collect())
                .unwrap_or_default();
        }
        self.holder = None;
        Vec::new()
    }
}

/// Shared election state; create one per process group and hand out one
/// [`GroupLeaderElection`] per coordinator instance.
#[derive(Clone, Default)]
pub struct LeaderGroup {
    inner: Arc<Mutex<GroupInner>>,
}

impl LeaderGroup {
    /// Create an empty group
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new member handle
    pub fn handle(&self) -> GroupLeaderElection {
        let mut inner = self.inner.lock();
        let id = inner.next_handle;
        inner.next_handle += 1;
        inner.listeners.insert(id, HashMap::new());
        GroupLeaderElection { id, inner: Arc::clone(&self.inner) }
    }

    /// Whether any member currently holds leadership
    pub fn has_leader(&self) -> bool {
        self.inner.lock().holder.is_some()
    }
}

/// One member's view of the election group.
pub struct GroupLeaderElection {
    id: u64,
    inner: Arc<Mutex<GroupInner>>,
}

#[async_trait]
impl LeaderElection for GroupLeaderElection {
    // Immediate grants are returned to the requester; change callbacks fire
    // only for deferred grants (handover) and revocations.
    async fn request_leadership(&self) -> Result<bool> {
        let mut inner = self.inner.lock();
        match inner.holder {
            None => {
                inner.holder = Some(self.id);
                debug!(handle = self.id, "leadership granted");
                Ok(true)
            }
            Some(holder) if holder == self.id => Ok(true),
            Some(_) => {
                if !inner.waiters.contains(&self.id) {
                    inner.waiters.push_back(self.id);
                    debug!(handle = self.id, "queued for leadership");
                }
                Ok(false)
            }
        }
    }

    async fn release_leadership(&self) -> Result<()> {
        let callbacks = {
            let mut inner = self.inner.lock();
            if inner.holder != Some(self.id) {
                return Ok(());
            }
            debug!(handle = self.id, "leadership released");
            inner.promote_next()
        };
        // Invoked outside the lock: a callback may re-enter the election
        for callback in callbacks {
            callback(true);
        }
        Ok(())
    }

    fn is_leader(&self) -> bool {
        self.inner.lock().holder == Some(self.id)
    }

    fn on_leadership_change(&self, callback: LeadershipCallback) -> SubscriptionId {
        let mut inner = self.inner.lock();
        let subscription = inner.next_subscription;
        inner.next_subscription += 1;
        inner.listeners.entry(self.id).or_default().insert(subscription, callback);
        SubscriptionId(subscription)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        let mut inner = self.inner.lock();
        if let Some(subs) = inner.listeners.get_mut(&self.id) {
            subs.remove(&id.0);
        }
    }

    fn dispose(&self) {
        let callbacks = {
            let mut inner = self.inner.lock();
            inner.waiters.retain(|waiter| *waiter != self.id);
            inner.listeners.remove(&self.id);
            if inner.holder == Some(self.id) { inner.promote_next() } else { Vec::new() }
        };
        for callback in callbacks {
            callback(true);
        }
    }
}
