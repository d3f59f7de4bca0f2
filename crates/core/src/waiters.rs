//! Waiter registry
//!
//! Bridges imperative caller futures to asynchronous, cross-restart delivery:
//! each committed transaction id owns at most one deferred outcome, settled
//! by the executor on terminal success or failure. Callers that re-request
//! the waiter for an id get the same shared future back.

use std::collections::HashMap;

use driftq_domain::MutationError;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::trace;

use crate::ports::WaiterSink;

/// Terminal outcome observed by a caller: the mutation function's return
/// value on success, `None` when the transaction was handed to another
/// instance (or the registry was torn down), or the final error.
pub type WaiterOutcome = std::result::Result<Option<serde_json::Value>, MutationError>;

/// Cloneable future settled once per transaction id
pub type WaiterFuture = Shared<BoxFuture<'static, WaiterOutcome>>;

struct Waiter {
    sender: oneshot::Sender<WaiterOutcome>,
    future: WaiterFuture,
}

/// At-most-one deferred outcome per transaction id.
#[derive(Default)]
pub struct WaiterRegistry {
    waiters: Mutex<HashMap<String, Waiter>>,
}

impl WaiterRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Future settled when the transaction reaches a terminal state.
    /// Idempotent: repeated calls for the same id return the same future.
    pub fn wait_for(&self, id: &str) -> WaiterFuture {
        let mut waiters = self.waiters.lock();
        if let Some(waiter) = waiters.get(id) {
            return waiter.future.clone();
        }

        let (sender, receiver) = oneshot::channel();
        // A dropped sender (registry teardown) resolves the caller with None
        let future: WaiterFuture =
            async move { receiver.await.unwrap_or(Ok(None)) }.boxed().shared();
        waiters.insert(id.to_string(), Waiter { sender, future: future.clone() });
        future
    }

    /// Number of unsettled waiters
    pub fn len(&self) -> usize {
        self.waiters.lock().len()
    }

    /// Whether no waiters are registered
    pub fn is_empty(&self) -> bool {
        self.waiters.lock().is_empty()
    }

    /// Drop every waiter; their futures resolve with `Ok(None)`
    pub fn clear(&self) {
        self.waiters.lock().clear();
    }

    fn settle(&self, id: &str, outcome: WaiterOutcome) {
        let waiter = self.waiters.lock().remove(id);
        match waiter {
            Some(waiter) => {
                // The receiver can only be gone if the future was dropped;
                // nothing left to notify in that case
                let _ = waiter.sender.send(outcome);
            }
            None => trace!(tx_id = %id, "no waiter registered, settle is a no-op"),
        }
    }
}

impl WaiterSink for WaiterRegistry {
    fn resolve(&self, id: &str, value: Option<serde_json::Value>) {
        self.settle(id, Ok(value));
    }

    fn reject(&self, id: &str, error: MutationError) {
        self.settle(id, Err(error));
    }
}
