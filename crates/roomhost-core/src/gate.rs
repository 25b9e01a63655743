//! Settle-once gate: the first of several racing signals produces the
//! attempt's value, every later signal is discarded.
//!
//! The transition `Pending -> Settled` happens under a mutex together with
//! aborting every registered cancellation token, so a timer can never fire
//! into an already-settled gate and leave work behind.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::oneshot;
use tokio::task::AbortHandle;

struct GateState<T> {
    settled: bool,
    sender: Option<oneshot::Sender<T>>,
    cancels: Vec<AbortHandle>,
}

/// Sending half. Cheap to clone; every clone shares one state.
pub struct SettleGate<T> {
    state: Arc<Mutex<GateState<T>>>,
}

impl<T> Clone for SettleGate<T> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T> std::fmt::Debug for SettleGate<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettleGate")
            .field("settled", &self.is_settled())
            .finish()
    }
}

/// Receiving half, resolved by the first [`SettleGate::settle`].
#[derive(Debug)]
pub struct Settlement<T> {
    receiver: oneshot::Receiver<T>,
}

impl<T> SettleGate<T> {
    /// Create a pending gate and the settlement its first value resolves.
    pub fn new() -> (Self, Settlement<T>) {
        let (sender, receiver) = oneshot::channel();
        let gate = Self {
            state: Arc::new(Mutex::new(GateState {
                settled: false,
                sender: Some(sender),
                cancels: Vec::new(),
            })),
        };
        (gate, Settlement { receiver })
    }

    fn lock(&self) -> MutexGuard<'_, GateState<T>> {
        // A poisoned gate still holds a consistent `settled` flag.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Settle with `value`. Returns `true` only for the call that won.
    pub fn settle(&self, value: T) -> bool {
        let mut state = self.lock();
        if state.settled {
            return false;
        }
        state.settled = true;
        for cancel in state.cancels.drain(..) {
            cancel.abort();
        }
        if let Some(sender) = state.sender.take() {
            // The waiter may have gone away; the transition still counts.
            let _ = sender.send(value);
        }
        true
    }

    pub fn is_settled(&self) -> bool {
        self.lock().settled
    }

    /// Register a cancellation token aborted on settlement.
    /// Aborts immediately when the gate has already settled.
    pub fn register_cancel(&self, cancel: AbortHandle) {
        let mut state = self.lock();
        if state.settled {
            cancel.abort();
        } else {
            state.cancels.push(cancel);
        }
    }

    /// Number of cancellation tokens still waiting for settlement.
    pub fn pending_cancels(&self) -> usize {
        self.lock().cancels.len()
    }
}

impl<T> Settlement<T> {
    /// Wait for the settled value. `None` if every gate clone was dropped
    /// while still pending.
    pub async fn wait(self) -> Option<T> {
        self.receiver.await.ok()
    }
}
