//! Park object for a synchronous call issued off the loop thread.
//!
//! One slot per call, registered in the pending-call registry under the
//! call's message id. The receiver thread completes it when the correlated
//! result arrives; crash unwinding completes every live slot with
//! [`CallOutcome::ChannelDied`]. Completion is idempotent — the first one
//! wins, which keeps the race between a late result and channel death
//! harmless.

use std::sync::{Condvar, Mutex};
use std::time::Duration;

use crate::message::CommandResult;
use crate::sync::lock;

/// Terminal state of a parked call.
#[derive(Debug, Clone)]
pub(crate) enum CallOutcome {
    /// The correlated result arrived.
    Completed(CommandResult),
    /// The channel died before the result arrived.
    ChannelDied,
}

pub(crate) struct PendingCall {
    state: Mutex<Option<CallOutcome>>,
    ready: Condvar,
}

impl PendingCall {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    /// Complete the slot. The first completion wins; later ones are ignored.
    pub(crate) fn complete(&self, outcome: CallOutcome) {
        let mut state = lock(&self.state);
        if state.is_none() {
            *state = Some(outcome);
            drop(state);
            self.ready.notify_all();
        }
    }

    /// Park until completed or `timeout` elapses; consumes the outcome.
    pub(crate) fn wait(&self, timeout: Duration) -> Option<CallOutcome> {
        let mut state = lock(&self.state);
        if state.is_some() {
            return state.take();
        }
        let (mut state, _result) = self
            .ready
            .wait_timeout(state, timeout)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        state.take()
    }
}
