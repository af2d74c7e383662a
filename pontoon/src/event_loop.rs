//! The event-loop seam the protocol core drives.
//!
//! Pontoon never touches a concrete UI toolkit. Everything it needs from a
//! loop is behind [`EventLoop`]: know whether the current thread is the loop
//! thread, schedule a closure onto the loop, and — the deadlock breaker —
//! process exactly one pending event on behalf of a loop thread that is
//! blocked inside a synchronous send. Adapting a real toolkit means
//! implementing these three operations against its native dispatcher.
//!
//! [`StepEventLoop`] is a complete queue-backed implementation used by tests,
//! demos, and headless peers.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::thread::{self, ThreadId};
use std::time::Duration;

use crate::sync::lock;

/// A scheduled unit of loop work.
type Task = Box<dyn FnOnce() + Send>;

/// Abstraction over a single-threaded event loop.
pub trait EventLoop: Send + Sync {
    /// Whether the calling thread is the loop thread.
    fn is_loop_thread(&self) -> bool;

    /// Schedule a closure to run on the loop thread. Never blocks.
    fn invoke(&self, task: Box<dyn FnOnce() + Send>);

    /// Process one pending event, if any. Must be called from the loop
    /// thread. Returns whether an event was processed.
    fn pump_one(&self) -> bool;
}

/// A queue-backed event loop driven by an owning thread.
///
/// The owning thread calls [`StepEventLoop::attach`] once and then either
/// [`StepEventLoop::run`] (drive until shutdown) or repeated
/// [`EventLoop::pump_one`] calls.
pub struct StepEventLoop {
    inner: Mutex<Inner>,
    ready: Condvar,
}

struct Inner {
    tasks: VecDeque<Task>,
    loop_thread: Option<ThreadId>,
    shutdown: bool,
}

impl Default for StepEventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl StepEventLoop {
    /// Create a loop with no attached thread.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                tasks: VecDeque::new(),
                loop_thread: None,
                shutdown: false,
            }),
            ready: Condvar::new(),
        }
    }

    /// Claim the calling thread as the loop thread.
    pub fn attach(&self) {
        lock(&self.inner).loop_thread = Some(thread::current().id());
    }

    /// Drive the loop until [`StepEventLoop::shutdown`] is called.
    ///
    /// Attaches the calling thread first.
    pub fn run(&self) {
        self.attach();
        loop {
            let task = {
                let mut inner = lock(&self.inner);
                loop {
                    if let Some(task) = inner.tasks.pop_front() {
                        break Some(task);
                    }
                    if inner.shutdown {
                        break None;
                    }
                    let (guard, _timeout) = self
                        .ready
                        .wait_timeout(inner, Duration::from_millis(50))
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                    inner = guard;
                }
            };
            match task {
                Some(task) => task(),
                None => return,
            }
        }
    }

    /// Ask the driving thread to exit `run` once the queue drains.
    pub fn shutdown(&self) {
        lock(&self.inner).shutdown = true;
        self.ready.notify_all();
    }

    /// Number of queued, not-yet-run tasks.
    pub fn pending(&self) -> usize {
        lock(&self.inner).tasks.len()
    }
}

impl EventLoop for StepEventLoop {
    fn is_loop_thread(&self) -> bool {
        lock(&self.inner).loop_thread == Some(thread::current().id())
    }

    fn invoke(&self, task: Box<dyn FnOnce() + Send>) {
        lock(&self.inner).tasks.push_back(task);
        self.ready.notify_all();
    }

    fn pump_one(&self) -> bool {
        let task = lock(&self.inner).tasks.pop_front();
        match task {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }
}
