//! The incoming-message queue a loop thread drains.
//!
//! The receiver thread enqueues here; the loop thread drains, either from
//! the pump loop of a blocked synchronous send or from a scheduled drain
//! when the loop is idle. Closing the inbox wakes every waiter, which is how
//! crash unwinding releases pump waiters.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use crate::message::Message;
use crate::sync::lock;

pub(crate) struct Inbox {
    inner: Mutex<Inner>,
    ready: Condvar,
}

struct Inner {
    queue: VecDeque<Message>,
    open: bool,
}

impl Inbox {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                open: true,
            }),
            ready: Condvar::new(),
        }
    }

    /// Enqueue at the back and wake waiters.
    pub(crate) fn push(&self, message: Message) {
        lock(&self.inner).queue.push_back(message);
        self.ready.notify_all();
    }

    /// Re-queue a single message at the front.
    pub(crate) fn push_front(&self, message: Message) {
        lock(&self.inner).queue.push_front(message);
        self.ready.notify_all();
    }

    /// Reinject a batch at the front, preserving the batch's own order.
    pub(crate) fn reinject_front(&self, stash: Vec<Message>) {
        if stash.is_empty() {
            return;
        }
        let mut inner = lock(&self.inner);
        for message in stash.into_iter().rev() {
            inner.queue.push_front(message);
        }
        drop(inner);
        self.ready.notify_all();
    }

    pub(crate) fn try_pop(&self) -> Option<Message> {
        lock(&self.inner).queue.pop_front()
    }

    /// Block until something is enqueued, the inbox closes, or the timeout
    /// elapses. Returns whether the wait timed out.
    pub(crate) fn wait(&self, timeout: Duration) -> bool {
        let inner = lock(&self.inner);
        if !inner.queue.is_empty() || !inner.open {
            return false;
        }
        let (_guard, result) = self
            .ready
            .wait_timeout(inner, timeout)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        result.timed_out()
    }

    /// Close the inbox and wake every waiter. Queued messages stay readable.
    pub(crate) fn close(&self) {
        lock(&self.inner).open = false;
        self.ready.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Command;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    fn tagged(op: &str) -> Message {
        Message::command(Command::new(op))
    }

    fn op_of(message: &Message) -> String {
        match &message.body {
            crate::message::MessageBody::Command(c) => c.op.clone(),
            _ => panic!("expected command"),
        }
    }

    #[test]
    fn test_reinject_preserves_relative_order() {
        let inbox = Inbox::new();
        inbox.push(tagged("later"));
        inbox.reinject_front(vec![tagged("first"), tagged("second")]);

        assert_eq!(op_of(&inbox.try_pop().expect("first")), "first");
        assert_eq!(op_of(&inbox.try_pop().expect("second")), "second");
        assert_eq!(op_of(&inbox.try_pop().expect("later")), "later");
    }

    #[test]
    fn test_wait_times_out_when_empty() {
        let inbox = Inbox::new();
        let start = Instant::now();
        assert!(inbox.wait(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_push_wakes_waiter() {
        let inbox = Arc::new(Inbox::new());
        let waiter = {
            let inbox = Arc::clone(&inbox);
            thread::spawn(move || inbox.wait(Duration::from_secs(5)))
        };
        thread::sleep(Duration::from_millis(20));
        inbox.push(tagged("wake"));

        assert!(!waiter.join().expect("waiter panicked"));
    }

    #[test]
    fn test_close_wakes_and_keeps_queue_readable() {
        let inbox = Inbox::new();
        inbox.push(tagged("leftover"));
        inbox.close();

        assert!(!inbox.wait(Duration::from_secs(1)));
        assert_eq!(op_of(&inbox.try_pop().expect("leftover")), "leftover");
    }
}
