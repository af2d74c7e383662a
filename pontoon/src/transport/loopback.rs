//! In-process loopback between two mirrored channel endpoints.
//!
//! No bytes are involved: "sending" enqueues the envelope onto the mirror's
//! queue and signals its wait condition. Liveness is one shared flag flipped
//! for both mirrors together, so the pair dies as a unit.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};

use super::MessageChannel;
use crate::error::ChannelError;
use crate::message::Message;
use crate::sync::lock;

struct Lane {
    queue: Mutex<VecDeque<Message>>,
    ready: Condvar,
}

impl Lane {
    fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
        }
    }
}

struct Shared {
    lanes: [Lane; 2],
    alive: AtomicBool,
}

/// One endpoint of an in-process channel pair.
pub struct LoopbackChannel {
    shared: Arc<Shared>,
    /// Index of the lane this endpoint reads from; it writes to the other.
    inbound: usize,
}

impl LoopbackChannel {
    /// Create a connected pair of mirrored endpoints.
    pub fn pair() -> (LoopbackChannel, LoopbackChannel) {
        let shared = Arc::new(Shared {
            lanes: [Lane::new(), Lane::new()],
            alive: AtomicBool::new(true),
        });
        (
            LoopbackChannel {
                shared: Arc::clone(&shared),
                inbound: 0,
            },
            LoopbackChannel { shared, inbound: 1 },
        )
    }

    fn outbound(&self) -> &Lane {
        &self.shared.lanes[1 - self.inbound]
    }

    fn inbound(&self) -> &Lane {
        &self.shared.lanes[self.inbound]
    }
}

impl MessageChannel for LoopbackChannel {
    fn write_message(&self, message: &Message) -> Result<(), ChannelError> {
        if !self.shared.alive.load(Ordering::Acquire) {
            return Err(ChannelError::Closed);
        }
        let lane = self.outbound();
        lock(&lane.queue).push_back(message.clone());
        lane.ready.notify_all();
        Ok(())
    }

    fn read_message(&self) -> Result<Option<Message>, ChannelError> {
        let lane = self.inbound();
        let mut queue = lock(&lane.queue);
        loop {
            if let Some(message) = queue.pop_front() {
                return Ok(Some(message));
            }
            if !self.shared.alive.load(Ordering::Acquire) {
                return Ok(None);
            }
            queue = lane
                .ready
                .wait(queue)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    fn shutdown(&self) {
        self.shared.alive.store(false, Ordering::Release);
        for lane in &self.shared.lanes {
            // Touch the lock so a reader between its check and its wait
            // cannot miss the wakeup.
            drop(lock(&lane.queue));
            lane.ready.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Command;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_pair_delivers_both_directions() {
        let (a, b) = LoopbackChannel::pair();

        a.write_message(&Message::command(Command::new("to-b")))
            .expect("write");
        b.write_message(&Message::command(Command::new("to-a")))
            .expect("write");

        let at_b = b.read_message().expect("read").expect("message");
        let at_a = a.read_message().expect("read").expect("message");
        match (at_b.body, at_a.body) {
            (crate::message::MessageBody::Command(x), crate::message::MessageBody::Command(y)) => {
                assert_eq!(x.op, "to-b");
                assert_eq!(y.op, "to-a");
            }
            _ => panic!("expected commands"),
        }
    }

    #[test]
    fn test_shutdown_kills_both_mirrors() {
        let (a, b) = LoopbackChannel::pair();
        a.shutdown();

        assert!(matches!(
            a.write_message(&Message::command(Command::new("x"))),
            Err(ChannelError::Closed)
        ));
        assert!(matches!(
            b.write_message(&Message::command(Command::new("x"))),
            Err(ChannelError::Closed)
        ));
        assert!(b.read_message().expect("read").is_none());
    }

    #[test]
    fn test_shutdown_unblocks_reader() {
        let (a, b) = LoopbackChannel::pair();

        let reader = thread::spawn(move || b.read_message());
        thread::sleep(Duration::from_millis(50));
        a.shutdown();

        let outcome = reader.join().expect("reader panicked").expect("read");
        assert!(outcome.is_none());
    }

    #[test]
    fn test_queued_messages_survive_until_read() {
        let (a, b) = LoopbackChannel::pair();
        for i in 0..3 {
            a.write_message(&Message::command(Command::new(format!("m{i}"))))
                .expect("write");
        }

        for i in 0..3 {
            let message = b.read_message().expect("read").expect("message");
            match message.body {
                crate::message::MessageBody::Command(c) => assert_eq!(c.op, format!("m{i}")),
                _ => panic!("expected command"),
            }
        }
    }
}
