//! Per-interface counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Internal atomic counters owned by the bridge.
#[derive(Default)]
pub(crate) struct Counters {
    sent: AtomicU64,
    received: AtomicU64,
    executed: AtomicU64,
    dropped: AtomicU64,
}

impl Counters {
    pub(crate) fn note_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_executed(&self) {
        self.executed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn note_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> BridgeMetrics {
        BridgeMetrics {
            messages_sent: self.sent.load(Ordering::Relaxed),
            messages_received: self.received.load(Ordering::Relaxed),
            commands_executed: self.executed.load(Ordering::Relaxed),
            messages_dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of a bridge's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeMetrics {
    /// Messages written to the channel.
    pub messages_sent: u64,
    /// Messages read off the channel.
    pub messages_received: u64,
    /// Commands executed on this side.
    pub commands_executed: u64,
    /// Messages dropped (dead-channel async sends, waiterless results).
    pub messages_dropped: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counts() {
        let counters = Counters::default();
        counters.note_sent();
        counters.note_sent();
        counters.note_received();
        counters.note_executed();

        let snap = counters.snapshot();
        assert_eq!(snap.messages_sent, 2);
        assert_eq!(snap.messages_received, 1);
        assert_eq!(snap.commands_executed, 1);
        assert_eq!(snap.messages_dropped, 0);
    }
}
