//! Bridge configuration with side-specific defaults.

use std::time::Duration;

use crate::codec::DEFAULT_RESET_THRESHOLD;

/// Tunables for one messaging interface.
#[derive(Clone, Debug)]
pub struct BridgeConfig {
    /// How long one wait iteration of a synchronous send blocks before the
    /// waiter re-checks state and hand-pumps one local event.
    ///
    /// The two sides default to different intervals (500 ms host, 5 s guest)
    /// because their responsiveness under load can differ wildly; nothing in
    /// the protocol relies on the asymmetry.
    pub sync_poll_interval: Duration,

    /// Cumulative bytes a byte-stream channel writes before its encoder
    /// buffer is reset. See [`crate::codec::FrameWriter`].
    pub reset_threshold: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self::host()
    }
}

impl BridgeConfig {
    /// Defaults for the host side.
    pub fn host() -> Self {
        Self {
            sync_poll_interval: Duration::from_millis(500),
            reset_threshold: DEFAULT_RESET_THRESHOLD,
        }
    }

    /// Defaults for the guest side.
    pub fn guest() -> Self {
        Self {
            sync_poll_interval: Duration::from_secs(5),
            reset_threshold: DEFAULT_RESET_THRESHOLD,
        }
    }

    /// Override the sync poll interval.
    pub fn with_sync_poll_interval(mut self, interval: Duration) -> Self {
        self.sync_poll_interval = interval;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_defaults() {
        assert_eq!(BridgeConfig::host().sync_poll_interval, Duration::from_millis(500));
        assert_eq!(BridgeConfig::guest().sync_poll_interval, Duration::from_secs(5));
        assert_eq!(BridgeConfig::default().reset_threshold, DEFAULT_RESET_THRESHOLD);
    }
}
