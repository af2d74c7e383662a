//! Configuration for peer sessions.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::BridgeConfig;
use crate::event_loop::EventLoop;

/// Default bound on waiting for the spawned peer to connect back.
pub const DEFAULT_ACCEPT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default interval between accept retries while waiting for the peer.
pub const DEFAULT_ACCEPT_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// How the peer side of a session comes to exist.
#[derive(Clone)]
pub enum LaunchMode {
    /// Both sides in this process, connected by a loopback pair.
    InProcess {
        /// Event loop of the in-process guest side.
        guest_loop: Arc<dyn EventLoop>,
        /// Bridge configuration for the guest side.
        guest_config: BridgeConfig,
    },

    /// Spawn a child process and talk over its stdin/stdout.
    StdioProcess {
        /// Peer executable.
        program: PathBuf,
        /// Arguments placed before the positional `session-id port` pair.
        args: Vec<String>,
    },

    /// Spawn a child process that connects back to a local TCP port.
    SocketProcess {
        /// Peer executable.
        program: PathBuf,
        /// Arguments placed before the positional `session-id port` pair.
        args: Vec<String>,
    },
}

impl fmt::Debug for LaunchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LaunchMode::InProcess { .. } => f.write_str("InProcess"),
            LaunchMode::StdioProcess { program, .. } => {
                f.debug_struct("StdioProcess").field("program", program).finish()
            }
            LaunchMode::SocketProcess { program, .. } => {
                f.debug_struct("SocketProcess").field("program", program).finish()
            }
        }
    }
}

/// Options governing one peer session.
#[derive(Clone, Debug)]
pub struct PeerOptions {
    /// In-process or one of the out-of-process modes.
    pub mode: LaunchMode,

    /// Environment variable names copied into the child's environment when
    /// set in ours.
    pub forwarded_env: Vec<String>,

    /// Properties sent in the handshake; the peer applies only keys it does
    /// not already have set.
    pub properties: HashMap<String, String>,

    /// Bound on waiting for the peer connection and handshake.
    pub accept_timeout: Duration,

    /// Interval between accept retries.
    pub accept_retry_interval: Duration,

    /// Respawn the peer once after an unexpected death.
    pub respawn: bool,

    /// Host-side bridge configuration.
    pub bridge: BridgeConfig,
}

impl PeerOptions {
    /// Options for an in-process session.
    pub fn in_process(guest_loop: Arc<dyn EventLoop>) -> Self {
        Self::with_mode(LaunchMode::InProcess {
            guest_loop,
            guest_config: BridgeConfig::guest(),
        })
    }

    /// Options for a child process piped over stdio.
    pub fn stdio_process(program: impl Into<PathBuf>) -> Self {
        Self::with_mode(LaunchMode::StdioProcess {
            program: program.into(),
            args: Vec::new(),
        })
    }

    /// Options for a child process connecting back over a socket.
    pub fn socket_process(program: impl Into<PathBuf>) -> Self {
        Self::with_mode(LaunchMode::SocketProcess {
            program: program.into(),
            args: Vec::new(),
        })
    }

    fn with_mode(mode: LaunchMode) -> Self {
        Self {
            mode,
            forwarded_env: Vec::new(),
            properties: HashMap::new(),
            accept_timeout: DEFAULT_ACCEPT_TIMEOUT,
            accept_retry_interval: DEFAULT_ACCEPT_RETRY_INTERVAL,
            respawn: false,
            bridge: BridgeConfig::host(),
        }
    }

    /// Add a handshake property.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Enable the one-shot respawn after an unexpected peer death.
    pub fn with_respawn(mut self) -> Self {
        self.respawn = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_loop::StepEventLoop;

    #[test]
    fn test_defaults() {
        let options = PeerOptions::in_process(Arc::new(StepEventLoop::new()));
        assert_eq!(options.accept_timeout, DEFAULT_ACCEPT_TIMEOUT);
        assert!(!options.respawn);
        assert!(options.properties.is_empty());
    }

    #[test]
    fn test_builders() {
        let options = PeerOptions::stdio_process("/usr/bin/peer")
            .with_property("ui.theme", "dark")
            .with_respawn();
        assert!(options.respawn);
        assert_eq!(options.properties.get("ui.theme").map(String::as_str), Some("dark"));
        assert!(matches!(options.mode, LaunchMode::StdioProcess { .. }));
    }
}
