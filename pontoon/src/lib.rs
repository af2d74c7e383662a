//! # Pontoon
//!
//! A messaging bridge between two independent, single-threaded UI event loops.
//!
//! Each loop owns its widgets and only the owning loop thread may touch them.
//! The loops may live in the same process or in two OS processes connected by
//! a byte stream. Pontoon moves tagged, serializable commands between the two
//! sides, correlates results back to callers, and keeps both loops responsive
//! while a synchronous call is in flight:
//!
//! - **Fire-and-forget** ([`MessagingBridge::async_send`]): never blocks,
//!   best-effort once the remote side is gone.
//! - **Call-with-result** ([`MessagingBridge::sync_send`]): blocks the caller
//!   until the correlated result arrives. A caller on the loop thread keeps
//!   pumping its own event queue while blocked, so two-way synchronous calls
//!   cannot deadlock the loops against each other.
//!
//! Cross-side references are plain integer ids resolved against each side's
//! own [`Registry`] — objects are never shared across the boundary, and a
//! lookup miss means "target no longer valid", not an error.
//!
//! The [`peer`] module manages out-of-process sessions: spawning the peer,
//! the properties handshake, crash detection and optional respawn.

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

/// Messaging interface: send paths, pump loop, receiver thread.
pub mod bridge;

/// JSON frame encoding and decoding for byte-stream channels.
pub mod codec;

/// Command payloads and the receiving-side dispatch table.
pub mod command;

/// Bridge configuration with side-specific defaults.
pub mod config;

/// Error types for channel, bridge and peer operations.
pub mod error;

/// The event-loop seam the protocol core drives.
pub mod event_loop;

/// Peer session lifecycle: spawn, handshake, death, respawn.
pub mod peer;

/// Process-local id-to-object tables.
pub mod registry;

/// Channel transports: loopback, byte stream, socket.
pub mod transport;

/// Message envelope and flags.
pub mod message;

mod sync;

pub use bridge::{BridgeMetrics, MessagingBridge, loopback_pair};
pub use command::{Command, CommandContext, CommandTable, Instance};
pub use config::BridgeConfig;
pub use error::{BridgeError, ChannelError, PeerError};
pub use event_loop::{EventLoop, StepEventLoop};
pub use message::{CommandOutcome, CommandResult, Message, MessageBody, MessageFlags, Side};
pub use peer::{LaunchMode, PeerBootstrap, PeerController, PeerOptions, SessionListener, SessionState};
pub use registry::Registry;
pub use transport::{LoopbackChannel, MessageChannel, SocketChannel, StreamChannel};
