//! Error types for the pontoon messaging layer.

use std::time::Duration;

/// Errors that can occur on a message channel.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// Underlying I/O operation failed.
    #[error("channel I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A message could not be encoded for the wire.
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// An incoming frame could not be decoded.
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The channel is closed.
    #[error("channel closed")]
    Closed,
}

/// Errors surfaced to callers of the messaging interface.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The interface is closed; sending through it is a programming error.
    #[error("messaging interface is closed")]
    InterfaceClosed,

    /// The remote command executed and failed; the captured failure is
    /// shipped back verbatim.
    #[error("remote command failed: {0}")]
    Remote(String),

    /// The channel failed while writing.
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

/// Errors from peer session lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// The session is already open.
    #[error("session already open")]
    AlreadyOpen,

    /// The peer process could not be spawned.
    #[error("failed to spawn peer: {0}")]
    SpawnFailed(String),

    /// No inbound connection arrived within the accept timeout.
    #[error("peer did not connect within {timeout:?}")]
    AcceptTimedOut {
        /// The configured accept timeout.
        timeout: Duration,
    },

    /// The handshake message exchange did not complete.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// Peer bootstrap arguments were malformed.
    #[error("invalid bootstrap arguments: {0}")]
    InvalidBootstrap(String),

    /// The channel failed while opening the session.
    #[error(transparent)]
    Channel(#[from] ChannelError),
}
