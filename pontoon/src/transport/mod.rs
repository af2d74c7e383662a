//! Channel transports.
//!
//! Three interchangeable backends implement one contract: write one message,
//! read one message, shut down. The loopback backend moves envelopes between
//! two in-process mirrors through shared queues; the byte-stream backends
//! frame messages as self-delimiting JSON values over a pipe pair or a
//! socket. The layer above never knows which one it is talking to.

mod loopback;
mod socket;
pub mod stdio;
mod stream;

pub use loopback::LoopbackChannel;
pub use socket::{SocketChannel, accept_within};
pub use stream::StreamChannel;

use crate::error::ChannelError;
use crate::message::Message;

/// One full-duplex message channel endpoint.
///
/// Writes may come from any thread and are serialized internally; reads come
/// from the single receiver thread and block until a frame is available.
pub trait MessageChannel: Send + Sync {
    /// Write one message.
    ///
    /// # Errors
    ///
    /// Any [`ChannelError`] is fatal to the session.
    fn write_message(&self, message: &Message) -> Result<(), ChannelError>;

    /// Block until one message is available.
    ///
    /// `Ok(None)` is the clean end of the channel; an error is a transport
    /// failure. Both end the session.
    fn read_message(&self) -> Result<Option<Message>, ChannelError>;

    /// Tear the channel down, unblocking a blocked reader where the backend
    /// can. Idempotent.
    fn shutdown(&self);
}
