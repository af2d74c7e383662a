//! Byte-stream channel over any `Read`/`Write` pair.

use std::io;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use super::MessageChannel;
use crate::codec::{FrameReader, FrameWriter};
use crate::error::ChannelError;
use crate::message::Message;
use crate::sync::lock;

/// Boxed reading half of a byte stream.
pub type BoxedRead = Box<dyn io::Read + Send>;
/// Boxed writing half of a byte stream.
pub type BoxedWrite = Box<dyn io::Write + Send>;

/// A message channel framing JSON values over a byte stream pair.
///
/// Only the receiver thread reads, so the read lock is uncontended; writes
/// are serialized by the write lock. Note that `shutdown` here only marks
/// the channel closed: unblocking a blocked read is the concrete stream's
/// business (sockets shut the fd down, pipes close when the peer process
/// exits).
pub struct StreamChannel {
    reader: Mutex<FrameReader<BoxedRead>>,
    writer: Mutex<FrameWriter<BoxedWrite>>,
    open: AtomicBool,
}

impl StreamChannel {
    /// Build a channel from a reading and a writing half.
    pub fn new(reader: BoxedRead, writer: BoxedWrite, reset_threshold: usize) -> Self {
        Self {
            reader: Mutex::new(FrameReader::new(reader)),
            writer: Mutex::new(FrameWriter::new(writer, reset_threshold)),
            open: AtomicBool::new(true),
        }
    }
}

impl MessageChannel for StreamChannel {
    fn write_message(&self, message: &Message) -> Result<(), ChannelError> {
        if !self.open.load(Ordering::Acquire) {
            return Err(ChannelError::Closed);
        }
        lock(&self.writer).write(message)
    }

    fn read_message(&self) -> Result<Option<Message>, ChannelError> {
        if !self.open.load(Ordering::Acquire) {
            return Ok(None);
        }
        lock(&self.reader).read()
    }

    fn shutdown(&self) {
        self.open.store(false, Ordering::Release);
    }
}
