//! JSON frame encoding and decoding for byte-stream channels.
//!
//! One message is one serialized JSON value. There is no length prefix:
//! framing relies entirely on the format being self-delimiting, and a
//! newline after each value keeps the stream line-friendly for humans.
//!
//! The writer encodes through a reusable scratch buffer. A single huge
//! message would otherwise leave the buffer permanently grown, so after a
//! configurable number of cumulative bytes the buffer is dropped back to its
//! initial capacity, bounding the encoder's memory across long-lived streams.

use std::io;

use serde_json::de::IoRead;

use crate::error::ChannelError;
use crate::message::Message;

/// Cumulative bytes written before the encoder scratch buffer is reset.
pub const DEFAULT_RESET_THRESHOLD: usize = 500_000;

/// Initial (and post-reset) capacity of the encoder scratch buffer.
const INITIAL_SCRATCH: usize = 4 * 1024;

/// Writes one message per frame to an underlying byte sink.
pub struct FrameWriter<W: io::Write> {
    writer: W,
    scratch: Vec<u8>,
    since_reset: usize,
    reset_threshold: usize,
}

impl<W: io::Write> FrameWriter<W> {
    /// Create a writer with the given reset threshold.
    pub fn new(writer: W, reset_threshold: usize) -> Self {
        Self {
            writer,
            scratch: Vec::with_capacity(INITIAL_SCRATCH),
            since_reset: 0,
            reset_threshold,
        }
    }

    /// Encode and write one message, flushing the sink.
    ///
    /// # Errors
    ///
    /// [`ChannelError::Encode`] if serialization fails, [`ChannelError::Io`]
    /// if the sink does.
    pub fn write(&mut self, message: &Message) -> Result<(), ChannelError> {
        self.scratch.clear();
        serde_json::to_writer(&mut self.scratch, message).map_err(ChannelError::Encode)?;
        self.scratch.push(b'\n');

        self.writer.write_all(&self.scratch)?;
        self.writer.flush()?;

        self.since_reset += self.scratch.len();
        if self.since_reset >= self.reset_threshold {
            self.scratch = Vec::with_capacity(INITIAL_SCRATCH);
            self.since_reset = 0;
        }
        Ok(())
    }

    /// Bytes written since the last scratch reset.
    pub fn bytes_since_reset(&self) -> usize {
        self.since_reset
    }
}

/// Reads one message per frame from an underlying byte source.
///
/// Blocks until a full frame is available or the source ends.
pub struct FrameReader<R: io::Read> {
    frames: serde_json::StreamDeserializer<'static, IoRead<R>, Message>,
}

impl<R: io::Read> FrameReader<R> {
    /// Create a reader over a byte source.
    pub fn new(reader: R) -> Self {
        Self {
            frames: serde_json::Deserializer::from_reader(reader).into_iter(),
        }
    }

    /// Read the next frame.
    ///
    /// Returns `Ok(None)` when the source ends, including mid-frame (a peer
    /// dying halfway through a write is the end of the channel, not a
    /// protocol error).
    ///
    /// # Errors
    ///
    /// [`ChannelError::Decode`] on malformed data.
    pub fn read(&mut self) -> Result<Option<Message>, ChannelError> {
        match self.frames.next() {
            None => Ok(None),
            Some(Ok(message)) => Ok(Some(message)),
            Some(Err(e)) if e.is_eof() => Ok(None),
            Some(Err(e)) => Err(ChannelError::Decode(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Command;
    use crate::message::{CommandOutcome, MessageBody};

    fn encode_all(messages: &[Message]) -> Vec<u8> {
        let mut buffer = Vec::new();
        {
            let mut writer = FrameWriter::new(&mut buffer, DEFAULT_RESET_THRESHOLD);
            for message in messages {
                writer.write(message).expect("write");
            }
        }
        buffer
    }

    #[test]
    fn test_frames_roundtrip_in_order() {
        let mut first = Message::command(Command::new("a"));
        first.id = 1;
        let mut second = Message::result_of(1, CommandOutcome::Value(serde_json::json!(5)));
        second.id = -1;

        let bytes = encode_all(&[first, second]);
        let mut reader = FrameReader::new(bytes.as_slice());

        let one = reader.read().expect("read").expect("first frame");
        assert_eq!(one.id, 1);
        let two = reader.read().expect("read").expect("second frame");
        assert_eq!(two.id, -1);
        match two.body {
            MessageBody::Result(r) => assert_eq!(r.original_id, 1),
            _ => panic!("expected result"),
        }
        assert!(reader.read().expect("read").is_none());
    }

    #[test]
    fn test_truncated_frame_is_end_of_channel() {
        let bytes = encode_all(&[Message::command(Command::new("a"))]);
        let cut = &bytes[..bytes.len() / 2];

        let mut reader = FrameReader::new(cut);
        assert!(reader.read().expect("truncation is not an error").is_none());
    }

    #[test]
    fn test_garbage_is_a_decode_error() {
        let mut reader = FrameReader::new(&b"{\"id\": true}\n"[..]);
        assert!(matches!(reader.read(), Err(ChannelError::Decode(_))));
    }

    #[test]
    fn test_writer_resets_after_threshold() {
        let mut sink = Vec::new();
        let mut writer = FrameWriter::new(&mut sink, 64);

        let message = Message::command(
            Command::new("fill").with_args(serde_json::json!("x".repeat(100))),
        );
        writer.write(&message).expect("write");

        // One frame larger than the threshold triggers an immediate reset.
        assert_eq!(writer.bytes_since_reset(), 0);
    }

    #[test]
    fn test_writer_accumulates_below_threshold() {
        let mut sink = Vec::new();
        let mut writer = FrameWriter::new(&mut sink, DEFAULT_RESET_THRESHOLD);

        writer
            .write(&Message::command(Command::new("tick")))
            .expect("write");
        assert!(writer.bytes_since_reset() > 0);
    }
}
