//! Byte-stream channel over a TCP socket pair.

use std::io;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

use super::{MessageChannel, StreamChannel};
use crate::error::ChannelError;
use crate::message::Message;

/// A message channel over a connected TCP stream.
///
/// Unlike a raw [`StreamChannel`], shutdown also closes the socket itself,
/// which unblocks a receiver thread parked in a read.
pub struct SocketChannel {
    inner: StreamChannel,
    stream: TcpStream,
}

impl SocketChannel {
    /// Wrap an already-connected stream.
    ///
    /// # Errors
    ///
    /// Fails if the stream cannot be duplicated into read/write halves.
    pub fn from_stream(stream: TcpStream, reset_threshold: usize) -> Result<Self, ChannelError> {
        stream.set_nodelay(true).ok();
        let read_half = stream.try_clone()?;
        let write_half = stream.try_clone()?;
        Ok(Self {
            inner: StreamChannel::new(Box::new(read_half), Box::new(write_half), reset_threshold),
            stream,
        })
    }

    /// Connect to a listening peer within `timeout`.
    ///
    /// # Errors
    ///
    /// Propagates connect failures and timeouts as [`ChannelError::Io`].
    pub fn connect(
        addr: SocketAddr,
        timeout: Duration,
        reset_threshold: usize,
    ) -> Result<Self, ChannelError> {
        let stream = TcpStream::connect_timeout(&addr, timeout)?;
        Self::from_stream(stream, reset_threshold)
    }
}

impl MessageChannel for SocketChannel {
    fn write_message(&self, message: &Message) -> Result<(), ChannelError> {
        self.inner.write_message(message)
    }

    fn read_message(&self) -> Result<Option<Message>, ChannelError> {
        self.inner.read_message()
    }

    fn shutdown(&self) {
        self.inner.shutdown();
        self.stream.shutdown(Shutdown::Both).ok();
    }
}

/// Accept one inbound connection within `timeout`, polling the listener at
/// `retry_interval`.
///
/// # Errors
///
/// `TimedOut` if nothing connected before the deadline; other I/O errors are
/// passed through.
pub fn accept_within(
    listener: &TcpListener,
    timeout: Duration,
    retry_interval: Duration,
) -> Result<TcpStream, ChannelError> {
    listener.set_nonblocking(true)?;
    let deadline = Instant::now() + timeout;
    loop {
        match listener.accept() {
            Ok((stream, _peer)) => {
                stream.set_nonblocking(false)?;
                return Ok(stream);
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                if Instant::now() >= deadline {
                    return Err(ChannelError::Io(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "no peer connection before deadline",
                    )));
                }
                thread::sleep(retry_interval);
            }
            Err(e) => return Err(ChannelError::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::DEFAULT_RESET_THRESHOLD;
    use crate::command::Command;
    use crate::message::MessageBody;

    fn connected_pair() -> (SocketChannel, SocketChannel) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("local addr");

        let client = thread::spawn(move || {
            SocketChannel::connect(addr, Duration::from_secs(5), DEFAULT_RESET_THRESHOLD)
                .expect("connect")
        });
        let accepted = accept_within(&listener, Duration::from_secs(5), Duration::from_millis(10))
            .expect("accept");
        let server =
            SocketChannel::from_stream(accepted, DEFAULT_RESET_THRESHOLD).expect("wrap stream");
        (server, client.join().expect("client panicked"))
    }

    #[test]
    fn test_socket_roundtrip() {
        let (server, client) = connected_pair();

        client
            .write_message(&Message::command(Command::new("over-tcp")))
            .expect("write");

        let received = server.read_message().expect("read").expect("message");
        match received.body {
            MessageBody::Command(c) => assert_eq!(c.op, "over-tcp"),
            _ => panic!("expected command"),
        }
    }

    #[test]
    fn test_shutdown_unblocks_blocked_read() {
        let (server, client) = connected_pair();

        let reader = thread::spawn(move || server.read_message());
        thread::sleep(Duration::from_millis(50));
        client.shutdown();

        let outcome = reader.join().expect("reader panicked").expect("read");
        assert!(outcome.is_none());
    }

    #[test]
    fn test_accept_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let result = accept_within(
            &listener,
            Duration::from_millis(50),
            Duration::from_millis(10),
        );
        assert!(matches!(result, Err(ChannelError::Io(_))));
    }
}
