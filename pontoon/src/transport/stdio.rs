//! Byte-stream channels over standard input/output.
//!
//! In stdio piping mode the host talks to the child through the child's
//! stdin/stdout, and the child talks back through its own. The child must
//! keep its stdout clean of stray prints; diagnostics belong on stderr,
//! which the host tees into its log.

use std::io;
use std::process::Child;

use super::StreamChannel;
use crate::error::ChannelError;

/// Channel over a spawned child's stdin/stdout, seen from the host.
///
/// # Errors
///
/// Fails if the child was not spawned with piped stdin and stdout.
pub fn from_child(child: &mut Child, reset_threshold: usize) -> Result<StreamChannel, ChannelError> {
    let stdin = child.stdin.take().ok_or_else(|| {
        ChannelError::Io(io::Error::other("child stdin is not piped"))
    })?;
    let stdout = child.stdout.take().ok_or_else(|| {
        ChannelError::Io(io::Error::other("child stdout is not piped"))
    })?;
    Ok(StreamChannel::new(
        Box::new(stdout),
        Box::new(stdin),
        reset_threshold,
    ))
}

/// Channel over this process's own stdin/stdout, seen from the spawned peer.
pub fn from_own_stdio(reset_threshold: usize) -> StreamChannel {
    StreamChannel::new(
        Box::new(io::stdin()),
        Box::new(io::stdout()),
        reset_threshold,
    )
}
