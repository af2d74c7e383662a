//! Message envelope and flags.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::command::Command;

/// Which side of the bridge a messaging interface belongs to.
///
/// The side determines the sign of every message id the interface assigns:
/// the host stamps positive ids, the guest negative ones. Two interfaces can
/// therefore never collide on an id without any central coordination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    /// The side that opened the session (and spawned the peer, if any).
    Host,
    /// The spawned or accepted side.
    Guest,
}

impl Side {
    /// Turn a positive sequence number into a signed message id for this side.
    pub fn stamp(self, seq: i64) -> i64 {
        match self {
            Side::Host => seq,
            Side::Guest => -seq,
        }
    }

    /// The other side.
    pub fn opposite(self) -> Side {
        match self {
            Side::Host => Side::Guest,
            Side::Guest => Side::Host,
        }
    }
}

bitflags! {
    /// Control flags stamped on a message at send time.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MessageFlags: u8 {
        /// The sender is blocked awaiting the result correlated to this
        /// message's id; the executing side must write a result back.
        const SYNC_EXEC = 1 << 0;

        /// The message was produced on a loop thread. On the executing side
        /// this routes the command to the loop thread instead of running it
        /// inline on the receiver thread.
        const UI_THREAD = 1 << 1;
    }
}

// Flags travel as raw bits.
impl Serialize for MessageFlags {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.bits().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for MessageFlags {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let bits = u8::deserialize(deserializer)?;
        Ok(MessageFlags::from_bits_truncate(bits))
    }
}

/// What a command produced on the executing side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CommandOutcome {
    /// The command ran and returned a value.
    Value(serde_json::Value),

    /// The addressed target is no longer registered. This is the designed
    /// degrade path for late messages to destroyed objects, not a failure.
    Absent,

    /// The command ran and failed; the failure is captured as text.
    Failed(String),
}

/// The reserved result subtype, correlating back to an earlier message.
///
/// Created only by the executing side after running a command; consumed only
/// by the side blocked or parked on `original_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    /// Id of the message this result answers.
    pub original_id: i64,
    /// Value or captured failure.
    pub outcome: CommandOutcome,
}

/// Payload of a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MessageBody {
    /// An operation to execute on the receiving side.
    Command(Command),
    /// A result correlating back to an earlier command.
    Result(CommandResult),
    /// Session bootstrap: properties the receiving side applies for keys it
    /// does not already have set. Internal to the lifecycle layer.
    Handshake(HashMap<String, String>),
}

/// The serializable envelope moved across the bridge.
///
/// A message is immutable once sent. Its id is zero at construction and is
/// assigned under the interface's send lock at send time, so two sends issued
/// back-to-back from one thread are strictly ordered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Non-zero once sent; the sign encodes the originating [`Side`].
    pub id: i64,
    /// Send-time control flags.
    pub flags: MessageFlags,
    /// The payload.
    pub body: MessageBody,
}

impl Message {
    /// Create an unstamped command message.
    pub fn command(command: Command) -> Self {
        Self {
            id: 0,
            flags: MessageFlags::empty(),
            body: MessageBody::Command(command),
        }
    }

    /// Create an unstamped result message answering `original_id`.
    pub fn result_of(original_id: i64, outcome: CommandOutcome) -> Self {
        Self {
            id: 0,
            flags: MessageFlags::empty(),
            body: MessageBody::Result(CommandResult {
                original_id,
                outcome,
            }),
        }
    }

    /// Create an unstamped handshake message.
    pub fn handshake(properties: HashMap<String, String>) -> Self {
        Self {
            id: 0,
            flags: MessageFlags::empty(),
            body: MessageBody::Handshake(properties),
        }
    }

    /// Whether the sender is blocked awaiting this message's result.
    pub fn is_sync_exec(&self) -> bool {
        self.flags.contains(MessageFlags::SYNC_EXEC)
    }

    /// Whether the message was produced on a loop thread.
    pub fn is_ui(&self) -> bool {
        self.flags.contains(MessageFlags::UI_THREAD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_stamp_signs() {
        assert_eq!(Side::Host.stamp(7), 7);
        assert_eq!(Side::Guest.stamp(7), -7);
        assert_eq!(Side::Host.opposite(), Side::Guest);
    }

    #[test]
    fn test_message_starts_unstamped() {
        let msg = Message::command(Command::new("ping"));
        assert_eq!(msg.id, 0);
        assert!(!msg.is_sync_exec());
        assert!(!msg.is_ui());
    }

    #[test]
    fn test_flags_roundtrip_as_bits() {
        let flags = MessageFlags::SYNC_EXEC | MessageFlags::UI_THREAD;
        let bytes = serde_json::to_vec(&flags).expect("encode");
        let decoded: MessageFlags = serde_json::from_slice(&bytes).expect("decode");
        assert_eq!(flags, decoded);
    }

    #[test]
    fn test_result_correlates_original_id() {
        let reply = Message::result_of(-42, CommandOutcome::Absent);
        match reply.body {
            MessageBody::Result(ref r) => {
                assert_eq!(r.original_id, -42);
                assert_eq!(r.outcome, CommandOutcome::Absent);
            }
            _ => panic!("expected result body"),
        }
    }

    #[test]
    fn test_message_roundtrip() {
        let mut msg = Message::command(Command::new("add").with_args(serde_json::json!([2, 3])));
        msg.id = 9;
        msg.flags = MessageFlags::SYNC_EXEC;

        let bytes = serde_json::to_vec(&msg).expect("encode");
        let decoded: Message = serde_json::from_slice(&bytes).expect("decode");

        assert_eq!(decoded.id, 9);
        assert!(decoded.is_sync_exec());
        match decoded.body {
            MessageBody::Command(ref c) => assert_eq!(c.op, "add"),
            _ => panic!("expected command body"),
        }
    }
}
