//! The receiver thread and incoming-message routing.
//!
//! One receiver thread per side blocks on channel reads for the life of the
//! session. Every frame is routed by body and flags:
//!
//! - results complete a parked foreign-thread slot directly, or go to the
//!   inbox for the loop thread;
//! - commands marked as loop-produced go to the inbox (the loop executes
//!   them, pumped or idle-drained); all others execute inline right here;
//! - handshakes fill the properties table.
//!
//! The first failed read ends the loop and trips crash unwinding.

use serde_json::Value;

use crate::command;
use crate::message::{CommandOutcome, Message, MessageBody, MessageFlags};
use crate::sync::lock;

use super::pending::CallOutcome;
use super::MessagingBridge;

/// Receiver loop body. Runs until the channel ends or fails.
pub(crate) fn run(bridge: MessagingBridge) {
    loop {
        if !bridge.is_alive() {
            break;
        }
        match bridge.shared.channel.read_message() {
            Ok(Some(message)) => {
                bridge.shared.counters.note_received();
                route(&bridge, message);
            }
            Ok(None) => {
                tracing::debug!(side = ?bridge.side(), "channel ended");
                break;
            }
            Err(e) => {
                tracing::debug!(side = ?bridge.side(), error = %e, "channel read failed");
                break;
            }
        }
    }
    bridge.shared.fail();
}

fn route(bridge: &MessagingBridge, message: Message) {
    match &message.body {
        MessageBody::Handshake(_) => apply_handshake(bridge, &message),
        MessageBody::Result(result) => {
            if let Some(slot) = bridge.shared.pending.get(result.original_id) {
                slot.complete(CallOutcome::Completed(result.clone()));
            } else {
                bridge.shared.inbox.push(message);
                schedule_idle_drain(bridge);
            }
        }
        MessageBody::Command(_) => {
            if message.is_ui() {
                bridge.shared.inbox.push(message);
                schedule_idle_drain(bridge);
            } else {
                execute_incoming(bridge, &message);
            }
        }
    }
}

/// Execute a command message on the current thread and, for a synchronous
/// call, write the result back. Failures of asynchronous commands are only
/// logged here; there is no waiter to deliver them to.
pub(crate) fn execute_incoming(bridge: &MessagingBridge, message: &Message) {
    let MessageBody::Command(command) = &message.body else {
        return;
    };
    let outcome = command::dispatch(bridge, command);
    bridge.shared.counters.note_executed();

    if message.is_sync_exec() {
        reply(bridge, message.id, outcome);
    } else if let CommandOutcome::Failed(failure) = outcome {
        tracing::warn!(id = message.id, op = %command.op, failure = %failure, "async command failed");
    }
}

/// Apply handshake properties for keys not already set, then acknowledge.
pub(crate) fn apply_handshake(bridge: &MessagingBridge, message: &Message) {
    let MessageBody::Handshake(properties) = &message.body else {
        return;
    };
    {
        let mut table = lock(&bridge.shared.properties);
        for (key, value) in properties {
            table.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }
    tracing::info!(side = ?bridge.side(), keys = properties.len(), "session handshake applied");
    if message.is_sync_exec() {
        reply(bridge, message.id, CommandOutcome::Value(Value::Null));
    }
}

fn reply(bridge: &MessagingBridge, original_id: i64, outcome: CommandOutcome) {
    let mut message = Message::result_of(original_id, outcome);
    let (_, written) = bridge
        .shared
        .stamp_and_write(&mut message, MessageFlags::empty(), |_| {});
    if let Err(e) = written {
        tracing::warn!(original_id, error = %e, "failed to write result; closing session");
        bridge.shared.fail();
    }
}

/// Schedule an inbox drain onto the loop thread for when it is idle.
fn schedule_idle_drain(bridge: &MessagingBridge) {
    let scheduled = bridge.clone();
    bridge
        .shared
        .event_loop
        .invoke(Box::new(move || drain_idle(&scheduled)));
}

/// Drain the inbox on an idle loop thread.
///
/// Stops at a result the pump loop has claimed (a reentrant hand-pump from a
/// blocked sync send can land here); results nobody waits for are dropped.
fn drain_idle(bridge: &MessagingBridge) {
    while let Some(message) = bridge.shared.inbox.try_pop() {
        match &message.body {
            MessageBody::Command(_) => execute_incoming(bridge, &message),
            MessageBody::Handshake(_) => apply_handshake(bridge, &message),
            MessageBody::Result(result) => {
                if lock(&bridge.shared.awaited).contains(&result.original_id) {
                    bridge.shared.inbox.push_front(message);
                    break;
                }
                tracing::debug!(
                    original_id = result.original_id,
                    "dropping result with no waiter"
                );
                bridge.shared.counters.note_dropped();
            }
        }
    }
}
