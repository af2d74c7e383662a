//! Command payloads and the receiving-side dispatch table.
//!
//! A command travels as a tagged kind plus a JSON argument payload and is
//! dispatched through a [`CommandTable`] on the side that executes it. No
//! executable code ever crosses the boundary; both sides agree on kinds the
//! way they agree on a wire format.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::bridge::MessagingBridge;
use crate::message::CommandOutcome;
use crate::sync::lock;

/// A local object addressable from the other side by its registry id.
pub type Instance = Arc<dyn Any + Send + Sync>;

/// Handler invoked when a command of a given kind arrives.
///
/// Returning `Err` ships the failure back to a synchronous caller (or logs it
/// locally for an asynchronous one).
pub type CommandHandler =
    Arc<dyn Fn(&CommandContext<'_>, &serde_json::Value) -> Result<serde_json::Value, String> + Send + Sync>;

/// A serializable operation addressed to the other side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    /// Registry id of the target object on the executing side, if any.
    pub target: Option<i64>,
    /// Command kind, resolved against the executing side's [`CommandTable`].
    pub op: String,
    /// Argument payload.
    pub args: serde_json::Value,
}

impl Command {
    /// Create a command with no target and no arguments.
    pub fn new(op: impl Into<String>) -> Self {
        Self {
            target: None,
            op: op.into(),
            args: serde_json::Value::Null,
        }
    }

    /// Set the argument payload.
    pub fn with_args(mut self, args: serde_json::Value) -> Self {
        self.args = args;
        self
    }

    /// Address the command at a registered instance on the executing side.
    pub fn with_target(mut self, id: i64) -> Self {
        self.target = Some(id);
        self
    }
}

/// Execution context handed to command handlers.
///
/// The bridge reference allows a handler to reenter the messaging interface
/// while it runs. A handler for a loop-routed command may freely issue
/// synchronous sends (the pump keeps both loops live); a handler executing
/// inline on the receiver thread must stick to `async_send`, since parking
/// the receiver would stall the channel it needs for the reply.
pub struct CommandContext<'a> {
    /// The bridge the command arrived on.
    pub bridge: &'a MessagingBridge,
    /// The resolved target instance, when the command addressed one.
    pub target: Option<Instance>,
}

/// Kind-to-handler dispatch table.
///
/// Registration is expected at session setup; dispatch clones the handler out
/// under a narrow lock so no lock is held while command code runs.
#[derive(Default)]
pub struct CommandTable {
    handlers: Mutex<HashMap<String, CommandHandler>>,
}

impl CommandTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a command kind, replacing any previous one.
    pub fn register<F>(&self, op: impl Into<String>, handler: F)
    where
        F: Fn(&CommandContext<'_>, &serde_json::Value) -> Result<serde_json::Value, String>
            + Send
            + Sync
            + 'static,
    {
        lock(&self.handlers).insert(op.into(), Arc::new(handler));
    }

    /// Look up the handler for a kind.
    pub fn get(&self, op: &str) -> Option<CommandHandler> {
        lock(&self.handlers).get(op).cloned()
    }

    /// Number of registered kinds.
    pub fn len(&self) -> usize {
        lock(&self.handlers).len()
    }

    /// Whether no kinds are registered.
    pub fn is_empty(&self) -> bool {
        lock(&self.handlers).is_empty()
    }
}

/// Execute a command against a bridge, producing its outcome.
///
/// A stale target degrades to [`CommandOutcome::Absent`] without running the
/// handler. Handler failures and panics are captured, never propagated to the
/// executing thread.
pub(crate) fn dispatch(bridge: &MessagingBridge, command: &Command) -> CommandOutcome {
    let target = match command.target {
        Some(id) => match bridge.instances().get(id) {
            Some(instance) => Some(instance),
            None => {
                tracing::debug!(target_id = id, op = %command.op, "target gone, declining command");
                return CommandOutcome::Absent;
            }
        },
        None => None,
    };

    let handler = match bridge.commands().get(&command.op) {
        Some(handler) => handler,
        None => return CommandOutcome::Failed(format!("unknown command kind: {}", command.op)),
    };

    let context = CommandContext { bridge, target };
    match catch_unwind(AssertUnwindSafe(|| handler(&context, &command.args))) {
        Ok(Ok(value)) => CommandOutcome::Value(value),
        Ok(Err(failure)) => CommandOutcome::Failed(failure),
        Err(panic) => {
            let detail = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            CommandOutcome::Failed(format!("command panicked: {detail}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_get() {
        let table = CommandTable::new();
        assert!(table.is_empty());

        table.register("ping", |_ctx, _args| Ok(serde_json::json!("pong")));

        assert_eq!(table.len(), 1);
        assert!(table.get("ping").is_some());
        assert!(table.get("pong").is_none());
    }

    #[test]
    fn test_register_replaces() {
        let table = CommandTable::new();
        table.register("v", |_ctx, _args| Ok(serde_json::json!(1)));
        table.register("v", |_ctx, _args| Ok(serde_json::json!(2)));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_command_builder() {
        let cmd = Command::new("set_text")
            .with_target(3)
            .with_args(serde_json::json!({"text": "hello"}));

        assert_eq!(cmd.op, "set_text");
        assert_eq!(cmd.target, Some(3));
        assert_eq!(cmd.args["text"], "hello");
    }
}
