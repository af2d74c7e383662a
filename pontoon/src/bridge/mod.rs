//! The messaging interface: the protocol core.
//!
//! One [`MessagingBridge`] per side per session. It assigns message ids,
//! writes through the channel transport, runs the receiver thread, and
//! correlates results back to callers.
//!
//! # Send paths
//!
//! - [`MessagingBridge::async_send`] — fire-and-forget. Never blocks, never
//!   reports the command's own failure back; a dead channel drops the
//!   message with a log line (by the time many async sends happen the remote
//!   side may already be gone, and the caller could not act on the failure
//!   anyway).
//! - [`MessagingBridge::sync_send`] from the loop thread — writes, then
//!   *pumps*: drains buffered incoming messages (executing commands,
//!   stashing unrelated results), and while waiting hand-processes one local
//!   event per poll interval. If the remote side is itself blocked waiting
//!   for this loop to process an event it already queued, that hand-pump is
//!   what breaks the deadlock.
//! - [`MessagingBridge::sync_send`] from any other thread — registers a
//!   pending-call slot under the fresh message id and parks on it until the
//!   receiver completes it.
//!
//! # Sessions
//!
//! `alive` and `open` are monotonic within one session. The only transition
//! out of the open state is to dead: an explicit [`MessagingBridge::destroy`],
//! a read failure on the receiver thread, or a failed handshake. Crash
//! unwinding releases every blocked waiter — pump waiters via the closed
//! inbox, parked foreign threads via their slots — within one detection
//! cycle.

mod inbox;
mod metrics;
mod pending;
mod receiver;

pub use metrics::BridgeMetrics;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::command::{Command, CommandTable, Instance};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, ChannelError, PeerError};
use crate::event_loop::EventLoop;
use crate::message::{CommandResult, Message, MessageBody, MessageFlags, Side};
use crate::registry::Registry;
use crate::sync::lock;
use crate::transport::{LoopbackChannel, MessageChannel};

use inbox::Inbox;
use metrics::Counters;
use pending::{CallOutcome, PendingCall};

/// One side's messaging interface for one session.
///
/// Cheap to clone; all clones share the same session state.
#[derive(Clone)]
pub struct MessagingBridge {
    shared: Arc<Shared>,
}

pub(crate) struct Shared {
    side: Side,
    config: BridgeConfig,
    channel: Arc<dyn MessageChannel>,
    event_loop: Arc<dyn EventLoop>,
    commands: CommandTable,
    instances: Registry<Instance>,
    /// Park slots for foreign-thread sync calls, keyed by message id.
    pending: Registry<Arc<PendingCall>>,
    inbox: Inbox,
    /// Ids the loop thread is currently pump-waiting on. Guards the idle
    /// drain against consuming a result the pump loop is about to claim.
    awaited: Mutex<HashSet<i64>>,
    properties: Mutex<HashMap<String, String>>,
    next_seq: AtomicI64,
    alive: AtomicBool,
    open: AtomicBool,
    /// Serializes id assignment and channel writes.
    send_lock: Mutex<()>,
    /// Fired once if the channel dies while open; suppressed by `destroy`.
    on_death: Mutex<Option<Box<dyn FnOnce() + Send>>>,
    counters: Counters,
}

impl Shared {
    /// Assign the next id under the send lock and write the message.
    ///
    /// `pre_write` runs after stamping and before the write, still under the
    /// lock, so a correlation slot is always registered before the peer can
    /// possibly answer.
    fn stamp_and_write(
        &self,
        message: &mut Message,
        flags: MessageFlags,
        pre_write: impl FnOnce(i64),
    ) -> (i64, Result<(), ChannelError>) {
        let _guard = lock(&self.send_lock);
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let id = self.side.stamp(seq);
        message.id = id;
        message.flags = flags;
        pre_write(id);
        let result = self.channel.write_message(message);
        if result.is_ok() {
            self.counters.note_sent();
        }
        (id, result)
    }

    /// Transition to dead and unwind every waiter. Idempotent.
    fn fail(&self) {
        if self.alive.swap(false, Ordering::AcqRel) {
            tracing::info!(side = ?self.side, "messaging interface is now dead");
            self.channel.shutdown();
            self.inbox.close();
            for (_, slot) in self.pending.drain() {
                slot.complete(CallOutcome::ChannelDied);
            }
            let hook = lock(&self.on_death).take();
            if let Some(hook) = hook {
                hook();
            }
        }
    }
}

impl MessagingBridge {
    /// Open an interface over a channel and start its receiver thread.
    pub fn open(
        side: Side,
        channel: Arc<dyn MessageChannel>,
        event_loop: Arc<dyn EventLoop>,
        config: BridgeConfig,
    ) -> Self {
        Self::open_with(side, channel, event_loop, config, |_| {})
    }

    /// Like [`MessagingBridge::open`], but runs `configure` (register
    /// command handlers, set properties) before the receiver thread starts,
    /// so no message can arrive ahead of the setup.
    pub fn open_with(
        side: Side,
        channel: Arc<dyn MessageChannel>,
        event_loop: Arc<dyn EventLoop>,
        config: BridgeConfig,
        configure: impl FnOnce(&MessagingBridge),
    ) -> Self {
        let shared = Arc::new(Shared {
            side,
            config,
            channel,
            event_loop,
            commands: CommandTable::new(),
            instances: Registry::new(),
            pending: Registry::new(),
            inbox: Inbox::new(),
            awaited: Mutex::new(HashSet::new()),
            properties: Mutex::new(HashMap::new()),
            next_seq: AtomicI64::new(1),
            alive: AtomicBool::new(true),
            open: AtomicBool::new(true),
            send_lock: Mutex::new(()),
            on_death: Mutex::new(None),
            counters: Counters::default(),
        });

        let bridge = Self { shared };
        configure(&bridge);
        let spawned = thread::Builder::new()
            .name(match side {
                Side::Host => "pontoon-recv-host".to_string(),
                Side::Guest => "pontoon-recv-guest".to_string(),
            })
            .spawn({
                let bridge = bridge.clone();
                move || receiver::run(bridge)
            });
        if let Err(e) = spawned {
            tracing::error!(error = %e, "failed to start receiver thread");
            bridge.shared.fail();
        }
        bridge
    }

    /// Which side this interface is.
    pub fn side(&self) -> Side {
        self.shared.side
    }

    /// Whether the channel is still usable.
    pub fn is_alive(&self) -> bool {
        self.shared.alive.load(Ordering::Acquire)
    }

    /// Whether the session has not been destroyed.
    pub fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::Acquire)
    }

    /// The dispatch table commands arriving on this side resolve against.
    pub fn commands(&self) -> &CommandTable {
        &self.shared.commands
    }

    /// The instance table cross-side target ids resolve against.
    pub fn instances(&self) -> &Registry<Instance> {
        &self.shared.instances
    }

    /// A property applied by the session handshake (or set locally).
    pub fn property(&self, key: &str) -> Option<String> {
        lock(&self.shared.properties).get(key).cloned()
    }

    /// Set a local property; the handshake only fills keys not already set.
    pub fn set_property(&self, key: impl Into<String>, value: impl Into<String>) {
        lock(&self.shared.properties).insert(key.into(), value.into());
    }

    /// Counter snapshot.
    pub fn metrics(&self) -> BridgeMetrics {
        self.shared.counters.snapshot()
    }

    /// Install the hook fired once if the channel dies while open.
    ///
    /// An explicit [`MessagingBridge::destroy`] suppresses it: deliberate
    /// teardown is not a death.
    pub fn set_death_hook(&self, hook: impl FnOnce() + Send + 'static) {
        *lock(&self.shared.on_death) = Some(Box::new(hook));
    }

    /// Fire-and-forget send. Never blocks.
    ///
    /// On a dead channel the message is dropped and logged — best effort is
    /// the contract, not a failure to report.
    pub fn async_send(&self, command: Command) {
        let shared = &self.shared;
        if !self.is_alive() {
            tracing::debug!(op = %command.op, "dropping async send on dead channel");
            shared.counters.note_dropped();
            return;
        }
        let flags = if shared.event_loop.is_loop_thread() {
            MessageFlags::UI_THREAD
        } else {
            MessageFlags::empty()
        };
        let mut message = Message::command(command);
        let (_, written) = shared.stamp_and_write(&mut message, flags, |_| {});
        if let Err(e) = written {
            tracing::warn!(error = %e, "async send failed; closing session");
            shared.fail();
        }
    }

    /// Send a command and block until its correlated result arrives.
    ///
    /// Returns the remote value, or `None` when the target was already gone
    /// or the channel died mid-call (both are expected races, absorbed
    /// here).
    ///
    /// # Errors
    ///
    /// [`BridgeError::InterfaceClosed`] when called on a closed interface
    /// (a programming error, surfaced loudly), [`BridgeError::Remote`] when
    /// the remote command executed and failed, [`BridgeError::Channel`] when
    /// the write itself failed.
    pub fn sync_send(&self, command: Command) -> Result<Option<serde_json::Value>, BridgeError> {
        if !self.is_alive() {
            return Err(BridgeError::InterfaceClosed);
        }
        if self.shared.event_loop.is_loop_thread() {
            self.sync_send_pump(command)
        } else {
            self.sync_send_park(command)
        }
    }

    /// Loop-thread path: write, then pump until the result arrives.
    fn sync_send_pump(&self, command: Command) -> Result<Option<serde_json::Value>, BridgeError> {
        let shared = &self.shared;
        let mut message = Message::command(command);
        let (id, written) = shared.stamp_and_write(
            &mut message,
            MessageFlags::SYNC_EXEC | MessageFlags::UI_THREAD,
            |_| {},
        );
        if let Err(e) = written {
            shared.fail();
            return Err(BridgeError::Channel(e));
        }

        lock(&shared.awaited).insert(id);
        let result = self.pump_until(id);
        lock(&shared.awaited).remove(&id);

        match result {
            Some(result) => unpack(result),
            None => {
                tracing::warn!(id, "channel died while pumping for a result");
                Ok(None)
            }
        }
    }

    /// Drain and execute incoming messages until the result for `id` shows
    /// up or the channel dies. Unrelated results collected meanwhile are
    /// reinjected at the queue front in their original order.
    fn pump_until(&self, id: i64) -> Option<CommandResult> {
        let shared = &self.shared;
        let mut stash: Vec<Message> = Vec::new();

        let found = 'pump: loop {
            while let Some(message) = shared.inbox.try_pop() {
                match &message.body {
                    MessageBody::Result(result) if result.original_id == id => {
                        break 'pump Some(result.clone());
                    }
                    MessageBody::Result(_) => stash.push(message),
                    MessageBody::Command(_) => receiver::execute_incoming(self, &message),
                    MessageBody::Handshake(_) => receiver::apply_handshake(self, &message),
                }
            }

            if !self.is_alive() {
                break 'pump None;
            }

            let timed_out = shared.inbox.wait(shared.config.sync_poll_interval);
            if timed_out {
                // The deadlock breaker: give the local loop a chance to run
                // whatever the remote side is blocked on.
                shared.event_loop.pump_one();
            }
        };

        shared.inbox.reinject_front(stash);
        found
    }

    /// Foreign-thread path: park on a slot until the receiver completes it.
    fn sync_send_park(&self, command: Command) -> Result<Option<serde_json::Value>, BridgeError> {
        let shared = &self.shared;
        let slot = Arc::new(PendingCall::new());
        let mut message = Message::command(command);
        let (id, written) =
            shared.stamp_and_write(&mut message, MessageFlags::SYNC_EXEC, |id| {
                shared.pending.insert_with_id(id, Arc::clone(&slot));
            });
        if let Err(e) = written {
            shared.pending.remove(id);
            shared.fail();
            return Err(BridgeError::Channel(e));
        }

        let outcome = loop {
            if let Some(outcome) = slot.wait(shared.config.sync_poll_interval) {
                break outcome;
            }
            if !self.is_alive() {
                break CallOutcome::ChannelDied;
            }
        };
        shared.pending.remove(id);

        match outcome {
            CallOutcome::Completed(result) => unpack(result),
            CallOutcome::ChannelDied => {
                tracing::warn!(id, "channel died while parked for a result");
                Ok(None)
            }
        }
    }

    /// Send the session handshake and wait for its acknowledgement.
    pub(crate) fn send_handshake(
        &self,
        properties: HashMap<String, String>,
        timeout: Duration,
    ) -> Result<(), PeerError> {
        let shared = &self.shared;
        let slot = Arc::new(PendingCall::new());
        let mut message = Message::handshake(properties);
        let (id, written) =
            shared.stamp_and_write(&mut message, MessageFlags::SYNC_EXEC, |id| {
                shared.pending.insert_with_id(id, Arc::clone(&slot));
            });
        if let Err(e) = written {
            shared.pending.remove(id);
            shared.fail();
            return Err(PeerError::Channel(e));
        }

        let deadline = Instant::now() + timeout;
        let outcome = loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                shared.pending.remove(id);
                shared.fail();
                return Err(PeerError::HandshakeFailed(
                    "no acknowledgement before deadline".to_string(),
                ));
            }
            let slice = remaining.min(shared.config.sync_poll_interval);
            if let Some(outcome) = slot.wait(slice) {
                break outcome;
            }
            if !self.is_alive() {
                break CallOutcome::ChannelDied;
            }
        };
        shared.pending.remove(id);

        match outcome {
            CallOutcome::Completed(_) => Ok(()),
            CallOutcome::ChannelDied => Err(PeerError::HandshakeFailed(
                "channel died during handshake".to_string(),
            )),
        }
    }

    /// Close the session. Idempotent; unwinds all waiters without firing the
    /// death hook.
    pub fn destroy(&self) {
        let shared = &self.shared;
        if shared.open.swap(false, Ordering::AcqRel) {
            let _ = lock(&shared.on_death).take();
            shared.fail();
        }
    }
}

fn unpack(result: CommandResult) -> Result<Option<serde_json::Value>, BridgeError> {
    use crate::message::CommandOutcome;
    match result.outcome {
        CommandOutcome::Value(value) => Ok(Some(value)),
        CommandOutcome::Absent => Ok(None),
        CommandOutcome::Failed(failure) => Err(BridgeError::Remote(failure)),
    }
}

/// Open an in-process session: two mirrored interfaces over a loopback pair.
pub fn loopback_pair(
    host_loop: Arc<dyn EventLoop>,
    guest_loop: Arc<dyn EventLoop>,
    host_config: BridgeConfig,
    guest_config: BridgeConfig,
) -> (MessagingBridge, MessagingBridge) {
    let (host_channel, guest_channel) = LoopbackChannel::pair();
    let host = MessagingBridge::open(
        Side::Host,
        Arc::new(host_channel),
        host_loop,
        host_config,
    );
    let guest = MessagingBridge::open(
        Side::Guest,
        Arc::new(guest_channel),
        guest_loop,
        guest_config,
    );
    (host, guest)
}
