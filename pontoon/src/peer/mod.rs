//! Peer session lifecycle.
//!
//! A [`PeerController`] owns one session at a time:
//!
//! ```text
//! Closed → Opening → Open → Dead → (Respawning → Open) | Closed
//! ```
//!
//! Opening chooses in-process or out-of-process from the configured
//! [`LaunchMode`], spawns or pairs up the peer, and performs the properties
//! handshake before the session is usable. An unexpected channel death moves
//! the session to `Dead` and — when configured — attempts exactly one
//! respawn, replaying the `opened` notification as if this were a fresh
//! session (no application state survives; anything the peer held is gone).
//! Close is idempotent and notifies `closed` exactly once per session.

mod config;
mod spawn;

pub use config::{
    DEFAULT_ACCEPT_RETRY_INTERVAL, DEFAULT_ACCEPT_TIMEOUT, LaunchMode, PeerOptions,
};

use std::net::{SocketAddr, TcpListener};
use std::process::Child;
use std::sync::{Arc, Mutex, Weak};

use uuid::Uuid;

use crate::bridge::{MessagingBridge, loopback_pair};
use crate::config::BridgeConfig;
use crate::error::{ChannelError, PeerError};
use crate::event_loop::EventLoop;
use crate::message::Side;
use crate::sync::lock;
use crate::transport::{MessageChannel, SocketChannel, accept_within, stdio};

/// Lifecycle phase of a controller's session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session; `open` may be called.
    Closed,
    /// A session is being established.
    Opening,
    /// The session is usable.
    Open,
    /// The peer died; respawn or close is in progress.
    Dead,
    /// A one-shot respawn after a death is in progress.
    Respawning,
}

/// Observer of session lifecycle transitions.
pub trait SessionListener: Send + Sync {
    /// A session became usable (also fired after a successful respawn).
    fn opened(&self, session_id: Uuid);
    /// A session ended; fired exactly once per session.
    fn closed(&self, session_id: Uuid);
}

/// Manages one peer session at a time over the configured launch mode.
pub struct PeerController {
    inner: Arc<Inner>,
}

struct Inner {
    event_loop: Arc<dyn EventLoop>,
    options: PeerOptions,
    state: Mutex<State>,
    listeners: Mutex<Vec<Arc<dyn SessionListener>>>,
}

struct State {
    phase: SessionState,
    session: Option<ActiveSession>,
}

struct ActiveSession {
    id: Uuid,
    bridge: MessagingBridge,
    /// The mirrored interface, for in-process sessions.
    guest: Option<MessagingBridge>,
    child: Option<Child>,
}

impl PeerController {
    /// Create a controller. No session exists until [`PeerController::open`].
    pub fn new(event_loop: Arc<dyn EventLoop>, options: PeerOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                event_loop,
                options,
                state: Mutex::new(State {
                    phase: SessionState::Closed,
                    session: None,
                }),
                listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Register a lifecycle listener.
    pub fn add_listener(&self, listener: Arc<dyn SessionListener>) {
        lock(&self.inner.listeners).push(listener);
    }

    /// Current lifecycle phase.
    pub fn state(&self) -> SessionState {
        lock(&self.inner.state).phase
    }

    /// The host-side interface of the current session, if one is open.
    pub fn bridge(&self) -> Option<MessagingBridge> {
        lock(&self.inner.state)
            .session
            .as_ref()
            .map(|session| session.bridge.clone())
    }

    /// The guest-side interface of an in-process session.
    pub fn guest_bridge(&self) -> Option<MessagingBridge> {
        lock(&self.inner.state)
            .session
            .as_ref()
            .and_then(|session| session.guest.clone())
    }

    /// Open a session: spawn or pair up the peer, handshake, go live.
    ///
    /// # Errors
    ///
    /// [`PeerError::AlreadyOpen`] if a session is already opening or open;
    /// otherwise whatever spawn, accept or handshake failed with.
    pub fn open(&self) -> Result<MessagingBridge, PeerError> {
        let inner = &self.inner;
        let mut state = lock(&inner.state);
        match state.phase {
            SessionState::Closed | SessionState::Dead => {}
            _ => return Err(PeerError::AlreadyOpen),
        }
        state.phase = SessionState::Opening;

        match open_session(inner) {
            Ok(session) => {
                let session_id = session.id;
                let bridge = session.bridge.clone();
                state.session = Some(session);
                state.phase = SessionState::Open;
                drop(state);
                notify_opened(inner, session_id);
                Ok(bridge)
            }
            Err(e) => {
                state.phase = SessionState::Closed;
                state.session = None;
                Err(e)
            }
        }
    }

    /// Close the session. Idempotent; notifies `closed` exactly once.
    pub fn close(&self) {
        let inner = &self.inner;
        let mut state = lock(&inner.state);
        if state.phase == SessionState::Closed {
            return;
        }
        let session = state.session.take();
        state.phase = SessionState::Closed;
        drop(state);

        if let Some(mut session) = session {
            tear_down(&mut session);
            notify_closed(inner, session.id);
        }
    }
}

/// Destroy both interfaces and reap the child, in that order: destroying the
/// bridge first suppresses its death hook, so a deliberate close never looks
/// like a crash.
fn tear_down(session: &mut ActiveSession) {
    session.bridge.destroy();
    if let Some(guest) = &session.guest {
        guest.destroy();
    }
    if let Some(child) = session.child.as_mut() {
        child.kill().ok();
        child.wait().ok();
    }
}

/// Establish a session per the configured launch mode, handshake included.
fn open_session(inner: &Arc<Inner>) -> Result<ActiveSession, PeerError> {
    let options = &inner.options;
    let session_id = Uuid::new_v4();

    let mut session = match &options.mode {
        LaunchMode::InProcess {
            guest_loop,
            guest_config,
        } => {
            let (host, guest) = loopback_pair(
                Arc::clone(&inner.event_loop),
                Arc::clone(guest_loop),
                options.bridge.clone(),
                guest_config.clone(),
            );
            ActiveSession {
                id: session_id,
                bridge: host,
                guest: Some(guest),
                child: None,
            }
        }

        LaunchMode::StdioProcess { program, args } => {
            let mut child = spawn::spawn_peer(program, args, options, session_id, 0)?;
            if let Some(stderr) = child.stderr.take() {
                spawn::tee_lines("stderr", session_id, stderr);
            }
            let channel = match stdio::from_child(&mut child, options.bridge.reset_threshold) {
                Ok(channel) => channel,
                Err(e) => {
                    child.kill().ok();
                    child.wait().ok();
                    return Err(PeerError::Channel(e));
                }
            };
            let bridge = open_host_bridge(inner, Arc::new(channel));
            ActiveSession {
                id: session_id,
                bridge,
                guest: None,
                child: Some(child),
            }
        }

        LaunchMode::SocketProcess { program, args } => {
            let listener = TcpListener::bind(("127.0.0.1", 0))
                .map_err(|e| PeerError::Channel(ChannelError::Io(e)))?;
            let port = listener
                .local_addr()
                .map_err(|e| PeerError::Channel(ChannelError::Io(e)))?
                .port();

            let mut child = spawn::spawn_peer(program, args, options, session_id, port)?;
            if let Some(stderr) = child.stderr.take() {
                spawn::tee_lines("stderr", session_id, stderr);
            }
            if let Some(stdout) = child.stdout.take() {
                spawn::tee_lines("stdout", session_id, stdout);
            }

            let accepted = accept_within(
                &listener,
                options.accept_timeout,
                options.accept_retry_interval,
            )
            .map_err(|e| match e {
                ChannelError::Io(ref io) if io.kind() == std::io::ErrorKind::TimedOut => {
                    child.kill().ok();
                    child.wait().ok();
                    PeerError::AcceptTimedOut {
                        timeout: options.accept_timeout,
                    }
                }
                other => PeerError::Channel(other),
            })?;

            let channel = match SocketChannel::from_stream(accepted, options.bridge.reset_threshold)
            {
                Ok(channel) => channel,
                Err(e) => {
                    child.kill().ok();
                    child.wait().ok();
                    return Err(PeerError::Channel(e));
                }
            };
            let bridge = open_host_bridge(inner, Arc::new(channel));
            ActiveSession {
                id: session_id,
                bridge,
                guest: None,
                child: Some(child),
            }
        }
    };

    if let Err(e) = session
        .bridge
        .send_handshake(options.properties.clone(), options.accept_timeout)
    {
        tear_down(&mut session);
        return Err(e);
    }

    install_death_hook(inner, &session.bridge, session_id);
    tracing::info!(session = %session_id, mode = ?options.mode, "peer session open");
    Ok(session)
}

fn open_host_bridge(inner: &Arc<Inner>, channel: Arc<dyn MessageChannel>) -> MessagingBridge {
    MessagingBridge::open(
        Side::Host,
        channel,
        Arc::clone(&inner.event_loop),
        inner.options.bridge.clone(),
    )
}

fn install_death_hook(inner: &Arc<Inner>, bridge: &MessagingBridge, session_id: Uuid) {
    let weak: Weak<Inner> = Arc::downgrade(inner);
    bridge.set_death_hook(move || {
        if let Some(inner) = weak.upgrade() {
            handle_death(&inner, session_id);
        }
    });
}

/// React to an unexpected channel death: one respawn attempt when
/// configured, otherwise straight to closed.
fn handle_death(inner: &Arc<Inner>, dead_session: Uuid) {
    let mut state = lock(&inner.state);
    let current = state.session.as_ref().map(|session| session.id);
    if current != Some(dead_session) || state.phase != SessionState::Open {
        return;
    }
    state.phase = SessionState::Dead;
    tracing::warn!(session = %dead_session, "peer session died unexpectedly");

    if let Some(mut session) = state.session.take() {
        tear_down(&mut session);
    }

    if inner.options.respawn {
        state.phase = SessionState::Respawning;
        match open_session(inner) {
            Ok(session) => {
                let session_id = session.id;
                state.session = Some(session);
                state.phase = SessionState::Open;
                drop(state);
                tracing::info!(session = %session_id, "peer respawned");
                notify_opened(inner, session_id);
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, "respawn failed; session stays closed");
                state.phase = SessionState::Closed;
            }
        }
    } else {
        state.phase = SessionState::Closed;
    }
    drop(state);
    notify_closed(inner, dead_session);
}

fn notify_opened(inner: &Inner, session_id: Uuid) {
    let listeners = lock(&inner.listeners).clone();
    for listener in listeners {
        listener.opened(session_id);
    }
}

fn notify_closed(inner: &Inner, session_id: Uuid) {
    let listeners = lock(&inner.listeners).clone();
    for listener in listeners {
        listener.closed(session_id);
    }
}

/// Bootstrap data for the spawned (guest) side of a session.
///
/// The peer executable receives two positional arguments: the session id and
/// the callback port, where `0` means "the channel is my own stdin/stdout".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerBootstrap {
    /// Session id assigned by the host.
    pub session_id: Uuid,
    /// Host callback port, or zero for stdio piping.
    pub port: u16,
}

impl PeerBootstrap {
    /// Parse the positional bootstrap arguments.
    ///
    /// # Errors
    ///
    /// [`PeerError::InvalidBootstrap`] on missing or malformed arguments.
    pub fn from_args(args: impl IntoIterator<Item = String>) -> Result<Self, PeerError> {
        let mut args = args.into_iter();
        let session = args
            .next()
            .ok_or_else(|| PeerError::InvalidBootstrap("missing session id".to_string()))?;
        let port = args
            .next()
            .ok_or_else(|| PeerError::InvalidBootstrap("missing callback port".to_string()))?;

        let session_id = session
            .parse::<Uuid>()
            .map_err(|e| PeerError::InvalidBootstrap(format!("bad session id: {e}")))?;
        let port = port
            .parse::<u16>()
            .map_err(|e| PeerError::InvalidBootstrap(format!("bad callback port: {e}")))?;
        Ok(Self { session_id, port })
    }

    /// Open the guest-side interface over the channel the bootstrap selects.
    ///
    /// # Errors
    ///
    /// Connection failures in socket mode.
    pub fn open(
        self,
        event_loop: Arc<dyn EventLoop>,
        config: BridgeConfig,
    ) -> Result<MessagingBridge, PeerError> {
        self.open_with(event_loop, config, |_| {})
    }

    /// Like [`PeerBootstrap::open`], but runs `configure` before any message
    /// is accepted. Command handlers a peer registers here are guaranteed to
    /// be in place when the host's first call arrives.
    pub fn open_with(
        self,
        event_loop: Arc<dyn EventLoop>,
        config: BridgeConfig,
        configure: impl FnOnce(&MessagingBridge),
    ) -> Result<MessagingBridge, PeerError> {
        let channel: Arc<dyn MessageChannel> = if self.port == 0 {
            Arc::new(stdio::from_own_stdio(config.reset_threshold))
        } else {
            let addr = SocketAddr::from(([127, 0, 0, 1], self.port));
            Arc::new(SocketChannel::connect(
                addr,
                DEFAULT_ACCEPT_TIMEOUT,
                config.reset_threshold,
            )?)
        };
        Ok(MessagingBridge::open_with(
            Side::Guest,
            channel,
            event_loop,
            config,
            configure,
        ))
    }
}
