//! Thread-safe session handle.
//!
//! A [`SessionHandle`] can be cloned freely and used from any thread. It never
//! touches the pipeline or the codec phase itself: while the session is
//! preparing, requests are parked in the outbound queue; once it is active they
//! are forwarded to the driver task over its command channel. Both paths keep
//! submission order.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::core::packet::Packet;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::phase::ProtocolPhase;
use crate::protocol::registry::PacketRegistry;
use crate::session::listener::PacketListener;
use crate::utils::crypto::KEY_LEN;
use crate::utils::metrics::Metrics;

/// Callback fired once a send is flushed to the socket, or with the error that
/// prevented it.
pub type Completion = Box<dyn FnOnce(Result<()>) + Send + 'static>;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Channel lifecycle, orthogonal to the protocol phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Created, transport not yet running; sends are queued
    Preparing,
    /// Driver running; sends go straight to the driver
    Active,
    /// Terminal
    Closed,
}

/// Work handed from a handle to the driver task.
pub(crate) enum Command {
    Send {
        packet: Box<dyn Packet>,
        on_complete: Option<Completion>,
    },
    SetPhase(ProtocolPhase),
    SetCompression(i32),
    EnableEncryption(Zeroizing<Vec<u8>>),
}

impl Command {
    /// Report a command that will never run.
    pub(crate) fn abandon(self) {
        if let Command::Send {
            on_complete: Some(callback),
            ..
        } = self
        {
            callback(Err(ProtocolError::ConnectionClosed));
        }
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Send { packet, .. } => write!(f, "Send({})", packet.type_name()),
            Command::SetPhase(phase) => write!(f, "SetPhase({phase})"),
            Command::SetCompression(threshold) => write!(f, "SetCompression({threshold})"),
            Command::EnableEncryption(_) => f.write_str("EnableEncryption"),
        }
    }
}

pub(crate) struct SessionState {
    pub(crate) lifecycle: Lifecycle,
    pub(crate) phase: ProtocolPhase,
    pub(crate) queue: VecDeque<Command>,
    pub(crate) disconnect_reason: Option<String>,
    pub(crate) last_keepalive_received: Instant,
    pub(crate) last_keepalive_sent: Instant,
    pub(crate) keepalive_token: Option<i32>,
}

struct Shared {
    id: u64,
    remote_addr: SocketAddr,
    registry: Arc<PacketRegistry>,
    listener: Arc<dyn PacketListener>,
    metrics: Arc<Metrics>,
    state: Mutex<SessionState>,
    ping_ms: AtomicU64,
    commands: mpsc::UnboundedSender<Command>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<Command>>>,
    cancel: CancellationToken,
}

/// Cloneable handle to one connection.
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<Shared>,
}

impl SessionHandle {
    /// Create a session in the `Preparing` state. It becomes active once a
    /// transport is attached.
    pub fn new(
        remote_addr: SocketAddr,
        registry: Arc<PacketRegistry>,
        listener: Arc<dyn PacketListener>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        let now = Instant::now();
        Self {
            shared: Arc::new(Shared {
                id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
                remote_addr,
                registry,
                listener,
                metrics,
                state: Mutex::new(SessionState {
                    lifecycle: Lifecycle::Preparing,
                    phase: ProtocolPhase::Handshake,
                    queue: VecDeque::new(),
                    disconnect_reason: None,
                    last_keepalive_received: now,
                    last_keepalive_sent: now,
                    keepalive_token: None,
                }),
                ping_ms: AtomicU64::new(0),
                commands,
                receiver: Mutex::new(Some(receiver)),
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.shared.remote_addr
    }

    pub fn registry(&self) -> &Arc<PacketRegistry> {
        &self.shared.registry
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.shared.state.lock().lifecycle
    }

    pub fn is_active(&self) -> bool {
        self.lifecycle() == Lifecycle::Active
    }

    pub fn is_closed(&self) -> bool {
        self.lifecycle() == Lifecycle::Closed
    }

    /// Phase the driver is currently encoding and decoding in.
    pub fn current_phase(&self) -> ProtocolPhase {
        self.shared.state.lock().phase
    }

    /// Last measured keepalive round trip.
    pub fn ping(&self) -> Duration {
        Duration::from_millis(self.shared.ping_ms.load(Ordering::Relaxed))
    }

    /// Why the session closed, once it has.
    pub fn disconnect_reason(&self) -> Option<String> {
        self.shared.state.lock().disconnect_reason.clone()
    }

    /// Number of requests parked while preparing
    pub fn queued(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    /// Queue `packet` for sending.
    ///
    /// # Errors
    /// Returns `ProtocolError::UnknownPacketType` right away if the packet was
    /// never registered. Everything else is reported to the session.
    pub fn send<P: Packet>(&self, packet: P) -> Result<()> {
        self.send_boxed(Box::new(packet), None)
    }

    /// Like [`send`](Self::send), calling `on_complete` once the frame is
    /// flushed or dropped.
    pub fn send_with<P, F>(&self, packet: P, on_complete: F) -> Result<()>
    where
        P: Packet,
        F: FnOnce(Result<()>) + Send + 'static,
    {
        self.send_boxed(Box::new(packet), Some(Box::new(on_complete)))
    }

    pub fn send_boxed(&self, packet: Box<dyn Packet>, on_complete: Option<Completion>) -> Result<()> {
        self.shared.registry.lookup_by_type(packet.as_ref())?;
        self.submit(Command::Send {
            packet,
            on_complete,
        });
        Ok(())
    }

    /// Switch the protocol phase at the next frame boundary.
    pub fn set_phase(&self, phase: ProtocolPhase) {
        self.submit(Command::SetPhase(phase));
    }

    /// Install, retune or (with a negative value) remove compression.
    pub fn set_compression_threshold(&self, threshold: i32) {
        self.submit(Command::SetCompression(threshold));
    }

    /// Turn on AES/CFB8 with the negotiated shared secret.
    ///
    /// # Errors
    /// Returns `ProtocolError::InvalidKeyLength` unless `key` is 16 bytes
    pub fn enable_encryption(&self, key: &[u8]) -> Result<()> {
        if key.len() != KEY_LEN {
            return Err(ProtocolError::InvalidKeyLength(key.len()));
        }
        self.submit(Command::EnableEncryption(Zeroizing::new(key.to_vec())));
        Ok(())
    }

    /// Close the session if nothing was heard from the peer for `timeout`.
    ///
    /// Returns whether the session is still alive.
    pub fn check_alive(&self, timeout: Duration) -> bool {
        let silent = {
            let state = self.shared.state.lock();
            if state.lifecycle == Lifecycle::Closed {
                return false;
            }
            state.last_keepalive_received.elapsed()
        };
        if silent > timeout {
            self.shared.metrics.keepalive_timeout();
            self.close(constants::REASON_TIMED_OUT, false);
            return false;
        }
        true
    }

    /// Close the session. Only the first call has any effect.
    ///
    /// Queued sends are dropped. The listener's `on_closed` runs unless
    /// `graceful` says the caller already handled the disconnect itself.
    /// Returns whether this call performed the close.
    pub fn close(&self, reason: impl Into<String>, graceful: bool) -> bool {
        let reason = reason.into();
        let dropped = {
            let mut state = self.shared.state.lock();
            if state.lifecycle == Lifecycle::Closed {
                return false;
            }
            state.lifecycle = Lifecycle::Closed;
            state.disconnect_reason = Some(reason.clone());
            std::mem::take(&mut state.queue)
        };

        info!(
            session = self.shared.id,
            peer = %self.shared.remote_addr,
            reason = %reason,
            "Session closed"
        );
        for command in dropped {
            command.abandon();
        }
        if !graceful {
            self.shared.listener.on_closed(self, &reason);
        }
        self.shared.cancel.cancel();
        true
    }

    /// Resolves once the session has been closed.
    pub async fn closed(&self) {
        self.shared.cancel.cancelled().await
    }

    fn submit(&self, command: Command) {
        let mut state = self.shared.state.lock();
        let lifecycle = state.lifecycle;
        match lifecycle {
            Lifecycle::Preparing => state.queue.push_back(command),
            Lifecycle::Active => {
                // sent under the lock so channel order matches call order
                if let Err(mpsc::error::SendError(command)) = self.shared.commands.send(command) {
                    drop(state);
                    debug!(session = self.shared.id, "{}", constants::ERR_DRIVER_GONE);
                    command.abandon();
                }
            }
            Lifecycle::Closed => {
                drop(state);
                debug!(session = self.shared.id, ?command, "Dropping request for closed session");
                command.abandon();
            }
        }
    }

    pub(crate) fn listener(&self) -> &Arc<dyn PacketListener> {
        &self.shared.listener
    }

    pub(crate) fn metrics(&self) -> &Arc<Metrics> {
        &self.shared.metrics
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.shared.cancel
    }

    pub(crate) fn take_receiver(&self) -> Option<mpsc::UnboundedReceiver<Command>> {
        self.shared.receiver.lock().take()
    }

    /// Mark the channel open and hand back everything queued so far, in order.
    pub(crate) fn activate(&self) -> Option<Vec<Command>> {
        let mut state = self.shared.state.lock();
        if state.lifecycle != Lifecycle::Preparing {
            return None;
        }
        state.lifecycle = Lifecycle::Active;
        Some(state.queue.drain(..).collect())
    }

    /// Record a phase change made by the driver and notify the listener.
    pub(crate) fn phase_entered(&self, phase: ProtocolPhase) {
        {
            let mut state = self.shared.state.lock();
            state.phase = phase;
            if phase == ProtocolPhase::Play {
                state.last_keepalive_received = Instant::now();
            }
        }
        debug!(session = self.shared.id, phase = %phase, "Entered protocol phase");
        self.shared.listener.on_phase_entered(self, phase);
    }

    pub(crate) fn keepalive_sent(&self, token: i32) {
        let mut state = self.shared.state.lock();
        state.last_keepalive_sent = Instant::now();
        state.keepalive_token = Some(token);
    }

    /// Record keepalive traffic from the peer. `answer` is the echoed token
    /// when this side sent the probe.
    pub(crate) fn keepalive_received(&self, answer: Option<i32>) {
        let mut state = self.shared.state.lock();
        let now = Instant::now();
        state.last_keepalive_received = now;
        if let Some(token) = answer {
            if state.keepalive_token == Some(token) {
                state.keepalive_token = None;
                let ping = now.duration_since(state.last_keepalive_sent);
                self.shared
                    .ping_ms
                    .store(ping.as_millis() as u64, Ordering::Relaxed);
            } else {
                debug!(session = self.shared.id, token, "Ignoring keepalive with unexpected token");
            }
        }
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.shared.id)
            .field("remote_addr", &self.shared.remote_addr)
            .field("lifecycle", &self.lifecycle())
            .finish()
    }
}
