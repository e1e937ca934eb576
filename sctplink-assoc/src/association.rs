//! SCTP association state machine and locking protocol.
//!
//! One [`Association`] is shared by three kinds of actors: the application
//! thread configuring and driving it, at most one connection worker, and the
//! engine's callback thread. All mutable state sits behind one instance lock,
//! which is only given up while observers are notified of a state change,
//! while the worker sleeps between bind attempts and while a worker is joined.

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Weak,
    },
    thread,
    time::Duration,
};

use parking_lot::{Mutex, MutexGuard, RwLock};
use sctplink_common::{log_sctp_packet, AssociationConfig, Direction};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::engine::{
    AssociationToken, EngineError, SctpEngine, SocketHandle, SocketMode, SocketOption,
    SUBSCRIBED_EVENTS,
};
use crate::error::{Result, SctpError};
use crate::observer::{AssociationEvent, AssociationObserver, PacketOutHandler, PacketReceivedHandler};
use crate::worker::ConnectionWorker;

/// Registry key of an association
pub type AssociationId = u32;

/// Interval between checks for a completed shutdown handshake
pub const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(10);
/// Number of shutdown checks before forcing the close (about one second)
pub const SHUTDOWN_POLL_ATTEMPTS: u32 = 100;

/// SCTP association state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssociationState {
    New,
    Ready,
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
    Error,
}

impl AssociationState {
    /// Whether `next` is an edge of the association transition graph.
    pub fn can_transition_to(self, next: AssociationState) -> bool {
        use AssociationState::*;
        matches!(
            (self, next),
            (New, Ready)
                | (Ready, Connecting)
                | (Ready, Error)
                | (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Disconnecting)
                | (Connected, Disconnecting)
                | (Disconnecting, Disconnected)
        )
    }
}

impl fmt::Display for AssociationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AssociationState::New => "state-new",
            AssociationState::Ready => "state-ready",
            AssociationState::Connecting => "state-connecting",
            AssociationState::Connected => "state-connected",
            AssociationState::Disconnecting => "state-disconnecting",
            AssociationState::Disconnected => "state-disconnected",
            AssociationState::Error => "state-error",
        };
        f.write_str(name)
    }
}

/// State guarded by the instance lock
pub(crate) struct AssociationInner {
    pub(crate) state: AssociationState,
    pub(crate) local_port: u16,
    pub(crate) remote_port: u16,
    pub(crate) use_sock_stream: bool,
    pub(crate) debug_sctp: bool,
    pub(crate) aggressive_heartbeat: bool,
    /// Only `Some` while connecting, connected or disconnecting.
    pub(crate) socket: Option<SocketHandle>,
    pub(crate) engine_assoc_id: u32,
    pub(crate) worker: Option<ConnectionWorker>,
    /// Set while one thread has released the lock to join the worker.
    teardown_in_progress: bool,
}

pub(crate) type InnerGuard<'a> = MutexGuard<'a, AssociationInner>;

#[derive(Default)]
pub(crate) struct Callbacks {
    pub(crate) packet_out: Option<Arc<dyn PacketOutHandler>>,
    pub(crate) packet_received: Option<Arc<dyn PacketReceivedHandler>>,
}

impl Callbacks {
    fn is_complete(&self) -> bool {
        self.packet_out.is_some() && self.packet_received.is_some()
    }
}

/// One logical SCTP association.
///
/// Obtained from [`AssociationRegistry::get`](crate::AssociationRegistry::get).
/// The association promotes itself from [`AssociationState::New`] to
/// [`AssociationState::Ready`] as soon as both ports are non-zero and both
/// callbacks are registered.
pub struct Association {
    id: AssociationId,
    token: AssociationToken,
    this: Weak<Association>,
    pub(crate) engine: Arc<dyn SctpEngine>,
    pub(crate) inner: Mutex<AssociationInner>,
    pub(crate) callbacks: RwLock<Callbacks>,
    observers: RwLock<Vec<Arc<dyn AssociationObserver>>>,
    /// Inbound wire packets are only fed to the engine once our own connect
    /// has been issued.
    pub(crate) done_connect: AtomicBool,
    pub(crate) shutdown_observed: AtomicBool,
}

impl Association {
    pub(crate) fn new(
        id: AssociationId,
        token: AssociationToken,
        engine: Arc<dyn SctpEngine>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            id,
            token,
            this: this.clone(),
            engine,
            inner: Mutex::new(AssociationInner {
                state: AssociationState::New,
                local_port: 0,
                remote_port: 0,
                use_sock_stream: false,
                debug_sctp: false,
                aggressive_heartbeat: false,
                socket: None,
                engine_assoc_id: 0,
                worker: None,
                teardown_in_progress: false,
            }),
            callbacks: RwLock::new(Callbacks::default()),
            observers: RwLock::new(Vec::new()),
            done_connect: AtomicBool::new(false),
            shutdown_observed: AtomicBool::new(false),
        })
    }

    // Accessor methods

    pub fn id(&self) -> AssociationId {
        self.id
    }

    /// Identity this instance is known by inside the engine
    pub fn token(&self) -> AssociationToken {
        self.token
    }

    /// Get the current state
    pub fn state(&self) -> AssociationState {
        self.inner.lock().state
    }

    pub fn local_port(&self) -> u16 {
        self.inner.lock().local_port
    }

    pub fn remote_port(&self) -> u16 {
        self.inner.lock().remote_port
    }

    pub fn use_sock_stream(&self) -> bool {
        self.inner.lock().use_sock_stream
    }

    pub fn debug_sctp(&self) -> bool {
        self.inner.lock().debug_sctp
    }

    pub fn aggressive_heartbeat(&self) -> bool {
        self.inner.lock().aggressive_heartbeat
    }

    /// Association id assigned by the engine, 0 until connected
    pub fn engine_assoc_id(&self) -> u32 {
        self.inner.lock().engine_assoc_id
    }

    pub fn socket(&self) -> Option<SocketHandle> {
        self.inner.lock().socket
    }

    /// Whether a connection worker is still waiting to be joined
    pub fn has_worker(&self) -> bool {
        self.inner.lock().worker.is_some()
    }

    /// Whether the outbound connect has been issued
    pub fn is_connect_done(&self) -> bool {
        self.done_connect.load(Ordering::Acquire)
    }

    // Configuration

    /// Set the local port. Only allowed in [`AssociationState::New`].
    pub fn set_local_port(&self, port: u16) -> Result<()> {
        self.update_while_new("local-port", |inner| inner.local_port = port)
    }

    /// Set the remote port. Only allowed in [`AssociationState::New`].
    pub fn set_remote_port(&self, port: u16) -> Result<()> {
        self.update_while_new("remote-port", |inner| inner.remote_port = port)
    }

    /// Select stream (`true`) or message-preserving (`false`) sockets for the
    /// lifetime of the association. Only allowed in [`AssociationState::New`].
    pub fn set_use_sock_stream(&self, use_sock_stream: bool) -> Result<()> {
        self.update_while_new("use-sock-stream", |inner| inner.use_sock_stream = use_sock_stream)
    }

    /// Engine debug output, pushed to the engine when the socket is created.
    pub fn set_debug_sctp(&self, debug_sctp: bool) {
        self.inner.lock().debug_sctp = debug_sctp;
    }

    /// Heartbeat every 10 ms with a single retransmission, applied when the
    /// association comes up.
    pub fn set_aggressive_heartbeat(&self, aggressive_heartbeat: bool) {
        self.inner.lock().aggressive_heartbeat = aggressive_heartbeat;
    }

    /// Apply a complete configuration record. Only allowed in
    /// [`AssociationState::New`]; a rejected record changes nothing.
    pub fn configure(&self, config: &AssociationConfig) -> Result<()> {
        self.update_while_new("configuration", |inner| {
            inner.local_port = config.local_port;
            inner.remote_port = config.remote_port;
            inner.use_sock_stream = config.use_sock_stream;
            inner.debug_sctp = config.debug_sctp;
            inner.aggressive_heartbeat = config.aggressive_heartbeat;
        })
    }

    /// Register the handler for wire packets leaving through the transport.
    pub fn set_on_packet_out<H: PacketOutHandler + 'static>(&self, handler: H) {
        self.callbacks.write().packet_out = Some(Arc::new(handler));
        self.maybe_set_ready();
    }

    /// Register the handler for application messages.
    pub fn set_on_packet_received<H: PacketReceivedHandler + 'static>(&self, handler: H) {
        self.callbacks.write().packet_received = Some(Arc::new(handler));
        self.maybe_set_ready();
    }

    pub fn add_observer(&self, observer: Arc<dyn AssociationObserver>) {
        self.observers.write().push(observer);
    }

    /// Set the event sender for receiving association events
    pub fn set_event_sender(&self, tx: mpsc::UnboundedSender<AssociationEvent>) {
        self.add_observer(Arc::new(tx));
    }

    fn update_while_new(&self, property: &str, update: impl FnOnce(&mut AssociationInner)) -> Result<()> {
        {
            let mut inner = self.inner.lock();
            if inner.state != AssociationState::New {
                warn!(
                    association_id = self.id,
                    state = %inner.state,
                    "{} cannot be set in this state",
                    property
                );
                return Err(SctpError::Configuration(format!(
                    "{property} cannot be set in {}",
                    inner.state
                )));
            }
            update(&mut inner);
        }
        self.maybe_set_ready();
        Ok(())
    }

    fn maybe_set_ready(&self) {
        let mut inner = self.inner.lock();
        let callbacks_complete = self.callbacks.read().is_complete();
        if inner.state == AssociationState::New
            && inner.local_port != 0
            && inner.remote_port != 0
            && callbacks_complete
        {
            self.change_state(&mut inner, AssociationState::Ready);
        }
    }

    // Lifecycle

    /// Create the socket and launch the outbound connection attempt.
    ///
    /// Only valid from [`AssociationState::Ready`] or
    /// [`AssociationState::Disconnected`].
    pub fn start(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if !matches!(inner.state, AssociationState::Ready | AssociationState::Disconnected) {
            warn!(
                association_id = self.id,
                state = %inner.state,
                "SCTP association is in wrong state and cannot be started"
            );
            return Err(SctpError::InvalidState(format!("cannot start from {}", inner.state)));
        }

        let socket = match self.create_socket(&inner) {
            Ok(socket) => socket,
            Err(e) => {
                if inner.state == AssociationState::Ready {
                    self.change_state(&mut inner, AssociationState::Error);
                }
                return Err(SctpError::SocketCreation(e));
            }
        };
        inner.socket = Some(socket);
        self.change_state(&mut inner, AssociationState::Connecting);

        // An observer may already have torn the attempt down.
        if inner.state != AssociationState::Connecting || inner.socket != Some(socket) {
            debug!(association_id = self.id, "Association left connecting before the worker started");
            return Ok(());
        }

        let Some(this) = self.this.upgrade() else {
            return Err(SctpError::InvalidState("association is being destroyed".into()));
        };
        debug_assert!(inner.worker.is_none());
        match ConnectionWorker::spawn(this) {
            Ok(worker) => {
                inner.worker = Some(worker);
                Ok(())
            }
            Err(e) => {
                warn!(association_id = self.id, error = %e, "Could not spawn connection worker");
                self.disconnect_locked(&mut inner, false);
                Err(SctpError::WorkerSpawn(e))
            }
        }
    }

    fn create_socket(&self, inner: &AssociationInner) -> std::result::Result<SocketHandle, EngineError> {
        self.engine.set_debug(inner.debug_sctp);

        let mode = if inner.use_sock_stream { SocketMode::Stream } else { SocketMode::SeqPacket };
        let socket = self.engine.socket(self.token, mode).map_err(|e| {
            warn!(association_id = self.id, error = %e, "Could not create socket");
            e
        })?;

        let required = [
            (SocketOption::NonBlocking(true), "non-blocking mode"),
            (SocketOption::Linger { enabled: true, seconds: 0 }, "SO_LINGER"),
            (SocketOption::NoDelay(true), "SCTP_NODELAY"),
            (SocketOption::EnableStreamReset, "SCTP_ENABLE_STREAM_RESET"),
        ];
        for (option, name) in required {
            if let Err(e) = self.engine.set_option(socket, option) {
                warn!(association_id = self.id, error = %e, "Could not set {} on SCTP socket", name);
                self.engine.close(socket);
                return Err(e);
            }
        }

        for event in SUBSCRIBED_EVENTS {
            if let Err(e) = self.engine.set_option(socket, SocketOption::Subscribe(event)) {
                warn!(association_id = self.id, error = %e, "Failed to register event {:?}", event);
            }
        }

        debug!(association_id = self.id, %socket, ?mode, "Created SCTP socket");
        Ok(socket)
    }

    /// Disconnect, attempting the shutdown handshake first in stream mode.
    pub fn disconnect(&self) {
        let mut inner = self.inner.lock();
        self.disconnect_locked(&mut inner, true);
    }

    /// Close the socket immediately without a state change.
    pub fn force_close(&self) {
        let mut inner = self.inner.lock();
        self.force_close_locked(&mut inner);
    }

    pub(crate) fn disconnect_locked(&self, inner: &mut InnerGuard<'_>, try_shutdown: bool) {
        match inner.state {
            AssociationState::Connected => {
                self.change_state(inner, AssociationState::Disconnecting);
                if try_shutdown && inner.state == AssociationState::Disconnecting && inner.use_sock_stream {
                    if let Some(socket) = inner.socket {
                        self.wait_for_shutdown(socket);
                    }
                }
            }
            AssociationState::Connecting => {
                self.change_state(inner, AssociationState::Disconnecting);
            }
            _ => {}
        }

        if inner.state == AssociationState::Disconnecting {
            self.teardown_locked(inner);
        }
    }

    /// Best-effort wait for the engine to report a completed shutdown.
    /// Runs with the instance lock held; the flag is set lock-free.
    fn wait_for_shutdown(&self, socket: SocketHandle) {
        info!(association_id = self.id, "SCTP association shutting down");
        self.shutdown_observed.store(false, Ordering::Release);
        if let Err(e) = self.engine.shutdown(socket) {
            debug!(association_id = self.id, error = %e, "Shutdown request failed");
            return;
        }

        let mut remaining = SHUTDOWN_POLL_ATTEMPTS;
        while !self.shutdown_observed.load(Ordering::Acquire) && remaining > 0 {
            thread::sleep(SHUTDOWN_POLL_INTERVAL);
            remaining -= 1;
        }
        if remaining == 0 {
            debug!(association_id = self.id, "Shutdown not confirmed, forcing close");
        }
        self.shutdown_observed.store(false, Ordering::Release);
    }

    fn teardown_locked(&self, inner: &mut InnerGuard<'_>) {
        if inner.teardown_in_progress {
            return;
        }

        if let Some(worker) = inner.worker.take() {
            inner.teardown_in_progress = true;
            MutexGuard::unlocked(inner, || worker.join());
            inner.teardown_in_progress = false;
        }

        self.force_close_locked(inner);
        self.change_state(inner, AssociationState::Disconnected);
        info!(association_id = self.id, "SCTP association disconnected");
    }

    fn force_close_locked(&self, inner: &mut AssociationInner) {
        if let Some(socket) = inner.socket.take() {
            self.engine.close(socket);
            debug!(association_id = self.id, %socket, "Closed SCTP socket");
        }
        self.done_connect.store(false, Ordering::Release);
        inner.engine_assoc_id = 0;
    }

    /// Final teardown once the registry has dropped the association.
    pub(crate) fn destroy(&self) {
        let mut inner = self.inner.lock();
        if let Some(worker) = inner.worker.take() {
            MutexGuard::unlocked(&mut inner, || worker.join());
        }
        self.force_close_locked(&mut inner);
    }

    /// The single state-transition routine. Observers run with the lock
    /// released, so callers must re-check state afterwards.
    pub(crate) fn change_state(&self, inner: &mut InnerGuard<'_>, new_state: AssociationState) {
        let old_state = inner.state;
        debug_assert!(
            old_state.can_transition_to(new_state),
            "illegal transition {old_state} -> {new_state}"
        );
        inner.state = new_state;
        debug!(association_id = self.id, from = %old_state, to = %new_state, "Association state changed");

        let observers = self.observers.read().clone();
        MutexGuard::unlocked(inner, || {
            for observer in &observers {
                observer.on_state_changed(self, new_state);
            }
        });
    }

    // Transport

    /// Feed a wire packet received from the datagram transport.
    ///
    /// Packets arriving before our own connect has been issued are dropped:
    /// answering a simultaneous INIT from the peer at that point would abort
    /// the peer's attempt, so we rely on our outbound INIT instead.
    pub fn incoming_packet(&self, packet: &[u8]) {
        if self.done_connect.load(Ordering::Acquire) {
            log_sctp_packet(Direction::Rx, self.id, packet);
            self.engine.conn_input(self.token, packet);
        } else {
            info!(
                association_id = self.id,
                len = packet.len(),
                "Discarding inbound packet before SCTP fully configured"
            );
        }
    }

    pub(crate) fn emit_packet_out(&self, packet: &[u8]) {
        let handler = self.callbacks.read().packet_out.clone();
        if let Some(handler) = handler {
            log_sctp_packet(Direction::Tx, self.id, packet);
            handler.on_packet_out(self, packet);
        }
    }

    pub(crate) fn emit_stream_reset(&self, stream_id: u16) {
        let observers = self.observers.read().clone();
        for observer in &observers {
            observer.on_stream_reset(self, stream_id);
        }
    }

    pub(crate) fn emit_association_restart(&self) {
        let observers = self.observers.read().clone();
        for observer in &observers {
            observer.on_association_restart(self);
        }
    }
}

impl fmt::Debug for Association {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Association")
            .field("id", &self.id)
            .field("token", &self.token)
            .finish_non_exhaustive()
    }
}
