//! The SCTP engine capability consumed by associations.
//!
//! The engine owns everything protocol-level (chunking, retransmission,
//! congestion control, checksums). Associations drive it through socket-like
//! primitives and receive its output through
//! [`AssociationRegistry::receive`](crate::AssociationRegistry::receive) and
//! [`AssociationRegistry::packet_out`](crate::AssociationRegistry::packet_out),
//! both keyed by the [`AssociationToken`] the association was registered
//! with.

use std::{fmt, io};

use thiserror::Error;

/// Errors reported by engine primitives
#[derive(Debug, Error)]
pub enum EngineError {
    /// The local endpoint is still held by a previous association.
    #[error("address already in use")]
    AddrInUse,
    /// A non-blocking connect has been started.
    #[error("operation now in progress")]
    InProgress,
    /// The send buffer is full; retry later.
    #[error("operation would block")]
    WouldBlock,
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Opaque socket handle issued by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketHandle(pub u64);

impl fmt::Display for SocketHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sock#{}", self.0)
    }
}

/// Engine-side identity of one association instance.
///
/// Tokens are never reused, so an upcall the engine emits late for an
/// association that has since been destroyed cannot reach a newer
/// association created under the same [`AssociationId`](crate::AssociationId).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssociationToken(pub u64);

impl fmt::Display for AssociationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "assoc#{}", self.0)
    }
}

/// Engine-wide settings applied when the first association is created
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    /// Explicit congestion notification
    pub ecn_enabled: bool,
    /// Outgoing streams offered on new associations
    pub default_outgoing_streams: u16,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            ecn_enabled: false,
            default_outgoing_streams: DEFAULT_OUTGOING_STREAMS,
        }
    }
}

/// Stream count requested from the engine unless configured otherwise
pub const DEFAULT_OUTGOING_STREAMS: u16 = 65535;

/// Socket type requested at creation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketMode {
    /// Sequenced, reliable, connection-based byte stream
    Stream,
    /// Message-preserving, supports partial reliability
    SeqPacket,
}

/// Endpoint address for an engine that is fed packets by its caller rather
/// than doing network I/O (the `AF_CONN` family).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnAddr {
    pub association: AssociationToken,
    pub port: u16,
}

impl ConnAddr {
    pub fn new(association: AssociationToken, port: u16) -> Self {
        Self { association, port }
    }
}

impl fmt::Display for ConnAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn:{}:{}", self.association, self.port)
    }
}

/// Engine notification kinds an association can subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    AssocChange,
    PeerAddrChange,
    RemoteError,
    SendFailed,
    ShutdownEvent,
    AdaptationIndication,
    StreamReset,
    StreamChange,
}

/// Event types every association socket subscribes to.
pub const SUBSCRIBED_EVENTS: [EventType; 8] = [
    EventType::AssocChange,
    EventType::PeerAddrChange,
    EventType::RemoteError,
    EventType::SendFailed,
    EventType::ShutdownEvent,
    EventType::AdaptationIndication,
    EventType::StreamReset,
    EventType::StreamChange,
];

/// Socket options understood by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketOption {
    NonBlocking(bool),
    Linger { enabled: bool, seconds: u32 },
    NoDelay(bool),
    /// Allow stream resets on every association of the socket.
    EnableStreamReset,
    Subscribe(EventType),
    /// Association parameters; only the retransmission ceiling is used.
    AssocInfo { assoc_id: u32, max_retransmissions: u16 },
    /// Peer address parameters; only heartbeat settings are used.
    PeerAddrParams {
        address: ConnAddr,
        heartbeat_enabled: bool,
        heartbeat_interval_ms: u32,
    },
    /// Request an outgoing reset of the listed streams.
    ResetStreams { assoc_id: u32, streams: Vec<u16> },
}

/// Partial reliability policy for one message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PartialReliability {
    /// Fully reliable
    #[default]
    None,
    /// Abandon after the given lifetime in milliseconds
    Ttl(u32),
    /// Abandon after the given number of retransmissions
    Rtx(u32),
    /// Abandon when the send buffer exceeds the given size
    Buf(u32),
}

impl PartialReliability {
    /// The numeric policy parameter, `None` for reliable delivery.
    pub fn value(&self) -> Option<u32> {
        match *self {
            PartialReliability::None => None,
            PartialReliability::Ttl(v) | PartialReliability::Rtx(v) | PartialReliability::Buf(v) => {
                Some(v)
            }
        }
    }
}

/// Per-message send descriptor. Values are host byte order; encoding is the
/// engine's business.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendInfo {
    pub stream_id: u16,
    pub ppid: u32,
    pub unordered: bool,
    pub reliability: PartialReliability,
}

/// Socket-like primitives of an embeddable SCTP engine.
///
/// Implementations are called from several threads. Packet egress may be
/// delivered synchronously from any primitive. Notifications and messages
/// may only be delivered synchronously from [`SctpEngine::conn_input`] or
/// from the engine's own threads: every other primitive is called with the
/// association's instance lock held.
pub trait SctpEngine: Send + Sync {
    /// Called when the first association is created.
    fn init(&self, _settings: &EngineSettings) {}

    /// Called when the last association is destroyed.
    fn finish(&self) {}

    /// Upcalls for `association` are routed by this token from now on.
    fn register_address(&self, _association: AssociationToken) {}

    /// After this returns the engine must not emit upcalls for `association`.
    fn deregister_address(&self, _association: AssociationToken) {}

    /// Toggle engine-wide debug logging.
    fn set_debug(&self, _enabled: bool) {}

    fn socket(&self, association: AssociationToken, mode: SocketMode) -> Result<SocketHandle, EngineError>;

    fn set_option(&self, socket: SocketHandle, option: SocketOption) -> Result<(), EngineError>;

    fn bind(&self, socket: SocketHandle, local: ConnAddr) -> Result<(), EngineError>;

    /// Non-blocking connect; `Err(EngineError::InProgress)` is the usual answer.
    fn connect(&self, socket: SocketHandle, remote: ConnAddr) -> Result<(), EngineError>;

    fn send(
        &self,
        socket: SocketHandle,
        data: &[u8],
        remote: ConnAddr,
        info: &SendInfo,
    ) -> Result<usize, EngineError>;

    /// Begin the orderly shutdown handshake.
    fn shutdown(&self, socket: SocketHandle) -> Result<(), EngineError>;

    fn close(&self, socket: SocketHandle);

    /// Feed a wire packet received from the datagram transport.
    fn conn_input(&self, association: AssociationToken, packet: &[u8]);
}
