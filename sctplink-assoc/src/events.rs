//! Translation of engine upcalls into association state changes and signals.
//!
//! Everything here runs on the engine's callback thread, after the registry
//! has confirmed the target association is still alive.

use std::sync::atomic::Ordering;

use bytes::Bytes;
use tracing::{info, warn};

use crate::association::AssociationInner;
use crate::engine::{ConnAddr, SocketOption};
use crate::{Association, AssociationState};

/// Peer heartbeat interval applied by aggressive heartbeat
pub const AGGRESSIVE_HEARTBEAT_INTERVAL_MS: u32 = 10;
/// Association retransmission ceiling applied by aggressive heartbeat
pub const AGGRESSIVE_MAX_RETRANSMISSIONS: u16 = 1;

/// `sac_state` of an association-change notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssocChangeState {
    CommUp,
    CommLost,
    Restart,
    ShutdownComplete,
    CantStartAssoc,
}

/// Flags of a stream reset notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamResetFlags(pub u16);

impl StreamResetFlags {
    pub const INCOMING_SSN: StreamResetFlags = StreamResetFlags(0x0001);
    pub const OUTGOING_SSN: StreamResetFlags = StreamResetFlags(0x0002);
    pub const DENIED: StreamResetFlags = StreamResetFlags(0x0004);
    pub const FAILED: StreamResetFlags = StreamResetFlags(0x0008);

    pub fn contains(self, other: StreamResetFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for StreamResetFlags {
    type Output = StreamResetFlags;

    fn bitor(self, rhs: StreamResetFlags) -> StreamResetFlags {
        StreamResetFlags(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamResetEvent {
    pub flags: StreamResetFlags,
    pub streams: Vec<u16>,
}

/// Engine notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    AssocChange { state: AssocChangeState, assoc_id: u32 },
    PeerAddrChange,
    RemoteError,
    SendFailed,
    ShutdownEvent,
    AdaptationIndication,
    PartialDelivery,
    Authentication,
    StreamReset(StreamResetEvent),
    SenderDry,
    NotificationsStopped,
    AssocReset,
    StreamChange,
    SendFailedEvent,
}

impl Notification {
    pub fn name(&self) -> &'static str {
        match self {
            Notification::AssocChange { .. } => "SCTP_ASSOC_CHANGE",
            Notification::PeerAddrChange => "SCTP_PEER_ADDR_CHANGE",
            Notification::RemoteError => "SCTP_REMOTE_ERROR",
            Notification::SendFailed => "SCTP_SEND_FAILED",
            Notification::ShutdownEvent => "SCTP_SHUTDOWN_EVENT",
            Notification::AdaptationIndication => "SCTP_ADAPTATION_INDICATION",
            Notification::PartialDelivery => "SCTP_PARTIAL_DELIVERY_EVENT",
            Notification::Authentication => "SCTP_AUTHENTICATION_EVENT",
            Notification::StreamReset(_) => "SCTP_STREAM_RESET_EVENT",
            Notification::SenderDry => "SCTP_SENDER_DRY_EVENT",
            Notification::NotificationsStopped => "SCTP_NOTIFICATIONS_STOPPED_EVENT",
            Notification::AssocReset => "SCTP_ASSOC_RESET_EVENT",
            Notification::StreamChange => "SCTP_STREAM_CHANGE_EVENT",
            Notification::SendFailedEvent => "SCTP_SEND_FAILED_EVENT",
        }
    }
}

/// One delivery from the engine's receive callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Upcall {
    /// Delivery without payload: the shutdown handshake has completed.
    ShutdownComplete,
    Notification(Notification),
    /// Application message
    Message { data: Bytes, stream_id: u16, ppid: u32 },
}

pub(crate) fn handle_upcall(association: &Association, upcall: Upcall) {
    match upcall {
        Upcall::ShutdownComplete => {
            info!(association_id = association.id(), "Received shutdown complete notification");
            association.shutdown_observed.store(true, Ordering::Release);
        }
        Upcall::Notification(notification) => handle_notification(association, notification),
        Upcall::Message { data, stream_id, ppid } => {
            association.dispatch_message(&data, stream_id, ppid);
        }
    }
}

fn handle_notification(association: &Association, notification: Notification) {
    info!(association_id = association.id(), "Event: {}", notification.name());
    match notification {
        Notification::AssocChange { state, assoc_id } => {
            handle_association_changed(association, state, assoc_id);
        }
        Notification::StreamReset(event) => handle_stream_reset(association, &event),
        _ => {}
    }
}

fn handle_association_changed(association: &Association, state: AssocChangeState, assoc_id: u32) {
    match state {
        AssocChangeState::CommUp => handle_comm_up(association, assoc_id),
        // ShutdownComplete also arrives in stream mode when the far end shuts down.
        AssocChangeState::CommLost | AssocChangeState::ShutdownComplete => {
            info!(association_id = association.id(), ?state, "SCTP association lost");
            let mut inner = association.inner.lock();
            association.disconnect_locked(&mut inner, false);
        }
        AssocChangeState::Restart => {
            info!(association_id = association.id(), "SCTP event SCTP_RESTART received");
            association.emit_association_restart();
        }
        AssocChangeState::CantStartAssoc => {
            info!(association_id = association.id(), "SCTP event SCTP_CANT_STR_ASSOC received");
        }
    }
}

fn handle_comm_up(association: &Association, assoc_id: u32) {
    let mut inner = association.inner.lock();
    match inner.state {
        AssociationState::Connecting => {
            inner.engine_assoc_id = assoc_id;
            apply_aggressive_heartbeat(association, &inner);
            association.change_state(&mut inner, AssociationState::Connected);
            info!(association_id = association.id(), assoc_id, "SCTP association connected");
        }
        AssociationState::Connected => {
            info!(association_id = association.id(), "SCTP association already open");
        }
        state => {
            info!(association_id = association.id(), %state, "SCTP association in unexpected state");
        }
    }
}

fn apply_aggressive_heartbeat(association: &Association, inner: &AssociationInner) {
    if !inner.aggressive_heartbeat {
        return;
    }
    let Some(socket) = inner.socket else {
        return;
    };

    let assoc_info = SocketOption::AssocInfo {
        assoc_id: inner.engine_assoc_id,
        max_retransmissions: AGGRESSIVE_MAX_RETRANSMISSIONS,
    };
    if let Err(e) = association.engine.set_option(socket, assoc_info) {
        warn!(association_id = association.id(), error = %e, "Could not set SCTP_ASSOCINFO");
    }

    let peer_params = SocketOption::PeerAddrParams {
        address: ConnAddr::new(association.token(), inner.remote_port),
        heartbeat_enabled: true,
        heartbeat_interval_ms: AGGRESSIVE_HEARTBEAT_INTERVAL_MS,
    };
    if let Err(e) = association.engine.set_option(socket, peer_params) {
        warn!(association_id = association.id(), error = %e, "Could not set SCTP_PEER_ADDR_PARAMS");
    }
}

fn handle_stream_reset(association: &Association, event: &StreamResetEvent) {
    if event.flags.contains(StreamResetFlags::DENIED) {
        return;
    }
    if !event.flags.contains(StreamResetFlags::INCOMING_SSN) {
        return;
    }
    for &stream_id in &event.streams {
        association.emit_stream_reset(stream_id);
    }
}
