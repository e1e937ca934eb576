//! Observer and callback seams of an association.
//!
//! Observers are always invoked with the association's instance lock
//! released, so an implementation may call back into the association it is
//! observing (for example calling [`Association::start`] when it sees
//! [`AssociationState::Ready`]).

use tokio::sync::mpsc;
use tracing::trace;

use crate::{Association, AssociationId, AssociationState};

/// Receives wire packets produced by the engine for this association.
///
/// The packets must be carried to the peer by the datagram transport.
pub trait PacketOutHandler: Send + Sync {
    fn on_packet_out(&self, association: &Association, packet: &[u8]);
}

impl<F> PacketOutHandler for F
where
    F: Fn(&Association, &[u8]) + Send + Sync,
{
    fn on_packet_out(&self, association: &Association, packet: &[u8]) {
        self(association, packet)
    }
}

/// Receives application messages delivered by the engine.
pub trait PacketReceivedHandler: Send + Sync {
    fn on_packet_received(&self, association: &Association, data: &[u8], stream_id: u16, ppid: u32);
}

impl<F> PacketReceivedHandler for F
where
    F: Fn(&Association, &[u8], u16, u32) + Send + Sync,
{
    fn on_packet_received(&self, association: &Association, data: &[u8], stream_id: u16, ppid: u32) {
        self(association, data, stream_id, ppid)
    }
}

/// Observer of association state and signals
pub trait AssociationObserver: Send + Sync {
    /// The `state` property changed.
    fn on_state_changed(&self, _association: &Association, _state: AssociationState) {}

    /// The peer reset one of our incoming streams.
    fn on_stream_reset(&self, _association: &Association, _stream_id: u16) {}

    /// The peer restarted the association.
    fn on_association_restart(&self, _association: &Association) {}
}

/// Association events for channel-based observers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssociationEvent {
    StateChanged {
        association_id: AssociationId,
        state: AssociationState,
    },
    StreamReset {
        association_id: AssociationId,
        stream_id: u16,
    },
    AssociationRestart {
        association_id: AssociationId,
    },
}

impl AssociationObserver for mpsc::UnboundedSender<AssociationEvent> {
    fn on_state_changed(&self, association: &Association, state: AssociationState) {
        forward(self, AssociationEvent::StateChanged {
            association_id: association.id(),
            state,
        });
    }

    fn on_stream_reset(&self, association: &Association, stream_id: u16) {
        forward(self, AssociationEvent::StreamReset {
            association_id: association.id(),
            stream_id,
        });
    }

    fn on_association_restart(&self, association: &Association) {
        forward(self, AssociationEvent::AssociationRestart {
            association_id: association.id(),
        });
    }
}

fn forward(tx: &mpsc::UnboundedSender<AssociationEvent>, event: AssociationEvent) {
    if tx.send(event).is_err() {
        trace!("Association event receiver dropped");
    }
}
