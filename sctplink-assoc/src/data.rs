//! Outbound message submission, stream resets and inbound dispatch.

use tracing::{debug, info, trace};

use crate::engine::{ConnAddr, EngineError, PartialReliability, SendInfo, SocketOption};
use crate::error::{Result, SctpError};
use crate::{Association, AssociationState};

/// Outcome of a send that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The engine accepted this many bytes.
    Sent(usize),
    /// The send buffer is full. The caller keeps the message and retries.
    WouldBlock,
}

impl Association {
    /// Send one message on `stream_id`.
    ///
    /// Fails with [`SctpError::InvalidState`] unless connected; the engine is
    /// not touched in that case. Other engine failures are reported as
    /// [`SctpError::Send`] and leave the association state alone.
    pub fn send_data(
        &self,
        data: &[u8],
        stream_id: u16,
        ppid: u32,
        ordered: bool,
        reliability: PartialReliability,
    ) -> Result<SendOutcome> {
        let inner = self.inner.lock();
        let socket = match (inner.state, inner.socket) {
            (AssociationState::Connected, Some(socket)) => socket,
            (state, _) => {
                return Err(SctpError::InvalidState(format!("cannot send in {state}")));
            }
        };

        let info = SendInfo {
            stream_id,
            ppid,
            unordered: !ordered,
            reliability,
        };
        let remote = ConnAddr::new(self.token(), inner.remote_port);
        match self.engine.send(socket, data, remote, &info) {
            Ok(sent) => {
                trace!(association_id = self.id(), stream_id, ppid, sent, "Queued message");
                Ok(SendOutcome::Sent(sent))
            }
            Err(EngineError::WouldBlock) => {
                debug!(association_id = self.id(), stream_id, "Send buffer full");
                Ok(SendOutcome::WouldBlock)
            }
            Err(e) => {
                info!(association_id = self.id(), stream_id, error = %e, "Error sending data");
                Err(SctpError::Send { stream_id, source: e })
            }
        }
    }

    /// Request an outgoing reset of one stream. A no-op unless connected.
    pub fn reset_stream(&self, stream_id: u16) {
        let inner = self.inner.lock();
        let request = SocketOption::ResetStreams {
            assoc_id: inner.engine_assoc_id,
            streams: vec![stream_id],
        };

        let socket = match (inner.state, inner.socket) {
            (AssociationState::Connected, Some(socket)) => socket,
            (state, _) => {
                debug!(association_id = self.id(), stream_id, %state, "Not connected, dropping stream reset");
                return;
            }
        };
        if let Err(e) = self.engine.set_option(socket, request) {
            info!(association_id = self.id(), stream_id, error = %e, "Resetting stream failed");
        }
    }

    /// Hand an inbound message to the receive callback. No buffering.
    pub(crate) fn dispatch_message(&self, data: &[u8], stream_id: u16, ppid: u32) {
        let handler = self.callbacks.read().packet_received.clone();
        match handler {
            Some(handler) => handler.on_packet_received(self, data, stream_id, ppid),
            None => debug!(association_id = self.id(), stream_id, "No receiver, dropping message"),
        }
    }
}
