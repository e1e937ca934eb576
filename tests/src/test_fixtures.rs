//! Test fixtures and configuration helpers
//!
//! An [`AssociationFixture`] owns a mock engine, a registry and one
//! association whose callbacks, observer signals and egress packets are all
//! captured for assertions.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use sctplink_assoc::mock::{wait_until, MockEngine};
use sctplink_assoc::{
    AssocChangeState, Association, AssociationEvent, AssociationId, AssociationRegistry,
    AssociationState, Notification, Upcall,
};
use sctplink_common::AssociationConfig;
use tokio::sync::mpsc;

use crate::DEFAULT_TEST_TIMEOUT;

/// Local SCTP port used by fixtures
pub const TEST_LOCAL_PORT: u16 = 5000;
/// Remote SCTP port used by fixtures
pub const TEST_REMOTE_PORT: u16 = 5001;

/// Message delivered to the packet-received callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub data: Bytes,
    pub stream_id: u16,
    pub ppid: u32,
}

/// Default association configuration for tests
pub fn test_config() -> AssociationConfig {
    AssociationConfig::new(TEST_LOCAL_PORT, TEST_REMOTE_PORT)
}

pub struct AssociationFixture {
    pub engine: Arc<MockEngine>,
    pub registry: Arc<AssociationRegistry>,
    pub association: Arc<Association>,
    pub events: mpsc::UnboundedReceiver<AssociationEvent>,
    pub received: Arc<Mutex<Vec<ReceivedMessage>>>,
    pub packets_out: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl AssociationFixture {
    /// Association in NEW with an event channel attached, nothing configured.
    pub fn new(id: AssociationId) -> Self {
        let engine = Arc::new(MockEngine::new());
        let registry = Arc::new(AssociationRegistry::new(engine.clone()));
        let association = registry.get(id);
        let (tx, events) = mpsc::unbounded_channel();
        association.set_event_sender(tx);

        Self {
            engine,
            registry,
            association,
            events,
            received: Arc::new(Mutex::new(Vec::new())),
            packets_out: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Association configured with `config` and capturing callbacks.
    pub fn with_config(id: AssociationId, config: &AssociationConfig) -> Self {
        let fixture = Self::new(id);
        fixture.register_callbacks();
        fixture
            .association
            .configure(config)
            .expect("configuration applies in NEW");
        fixture
    }

    /// Association promoted to READY with the default test ports.
    pub fn ready(id: AssociationId) -> Self {
        Self::with_config(id, &test_config())
    }

    pub fn register_callbacks(&self) {
        let packets_out = self.packets_out.clone();
        self.association
            .set_on_packet_out(move |_: &Association, packet: &[u8]| {
                packets_out.lock().push(packet.to_vec());
            });
        let received = self.received.clone();
        self.association.set_on_packet_received(
            move |_: &Association, data: &[u8], stream_id: u16, ppid: u32| {
                received.lock().push(ReceivedMessage {
                    data: Bytes::copy_from_slice(data),
                    stream_id,
                    ppid,
                });
            },
        );
    }

    pub fn id(&self) -> AssociationId {
        self.association.id()
    }

    /// Start and wait for the worker to issue its connect.
    pub fn start_and_wait_for_connect(&self) {
        self.association.start().expect("start from READY");
        self.wait_for_connect();
    }

    /// Wait for the worker of an already started association to connect.
    pub fn wait_for_connect(&self) {
        assert!(
            wait_until(DEFAULT_TEST_TIMEOUT, || self.association.is_connect_done()),
            "connection worker did not connect"
        );
    }

    pub fn deliver(&self, upcall: Upcall) {
        self.registry.receive(self.association.token(), upcall);
    }

    pub fn assoc_change(&self, state: AssocChangeState, assoc_id: u32) {
        self.deliver(Upcall::Notification(Notification::AssocChange { state, assoc_id }));
    }

    pub fn comm_up(&self, assoc_id: u32) {
        self.assoc_change(AssocChangeState::CommUp, assoc_id);
    }

    pub fn comm_lost(&self) {
        self.assoc_change(AssocChangeState::CommLost, 0);
    }

    /// Start, connect and deliver communication-up.
    pub fn connected(id: AssociationId, assoc_id: u32) -> Self {
        let fixture = Self::ready(id);
        fixture.start_and_wait_for_connect();
        fixture.comm_up(assoc_id);
        assert_eq!(fixture.association.state(), AssociationState::Connected);
        fixture
    }

    pub fn drain_events(&mut self) -> Vec<AssociationEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    /// State changes observed since the last drain
    pub fn state_changes(&mut self) -> Vec<AssociationState> {
        self.drain_events()
            .into_iter()
            .filter_map(|event| match event {
                AssociationEvent::StateChanged { state, .. } => Some(state),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_fixture() {
        let mut fixture = AssociationFixture::ready(1);
        assert_eq!(fixture.association.state(), AssociationState::Ready);
        assert_eq!(fixture.association.local_port(), TEST_LOCAL_PORT);
        assert_eq!(fixture.association.remote_port(), TEST_REMOTE_PORT);
        assert_eq!(fixture.state_changes(), vec![AssociationState::Ready]);
    }

    #[test]
    fn test_new_fixture_is_unconfigured() {
        let fixture = AssociationFixture::new(1);
        assert_eq!(fixture.association.state(), AssociationState::New);
        assert!(fixture.registry.contains(1));
    }
}
