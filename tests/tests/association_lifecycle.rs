//! Association lifecycle integration tests
//!
//! Drives associations through configure, start, connect, send, disconnect
//! and restart against the mock engine.

use std::sync::Arc;

use bytes::Bytes;
use integration_tests::{
    init_test_logging, wait_for_condition, AssociationFixture, ReceivedMessage,
    DEFAULT_POLL_INTERVAL, DEFAULT_TEST_TIMEOUT, TEST_LOCAL_PORT, TEST_REMOTE_PORT,
};
use parking_lot::Mutex;
use sctplink_assoc::mock::EngineCall;
use sctplink_assoc::{
    Association, AssociationEvent, AssociationObserver, AssociationState, ConnAddr,
    PartialReliability, SctpError, SendOutcome, SocketMode, Upcall,
};

#[test]
fn test_connect_send_disconnect() {
    init_test_logging();

    let mut fixture = AssociationFixture::ready(1);
    let assoc = fixture.association.clone();
    assert_eq!(assoc.state(), AssociationState::Ready);

    assoc.start().expect("start from READY");
    assert_eq!(assoc.state(), AssociationState::Connecting);
    let socket = assoc.socket().expect("socket while connecting");
    assert!(assoc.has_worker());

    fixture.wait_for_connect();
    let calls = fixture.engine.calls();
    assert!(calls.contains(&EngineCall::Bind {
        socket,
        local: ConnAddr::new(assoc.token(), TEST_LOCAL_PORT),
    }));
    assert!(calls.contains(&EngineCall::Connect {
        socket,
        remote: ConnAddr::new(assoc.token(), TEST_REMOTE_PORT),
    }));

    fixture.comm_up(42);
    assert_eq!(assoc.state(), AssociationState::Connected);
    assert_ne!(assoc.engine_assoc_id(), 0);

    let outcome = assoc
        .send_data(b"payload", 3, 51, true, PartialReliability::None)
        .expect("send while connected");
    assert_eq!(outcome, SendOutcome::Sent(7));
    let sends = fixture.engine.sends();
    assert_eq!(sends.len(), 1);
    assert_eq!(sends[0].2.stream_id, 3);

    assoc.disconnect();
    assert_eq!(assoc.state(), AssociationState::Disconnected);
    assert!(assoc.socket().is_none());
    assert!(!assoc.has_worker());
    assert_eq!(assoc.engine_assoc_id(), 0);
    assert!(fixture.engine.calls().contains(&EngineCall::Close(socket)));

    assert_eq!(
        fixture.state_changes(),
        vec![
            AssociationState::Ready,
            AssociationState::Connecting,
            AssociationState::Connected,
            AssociationState::Disconnecting,
            AssociationState::Disconnected,
        ]
    );
}

#[test]
fn test_packets_before_connect_are_discarded() {
    init_test_logging();

    let fixture = AssociationFixture::ready(1);
    let assoc = &fixture.association;

    assoc.incoming_packet(b"INIT");
    assoc.incoming_packet(b"INIT-ACK");
    assert!(fixture.engine.conn_inputs().is_empty());

    fixture.start_and_wait_for_connect();
    assoc.incoming_packet(b"COOKIE-ECHO");
    assert_eq!(fixture.engine.conn_inputs(), vec![b"COOKIE-ECHO".to_vec()]);

    assoc.disconnect();
    assoc.incoming_packet(b"late");
    assert_eq!(fixture.engine.conn_inputs().len(), 1);
}

#[test]
fn test_start_rejected_while_active() {
    init_test_logging();

    let fixture = AssociationFixture::ready(1);
    let assoc = &fixture.association;
    assoc.start().unwrap();

    let err = assoc.start().unwrap_err();
    assert!(matches!(err, SctpError::InvalidState(_)));
    assert_eq!(assoc.state(), AssociationState::Connecting);

    fixture.comm_up(7);
    assert!(matches!(assoc.start(), Err(SctpError::InvalidState(_))));
    assert_eq!(assoc.state(), AssociationState::Connected);
    assert_eq!(
        fixture.engine.count(|c| matches!(c, EngineCall::Socket { .. })),
        1
    );
    assoc.disconnect();
}

struct StartOnDisconnecting {
    results: Mutex<Vec<bool>>,
}

impl AssociationObserver for StartOnDisconnecting {
    fn on_state_changed(&self, association: &Association, state: AssociationState) {
        if state == AssociationState::Disconnecting {
            let rejected = matches!(association.start(), Err(SctpError::InvalidState(_)));
            self.results.lock().push(rejected);
        }
    }
}

#[test]
fn test_start_rejected_while_disconnecting() {
    init_test_logging();

    let fixture = AssociationFixture::connected(1, 9);
    let observer = Arc::new(StartOnDisconnecting {
        results: Mutex::new(Vec::new()),
    });
    fixture.association.add_observer(observer.clone());

    fixture.association.disconnect();
    assert_eq!(*observer.results.lock(), vec![true]);
    assert_eq!(fixture.association.state(), AssociationState::Disconnected);
}

#[test]
fn test_restart_after_disconnect() {
    init_test_logging();

    let mut fixture = AssociationFixture::connected(1, 9);
    let assoc = fixture.association.clone();
    let first_socket = assoc.socket().unwrap();
    assoc.disconnect();
    fixture.drain_events();

    fixture.start_and_wait_for_connect();
    let second_socket = assoc.socket().unwrap();
    assert_ne!(first_socket, second_socket);
    fixture.comm_up(10);
    assert_eq!(assoc.state(), AssociationState::Connected);
    assert_eq!(assoc.engine_assoc_id(), 10);
    assert_eq!(
        fixture.state_changes(),
        vec![AssociationState::Connecting, AssociationState::Connected]
    );

    assoc.disconnect();
    assert_eq!(
        fixture.engine.count(|c| matches!(c, EngineCall::Connect { .. })),
        2
    );
}

#[test]
fn test_stream_mode_socket() {
    init_test_logging();

    let mut config = integration_tests::test_config();
    config.use_sock_stream = true;
    let fixture = AssociationFixture::with_config(1, &config);
    fixture.association.start().unwrap();

    assert_eq!(
        fixture.engine.count(|c| matches!(
            c,
            EngineCall::Socket { mode: SocketMode::Stream, .. }
        )),
        1
    );
    fixture.association.disconnect();
}

#[test]
fn test_peer_messages_reach_receiver() {
    init_test_logging();

    let fixture = AssociationFixture::connected(1, 9);
    fixture.deliver(Upcall::Message {
        data: Bytes::from_static(b"DCEP open"),
        stream_id: 0,
        ppid: 50,
    });
    fixture.deliver(Upcall::Message {
        data: Bytes::from_static(b"hi"),
        stream_id: 0,
        ppid: 51,
    });

    assert_eq!(
        *fixture.received.lock(),
        vec![
            ReceivedMessage {
                data: Bytes::from_static(b"DCEP open"),
                stream_id: 0,
                ppid: 50,
            },
            ReceivedMessage {
                data: Bytes::from_static(b"hi"),
                stream_id: 0,
                ppid: 51,
            },
        ]
    );
    fixture.association.disconnect();
}

#[test]
fn test_engine_egress_reaches_transport() {
    init_test_logging();

    let fixture = AssociationFixture::ready(1);
    let token = fixture.association.token();
    fixture.registry.packet_out(token, b"INIT");
    fixture.registry.packet_out(token, b"COOKIE-ECHO");
    assert_eq!(
        *fixture.packets_out.lock(),
        vec![b"INIT".to_vec(), b"COOKIE-ECHO".to_vec()]
    );
}

#[test]
fn test_peer_loss_disconnects() {
    init_test_logging();

    let mut fixture = AssociationFixture::connected(1, 9);
    fixture.drain_events();
    fixture.comm_lost();

    assert_eq!(fixture.association.state(), AssociationState::Disconnected);
    assert!(fixture.association.socket().is_none());
    assert_eq!(
        fixture.state_changes(),
        vec![AssociationState::Disconnecting, AssociationState::Disconnected]
    );
}

#[tokio::test]
async fn test_event_channel_reports_lifecycle() {
    init_test_logging();

    let mut fixture = AssociationFixture::ready(3);
    fixture.association.start().unwrap();

    let assoc = fixture.association.clone();
    wait_for_condition(
        || assoc.is_connect_done(),
        DEFAULT_TEST_TIMEOUT,
        DEFAULT_POLL_INTERVAL,
    )
    .await
    .expect("worker should connect");

    fixture.comm_up(5);
    fixture.association.disconnect();

    let mut states = Vec::new();
    while let Ok(event) = fixture.events.try_recv() {
        match event {
            AssociationEvent::StateChanged { association_id, state } => {
                assert_eq!(association_id, 3);
                states.push(state);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
    assert_eq!(states.first(), Some(&AssociationState::Ready));
    assert_eq!(states.last(), Some(&AssociationState::Disconnected));
    assert_eq!(states.len(), 5);
}

#[test]
fn test_late_upcall_after_release_misses_reused_id() {
    init_test_logging();

    let fixture = AssociationFixture::connected(1, 9);
    let stale_token = fixture.association.token();
    assert!(fixture.registry.release(1));

    let fresh = fixture.registry.get(1);
    fresh.set_on_packet_out(|_: &Association, _: &[u8]| {});
    fresh.set_on_packet_received(|_: &Association, _: &[u8], _: u16, _: u32| {});
    fresh.configure(&integration_tests::test_config()).unwrap();
    fresh.start().unwrap();

    fixture.comm_lost();
    fixture.registry.packet_out(stale_token, b"ABORT");
    assert_eq!(fresh.state(), AssociationState::Connecting);
    assert!(fresh.socket().is_some());
    assert!(fixture.packets_out.lock().is_empty());

    fresh.disconnect();
    assert!(fixture.registry.release(1));
}
