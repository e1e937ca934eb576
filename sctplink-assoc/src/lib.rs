//! SCTP association lifecycle for sctplink
#![allow(missing_docs)]
//!
//! This crate manages a single logical SCTP association used as a reliable
//! or partially reliable message transport over a datagram carrier, with the
//! SCTP protocol engine itself consumed through the [`SctpEngine`] trait.
//!
//! # Overview
//!
//! - [`AssociationRegistry`] maps association ids to live associations and
//!   is the entry point for engine upcalls, which are addressed by the
//!   per-instance [`AssociationToken`].
//! - [`Association`] holds configuration, the state machine, the socket and
//!   the callbacks behind one instance lock.
//! - A connection worker thread binds and connects once per `start()`.
//! - Engine notifications drive CONNECTING → CONNECTED and the disconnect
//!   path; messages flow to the packet-received handler.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use sctplink_assoc::{Association, AssociationRegistry, PartialReliability};
//!
//! let registry = AssociationRegistry::new(engine);
//! let assoc = registry.get(1);
//! assoc.set_local_port(5000)?;
//! assoc.set_remote_port(5000)?;
//! assoc.set_on_packet_out(|_: &Association, packet: &[u8]| transport.send(packet));
//! assoc.set_on_packet_received(|_: &Association, data: &[u8], stream: u16, ppid: u32| {
//!     println!("stream {stream} ppid {ppid}: {} bytes", data.len());
//! });
//! assoc.start()?;
//!
//! // Later, once the engine reported communication-up:
//! assoc.send_data(b"hello", 0, 51, true, PartialReliability::None)?;
//! assoc.disconnect();
//! registry.release(1);
//! ```

mod association;
mod data;
pub mod engine;
pub mod error;
pub mod events;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod observer;
mod registry;
mod worker;

pub use association::{
    Association, AssociationId, AssociationState, SHUTDOWN_POLL_ATTEMPTS, SHUTDOWN_POLL_INTERVAL,
};
pub use data::SendOutcome;
pub use engine::{
    AssociationToken, ConnAddr, EngineError, EngineSettings, EventType, PartialReliability,
    SctpEngine, SendInfo, SocketHandle, SocketMode, SocketOption, DEFAULT_OUTGOING_STREAMS,
};
pub use error::{Result, SctpError};
pub use events::{AssocChangeState, Notification, StreamResetEvent, StreamResetFlags, Upcall};
pub use observer::{AssociationEvent, AssociationObserver, PacketOutHandler, PacketReceivedHandler};
pub use registry::AssociationRegistry;
pub use worker::BIND_RETRY_INTERVAL;
