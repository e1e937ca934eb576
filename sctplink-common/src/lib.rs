//! Common types and utilities for sctplink
//!
//! This crate provides the error type, logging setup and configuration
//! structures shared by the sctplink crates.

pub mod config;
pub mod error;
pub mod logging;

pub use config::AssociationConfig;
pub use error::Error;
pub use logging::{
    filter_directives, init_logging, init_logging_with_filter, log_sctp_packet, Direction,
    HexDump, LogLevel, PACKET_TARGET,
};
