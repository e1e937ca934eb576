//! Integration test framework for sctplink
#![allow(missing_docs)]
//!
//! This crate provides fixtures and utilities for driving associations end
//! to end against the recording mock engine.
//!
//! # Components
//!
//! - [`test_fixtures`] - A started-from-scratch association with every
//!   observable output captured
//! - [`test_utils`] - Logging setup and polling helpers
//!
//! # Test Categories
//!
//! 1. **Lifecycle** - configure, start, connect, send, disconnect, restart
//! 2. **Shutdown** - graceful handshake wait and its ceiling
//! 3. **Concurrency** - engine-thread notifications racing application calls

pub mod test_fixtures;

pub use test_fixtures::{
    test_config, AssociationFixture, ReceivedMessage, TEST_LOCAL_PORT, TEST_REMOTE_PORT,
};
pub use test_utils::{
    init_test_logging, wait_for_condition, wait_until, TestResult, DEFAULT_POLL_INTERVAL,
    DEFAULT_TEST_TIMEOUT,
};
