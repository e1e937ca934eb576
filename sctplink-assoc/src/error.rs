//! Association errors

use thiserror::Error;

use crate::engine::EngineError;

/// SCTP association errors
#[derive(Debug, Error)]
pub enum SctpError {
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Socket creation failed: {0}")]
    SocketCreation(#[source] EngineError),
    #[error("Could not spawn connection worker: {0}")]
    WorkerSpawn(#[source] std::io::Error),
    #[error("Send failed on stream {stream_id}: {source}")]
    Send {
        stream_id: u16,
        #[source]
        source: EngineError,
    },
    #[error(transparent)]
    Common(#[from] sctplink_common::Error),
}

/// Result type for SCTP association operations
pub type Result<T> = std::result::Result<T, SctpError>;
