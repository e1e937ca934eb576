//! Association configuration
//!
//! A serializable record of everything an application sets on an
//! association before starting it. Loaded from YAML the same way the rest of
//! the host configuration is.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::Error;

/// Configuration for a single SCTP association.
///
/// All fields default to "unset": ports of 0 keep the association in its
/// initial state until real values arrive.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct AssociationConfig {
    /// Local SCTP port
    pub local_port: u16,
    /// Remote SCTP port
    pub remote_port: u16,
    /// Use a sequenced, reliable, connection-based socket. Partial
    /// reliability parameters are then ignored by the engine.
    pub use_sock_stream: bool,
    /// Enable engine debug output
    pub debug_sctp: bool,
    /// Heartbeat every 10 ms and give up after a single retransmission
    pub aggressive_heartbeat: bool,
}

impl AssociationConfig {
    /// Creates a configuration with the given ports and default flags.
    pub fn new(local_port: u16, remote_port: u16) -> Self {
        Self {
            local_port,
            remote_port,
            ..Self::default()
        }
    }

    /// Parses a configuration from a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, Error> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Reads and parses a YAML configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    /// Checks that the configuration is complete enough to start.
    pub fn validate(&self) -> Result<(), Error> {
        if self.local_port == 0 {
            return Err(Error::Config("local-port must be non-zero".into()));
        }
        if self.remote_port == 0 {
            return Err(Error::Config("remote-port must be non-zero".into()));
        }
        Ok(())
    }
}
