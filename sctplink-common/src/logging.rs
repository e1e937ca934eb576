//! Logging setup and SCTP packet tracing
//!
//! Wire packets are logged under their own target, [`PACKET_TARGET`], so that
//! packet dumps can be switched on without raising the level of the state
//! machine logs.

use std::fmt;
use std::str::FromStr;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Target of the per-packet trace events
pub const PACKET_TARGET: &str = "sctplink::packet";

/// Verbosity of the sctplink crates
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

const LEVELS: [(LogLevel, &str, Level); 5] = [
    (LogLevel::Trace, "trace", Level::TRACE),
    (LogLevel::Debug, "debug", Level::DEBUG),
    (LogLevel::Info, "info", Level::INFO),
    (LogLevel::Warn, "warn", Level::WARN),
    (LogLevel::Error, "error", Level::ERROR),
];

impl LogLevel {
    fn entry(self) -> &'static (LogLevel, &'static str, Level) {
        // LEVELS is indexed in declaration order.
        &LEVELS[self as usize]
    }

    pub fn as_str(self) -> &'static str {
        self.entry().1
    }
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        level.entry().2
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        if wanted == "warning" {
            return Ok(LogLevel::Warn);
        }
        LEVELS
            .iter()
            .find(|(_, name, _)| *name == wanted)
            .map(|(level, _, _)| *level)
            .ok_or_else(|| format!("unknown log level: {s}"))
    }
}

/// Filter directives for `level`, optionally with packet dumps enabled.
pub fn filter_directives(level: LogLevel, trace_packets: bool) -> String {
    if trace_packets {
        format!("{level},{PACKET_TARGET}=trace")
    } else {
        level.to_string()
    }
}

/// Install the global subscriber at `level`. `RUST_LOG` takes precedence.
///
/// # Example
///
/// ```no_run
/// use sctplink_common::logging::{init_logging, LogLevel};
///
/// init_logging(LogLevel::Debug);
/// ```
pub fn init_logging(level: LogLevel) {
    init_logging_with_filter(&filter_directives(level, false));
}

/// Install the global subscriber from filter directives.
///
/// ```no_run
/// use sctplink_common::logging::init_logging_with_filter;
///
/// init_logging_with_filter("info,sctplink_assoc=debug,sctplink::packet=trace");
/// ```
pub fn init_logging_with_filter(directives: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives));

    // The host application may have installed a subscriber already.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .try_init();
}

/// Which way a wire packet travels relative to the local engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// From the datagram transport into the engine
    Rx,
    /// From the engine out to the datagram transport
    Tx,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Rx => "RX",
            Direction::Tx => "TX",
        })
    }
}

/// Trace one SCTP wire packet under [`PACKET_TARGET`].
pub fn log_sctp_packet(direction: Direction, association_id: u32, data: &[u8]) {
    tracing::trace!(
        target: PACKET_TARGET,
        association_id,
        %direction,
        len = data.len(),
        "{}",
        HexDump(data)
    );
}

/// Hex rendering of a packet in 32-bit words, the unit SCTP headers and
/// chunk headers are laid out in.
pub struct HexDump<'a>(pub &'a [u8]);

impl fmt::Display for HexDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, word) in self.0.chunks(4).enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            f.write_str(&hex::encode(word))?;
        }
        Ok(())
    }
}
