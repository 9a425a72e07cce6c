//! Common error types for btc100.
//!
//! This module provides a centralized Error enum using thiserror. Every
//! variant is fatal to a run; nothing in the crate retries on its own.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for btc100 operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The device path could not be opened
    #[error("cannot open device {}: {source}", path.display())]
    DeviceOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The existing line configuration could not be read
    #[error("cannot read line configuration: {0}")]
    ConfigQuery(#[source] nix::Error),

    /// New line settings could not be committed
    #[error("cannot apply line configuration: {0}")]
    ConfigApply(#[source] nix::Error),

    /// Baud rate with no entry in the platform speed table
    #[error("unsupported baud rate: {0}")]
    UnsupportedBaud(u32),

    /// Reply did not carry the expected acknowledgment and value
    #[error("malformed reply to {command:?}: {reply}")]
    MalformedReply { command: String, reply: String },

    /// Read failure while a scan was in progress
    #[error("I/O error during scan: {0}")]
    ScanIo(#[source] std::io::Error),

    /// Scan payload larger than the scan buffer
    #[error("scan exceeds buffer capacity of {capacity} bytes")]
    BufferOverflow { capacity: usize },

    /// Instrument stopped sending before the scan completed
    #[error("scan timed out after {elapsed:?} ({empty_reads} consecutive empty reads)")]
    Timeout { elapsed: Duration, empty_reads: u32 },

    /// Instrument behavior outside the accepted protocol
    #[error("protocol error: {0}")]
    Protocol(String),

    /// I/O errors outside the scan loop
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),
}

/// Convenience type alias for Results using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
