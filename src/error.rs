//! # Error Types
//!
//! Custom error types for CRSF Bridge using `thiserror`.

use std::io;

use thiserror::Error;

use crate::udp::envelope::EnvelopeError;

/// Main error type for CRSF Bridge
#[derive(Debug, Error)]
pub enum BridgeError {
    /// CRSF protocol errors
    #[error("CRSF protocol error: {0}")]
    CrsfProtocol(String),

    /// UDP envelope errors
    #[error("UDP envelope error: {0}")]
    Envelope(#[from] EnvelopeError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port errors
    #[error("Serial port error: {0}")]
    Serial(String),

    /// Direction-control line errors
    #[error("GPIO error: {0}")]
    Gpio(String),

    /// A bridge activity panicked or was aborted
    #[error("Task error: {0}")]
    Task(String),
}

/// Result type alias for CRSF Bridge
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Returns `true` for I/O errors an activity should log and ride out.
///
/// Timeouts, interrupted syscalls and would-block conditions are transient;
/// everything else (device detached, permission revoked, broken pipe) ends
/// the owning activity.
pub fn is_transient_io(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}
