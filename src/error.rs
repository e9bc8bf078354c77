//! Custom error types for Argus detector operations.
//!
//! This module provides fine-grained error handling for device communication,
//! protocol parsing, and calibration.

use thiserror::Error;

/// Main error type for detector operations.
#[derive(Error, Debug)]
pub enum DetectorError {
    /// No compatible device found during port enumeration.
    #[error("no Argus detector found; check the serial connection and permissions")]
    DeviceNotFound,

    /// No bytes received within the read deadline.
    #[error("timeout waiting for device response (received {0} bytes so far)")]
    IoTimeout(usize),

    /// Frame markers, length, or the duplicated status byte are violated.
    #[error("malformed frame from device: {reason} (raw: {raw:02x?})")]
    MalformedFrame { reason: &'static str, raw: Vec<u8> },

    /// Device responded with a non-ACK status code.
    #[error("device rejected command with status {0:#04x}")]
    DeviceRejected(u8),

    /// Strict-validation setter given an out-of-range value.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Response decoded cleanly but carried an unusable value.
    #[error("invalid response from device: {0}")]
    InvalidResponse(String),

    /// Negative output voltage observed during calibration.
    #[error("negative output voltage detected ({0} V); check the hardware for defects")]
    HardwareFault(f64),

    /// Serial port error.
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for detector operations.
pub type Result<T> = std::result::Result<T, DetectorError>;
