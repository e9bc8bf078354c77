//! Argus Detector Library
//!
//! A Rust driver for the Argus cooled MPPC detector, controlled over a
//! serial link.
//!
//! # Features
//!
//! - Framed request/response protocol with timeout and integrity handling
//! - Typed device operations (bias voltage, gain, offsets, channel,
//!   temperatures, pressure) with the device's unit scaling
//! - Closed-loop front-end offset calibration producing a table file used
//!   for signal correction at runtime
//! - In-memory simulator for development and tests
//!
//! # Example
//!
//! ```no_run
//! use argus_rust_detector::device::ArgusBoard;
//! use argus_rust_detector::protocol::Channel;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Probe serial ports and open the first compatible board
//!     let board = ArgusBoard::open()?;
//!     println!("Connected! Hardware: {}", board.hardware_version()?);
//!
//!     // Configure the detector
//!     board.set_channel(Channel::Green)?;
//!     board.set_gain(80.0)?;
//!     board.set_voltage(30.0)?;
//!
//!     // Read live values
//!     println!("{}", board.read_telemetry()?);
//!
//!     Ok(())
//! }
//! ```

pub mod calibration;
pub mod config;
pub mod device;
pub mod error;
pub mod measure;
pub mod protocol;
pub mod transport;

// Re-exports for convenience
pub use device::{ArgusBoard, HardwareRevision, Telemetry};
pub use error::{DetectorError, Result};
pub use protocol::Channel;
