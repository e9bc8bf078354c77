//! Device abstraction layer for the Argus detector.
//!
//! Provides the framed command client and the high-level typed board
//! interface, including discovery.

pub mod board;
pub mod client;

pub use board::{ArgusBoard, HardwareRevision, Telemetry};
pub use client::CommandClient;
