//! Serial protocol implementation for the Argus computer board.
//!
//! This module contains the low-level frame markers, the closed command set,
//! and the frame codec shared by the real device and the simulator.

pub mod commands;
pub mod frame;

pub use commands::*;
pub use frame::*;
