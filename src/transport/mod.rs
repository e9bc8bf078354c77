//! Byte transport abstraction for the detector link.
//!
//! The command client only needs a duplex byte channel with bounded-timeout
//! reads; the physical serial port and the in-memory simulator both implement
//! [`Transport`].

pub mod serial;
pub mod simulator;

pub use serial::SerialTransport;
pub use simulator::ArgusSimulator;

use crate::error::Result;

/// Duplex byte channel with read-with-timeout semantics.
///
/// `read` returns the number of bytes placed in `buf`, which may be fewer
/// than requested; zero bytes signals that the read deadline elapsed. The
/// channel is closed by dropping it.
pub trait Transport: Send {
    /// Write all bytes to the channel.
    fn write_all(&mut self, data: &[u8]) -> Result<()>;

    /// Read up to `buf.len()` bytes; returns 0 on timeout.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Flush any buffered output.
    fn flush(&mut self) -> Result<()>;
}
