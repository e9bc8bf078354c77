//! Physical serial port transport.

use std::io::Read;
use std::time::Duration;

use log::debug;
use serialport::SerialPort;

use crate::error::Result;
use crate::transport::Transport;

/// Fixed baud rate of the computer board UART.
pub const BAUD_RATE: u32 = 115_200;

/// Read deadline for a single transport read.
const READ_TIMEOUT: Duration = Duration::from_millis(2000);

/// Short deadline used while draining stale bytes right after opening.
const DRAIN_TIMEOUT: Duration = Duration::from_millis(10);

/// Serial port implementation of [`Transport`].
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
}

impl SerialTransport {
    /// Open `path` at the fixed baud rate and drain any stale bytes left in
    /// the OS buffers from a previous session.
    pub fn open(path: &str) -> Result<Self> {
        let mut port = serialport::new(path, BAUD_RATE)
            .timeout(READ_TIMEOUT)
            .open()?;

        port.flush().ok();
        port.clear(serialport::ClearBuffer::All).ok();

        // Read until timeout to be extra safe that the line is quiet.
        port.set_timeout(DRAIN_TIMEOUT)?;
        let mut scratch = [0u8; 64];
        let mut drained = 0usize;
        loop {
            match port.read(&mut scratch) {
                Ok(0) => break,
                Ok(n) => drained += n,
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => break,
                Err(e) => return Err(e.into()),
            }
        }
        if drained > 0 {
            debug!("drained {drained} stale bytes from {path}");
        }
        port.set_timeout(READ_TIMEOUT)?;

        Ok(Self { port })
    }
}

impl Transport for SerialTransport {
    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        std::io::Write::write_all(&mut self.port, data)?;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            // A timed-out read is the bounded-blocking contract, not an error.
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn flush(&mut self) -> Result<()> {
        std::io::Write::flush(&mut self.port)?;
        Ok(())
    }
}

/// List candidate serial port names on this machine.
pub fn candidate_ports() -> Result<Vec<String>> {
    let ports = serialport::available_ports()?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}
