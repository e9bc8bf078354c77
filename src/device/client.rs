//! Framed request/response client for the computer board.
//!
//! One exclusive-access lock guards the transport for the duration of each
//! full round trip: write the command frame, read the status frame, and for
//! queries read the single response frame. Reads proceed byte-by-byte until
//! the terminator; a zero-length read means the deadline elapsed and is
//! surfaced as `IoTimeout`, never silently retried here.

use std::sync::Mutex;

use log::{error, trace};

use crate::error::{DetectorError, Result};
use crate::protocol::commands::{ACK, Command, EOT, ID_ASCII};
use crate::protocol::frame::{Payload, decode_response, decode_status, encode_command};
use crate::transport::Transport;

/// Serializes concurrent access to one transport.
pub struct CommandClient {
    transport: Mutex<Box<dyn Transport>>,
}

impl CommandClient {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            transport: Mutex::new(transport),
        }
    }

    /// Send a command that produces no response payload.
    pub fn send_command(&self, cmd: Command, arg: &[u8]) -> Result<()> {
        debug_assert_eq!(arg.len(), cmd.arg_len(), "argument width for {cmd:?}");
        let mut transport = self.transport.lock().expect("transport lock poisoned");
        write_and_check_status(transport.as_mut(), cmd, arg)
    }

    /// Send a query and return its decoded response payload.
    pub fn send_query(&self, cmd: Command, arg: &[u8]) -> Result<Payload> {
        debug_assert_eq!(arg.len(), cmd.arg_len(), "argument width for {cmd:?}");
        let mut transport = self.transport.lock().expect("transport lock poisoned");
        let transport = transport.as_mut();
        write_and_check_status(transport, cmd, arg)?;

        // Response frame: 2-byte header, then either ASCII-until-EOT or a
        // length-prefixed binary body.
        let mut frame = vec![0u8; 2];
        read_exact(transport, &mut frame[..])?;
        if frame[1] == ID_ASCII {
            loop {
                let b = read_byte(transport, frame.len())?;
                frame.push(b);
                if b == EOT {
                    break;
                }
            }
        } else {
            let len = read_byte(transport, frame.len())?;
            frame.push(len);
            let mut body = vec![0u8; len as usize + 2]; // US + payload + EOT
            read_exact(transport, &mut body)?;
            frame.extend_from_slice(&body);
        }
        trace!("response frame {frame:02x?}");

        decode_response(&frame).inspect_err(|e| error!("dropping response: {e}"))
    }
}

fn write_and_check_status(transport: &mut dyn Transport, cmd: Command, arg: &[u8]) -> Result<()> {
    let frame = encode_command(cmd, arg);
    trace!("sending {cmd:?} frame {frame:02x?}");
    transport.write_all(&frame)?;

    let status = read_until_eot(transport)?;
    let code = decode_status(&status).inspect_err(|e| error!("dropping status: {e}"))?;
    if code != ACK {
        return Err(DetectorError::DeviceRejected(code));
    }
    Ok(())
}

fn read_byte(transport: &mut dyn Transport, received: usize) -> Result<u8> {
    let mut b = [0u8; 1];
    if transport.read(&mut b)? == 0 {
        return Err(DetectorError::IoTimeout(received));
    }
    Ok(b[0])
}

fn read_exact(transport: &mut dyn Transport, buf: &mut [u8]) -> Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = transport.read(&mut buf[filled..])?;
        if n == 0 {
            return Err(DetectorError::IoTimeout(filled));
        }
        filled += n;
    }
    Ok(())
}

fn read_until_eot(transport: &mut dyn Transport) -> Result<Vec<u8>> {
    let mut frame = Vec::new();
    loop {
        let b = read_byte(transport, frame.len())?;
        frame.push(b);
        if b == EOT {
            return Ok(frame);
        }
    }
}
