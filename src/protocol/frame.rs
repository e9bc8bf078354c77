//! Frame codec for the Argus serial protocol.
//!
//! Three frame shapes travel on the wire:
//!
//! - command: `SOH 'C' len cmd arg... EOT`
//! - status:  `SOH 'S' code US code EOT` (the duplicated code is an
//!   integrity check)
//! - response: ASCII `SOH 'M' len text... ETX EOT`, or binary
//!   `SOH type len US payload... EOT` with an explicit payload length
//!
//! One request produces one status frame and, for queries, exactly one
//! response frame. There is no pipelining.

use crate::error::{DetectorError, Result};
use crate::protocol::commands::{Command, EOT, ETX, ID_ASCII, ID_COMMAND, ID_STATUS, SOH, US};

/// Decoded response payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// ASCII message (identity strings).
    Text(String),
    /// Binary message (integer readings).
    Bytes(Vec<u8>),
}

impl Payload {
    /// The payload as raw bytes, whichever shape it came in.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Payload::Text(s) => s.as_bytes(),
            Payload::Bytes(b) => b,
        }
    }
}

fn malformed(reason: &'static str, raw: &[u8]) -> DetectorError {
    DetectorError::MalformedFrame {
        reason,
        raw: raw.to_vec(),
    }
}

/// Encode a command frame.
pub fn encode_command(cmd: Command, arg: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(5 + arg.len());
    frame.push(SOH);
    frame.push(ID_COMMAND);
    frame.push(arg.len() as u8);
    frame.push(cmd.code());
    frame.extend_from_slice(arg);
    frame.push(EOT);
    frame
}

/// Decode a status frame, returning the status code.
///
/// Validates every marker position and the duplicated code; the caller
/// decides whether a non-ACK code is an error.
pub fn decode_status(frame: &[u8]) -> Result<u8> {
    if frame.len() != 6 {
        return Err(malformed("status frame must be 6 bytes", frame));
    }
    if frame[0] != SOH {
        return Err(malformed("status frame missing SOH", frame));
    }
    if frame[1] != ID_STATUS {
        return Err(malformed("not a status frame", frame));
    }
    if frame[3] != US {
        return Err(malformed("status frame missing unit separator", frame));
    }
    if frame[5] != EOT {
        return Err(malformed("status frame missing EOT", frame));
    }
    if frame[2] != frame[4] {
        return Err(malformed("duplicated status bytes differ", frame));
    }
    Ok(frame[2])
}

/// Decode a response frame into its payload.
///
/// Branches on the message-type byte: ASCII messages are delimited by the
/// trailing `ETX EOT`, anything else is treated as a binary message carrying
/// an explicit length byte.
pub fn decode_response(frame: &[u8]) -> Result<Payload> {
    if frame.len() < 4 {
        return Err(malformed("response frame too short", frame));
    }
    if frame[0] != SOH {
        return Err(malformed("response frame missing SOH", frame));
    }
    if frame[frame.len() - 1] != EOT {
        return Err(malformed("response frame missing EOT", frame));
    }

    if frame[1] == ID_ASCII {
        // SOH 'M' len text... ETX EOT
        if frame.len() < 5 {
            return Err(malformed("ASCII frame too short", frame));
        }
        if frame[frame.len() - 2] != ETX {
            return Err(malformed("ASCII frame missing ETX", frame));
        }
        let text = &frame[3..frame.len() - 2];
        // Identity strings are latin1; keep them readable either way.
        Ok(Payload::Text(
            text.iter().map(|&b| b as char).collect::<String>(),
        ))
    } else {
        // SOH type len US payload... EOT
        let len = frame[2] as usize;
        if frame.len() != len + 5 {
            return Err(malformed("binary frame length mismatch", frame));
        }
        if frame[3] != US {
            return Err(malformed("binary frame missing unit separator", frame));
        }
        Ok(Payload::Bytes(frame[4..4 + len].to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::commands::{ACK, ID_BINARY, NAK};

    #[test]
    fn test_encode_command_roundtrip() {
        let arg = [0x00, 0x2D, 0xCE, 0xFE]; // -20e6 little-endian
        let frame = encode_command(Command::SetVoltage, &arg);
        assert_eq!(frame[0], SOH);
        assert_eq!(frame[1], ID_COMMAND);
        assert_eq!(frame[2], 4);
        assert_eq!(frame[3], Command::SetVoltage.code());
        assert_eq!(&frame[4..8], &arg);
        assert_eq!(frame[8], EOT);

        // The argument bytes survive exactly for every width.
        let frame = encode_command(Command::GetVoltage, &[]);
        assert_eq!(frame, vec![SOH, ID_COMMAND, 0, Command::GetVoltage.code(), EOT]);
        let frame = encode_command(Command::SetChannel, &[4]);
        assert_eq!(frame[2], 1);
        assert_eq!(frame[4], 4);
    }

    #[test]
    fn test_decode_status_ack_and_nak() {
        assert_eq!(decode_status(&[SOH, ID_STATUS, ACK, US, ACK, EOT]).unwrap(), ACK);
        assert_eq!(decode_status(&[SOH, ID_STATUS, NAK, US, NAK, EOT]).unwrap(), NAK);
    }

    #[test]
    fn test_decode_status_duplicate_mismatch() {
        // Any pair of differing status bytes must be rejected, whatever the values.
        for (a, b) in [(ACK, NAK), (NAK, ACK), (0x00, 0x01), (0xFF, 0x00)] {
            let err = decode_status(&[SOH, ID_STATUS, a, US, b, EOT]).unwrap_err();
            assert!(matches!(err, DetectorError::MalformedFrame { .. }), "{a:#x}/{b:#x}");
        }
    }

    #[test]
    fn test_decode_status_bad_markers() {
        assert!(decode_status(&[0x00, ID_STATUS, ACK, US, ACK, EOT]).is_err());
        assert!(decode_status(&[SOH, ID_COMMAND, ACK, US, ACK, EOT]).is_err());
        assert!(decode_status(&[SOH, ID_STATUS, ACK, 0x00, ACK, EOT]).is_err());
        assert!(decode_status(&[SOH, ID_STATUS, ACK, US, ACK, 0x00]).is_err());
        assert!(decode_status(&[SOH, ID_STATUS, ACK, US, ACK]).is_err());
    }

    #[test]
    fn test_decode_binary_response() {
        let frame = [SOH, ID_BINARY, 4, US, 0xD2, 0x02, 0x96, 0x49, EOT];
        let payload = decode_response(&frame).unwrap();
        assert_eq!(payload, Payload::Bytes(vec![0xD2, 0x02, 0x96, 0x49]));
    }

    #[test]
    fn test_decode_ascii_response() {
        let text = b"ARGUS-CB REV2.1";
        let mut frame = vec![SOH, ID_ASCII, text.len() as u8];
        frame.extend_from_slice(text);
        frame.push(ETX);
        frame.push(EOT);
        let payload = decode_response(&frame).unwrap();
        assert_eq!(payload, Payload::Text("ARGUS-CB REV2.1".into()));
    }

    #[test]
    fn test_decode_response_length_mismatch() {
        // Length byte claims 4 payload bytes, only 3 present.
        let frame = [SOH, ID_BINARY, 4, US, 0x01, 0x02, 0x03, EOT];
        assert!(decode_response(&frame).is_err());
        // Missing unit separator.
        let frame = [SOH, ID_BINARY, 1, 0x00, 0x01, EOT];
        assert!(decode_response(&frame).is_err());
    }
}
