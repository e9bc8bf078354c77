//! Command definitions for the Argus computer board.
//!
//! Every command is a one-byte code with a fixed-size argument encoding and a
//! fixed response decoding rule. Nothing is negotiated on the wire, so the
//! whole command set is a closed enum checked at compile time.

use std::fmt;

use crate::error::{DetectorError, Result};

// =============================================================================
// Frame marker bytes
// =============================================================================

/// Start of header.
pub const SOH: u8 = 0x01;
/// End of transmission, terminates every frame.
pub const EOT: u8 = 0x04;
/// Acknowledgement status code.
pub const ACK: u8 = 0x06;
/// Negative acknowledgement status code.
pub const NAK: u8 = 0x15;
/// Unit separator, splits the duplicated status byte and binary payloads.
pub const US: u8 = 0x1F;
/// End of text, precedes EOT in ASCII message frames.
pub const ETX: u8 = 0x03;

/// Packet identifier: command frame ('C').
pub const ID_COMMAND: u8 = 0x43;
/// Packet identifier: status frame ('S').
pub const ID_STATUS: u8 = 0x53;
/// Packet identifier: ASCII message frame ('M').
pub const ID_ASCII: u8 = 0x4D;
/// Packet identifier: binary message frame ('B').
pub const ID_BINARY: u8 = 0x42;

/// Error-status code reported by a healthy device.
pub const ERROR_CODE_OK: u8 = 8;

// =============================================================================
// Commands
// =============================================================================

/// How a query response payload is decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    /// Command only, no response frame follows the status frame.
    None,
    /// ASCII identity string.
    Text,
    /// 4-byte signed little-endian integer.
    I32,
    /// 4-byte unsigned little-endian integer.
    U32,
    /// 1-byte signed integer.
    I8,
    /// 1-byte unsigned integer.
    U8,
}

/// The complete command set of the computer board firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    GetHardwareVersion,
    GetFirmwareVersion,
    GetSerialNumber,
    GetFrontendHardwareVersion,
    GetFrontendFirmwareVersion,
    GetFrontendSerialNumber,
    GetGain,
    SetGain,
    GetChannel,
    SetChannel,
    GetVacuumPressure,
    GetFrontendOffset,
    SetFrontendOffset,
    GetErrorStatus,
    GetColdPlateTemp,
    GetHotPlateTemp,
    SetMppcTemp,
    GetMppcTemp,
    SetDifferentialOutput,
    GetDifferentialPlus,
    GetDifferentialMinus,
    SetSingleEndedOutput,
    GetOutputSingleEnded,
    SetOffset,
    SetVoltage,
    GetVoltage,
    GetTecCurrent,
    GetOffset,
}

impl Command {
    /// The one-byte command code sent on the wire.
    pub const fn code(&self) -> u8 {
        match self {
            Command::GetHardwareVersion => 0x60,
            Command::GetFirmwareVersion => 0x61,
            Command::GetSerialNumber => 0x64,
            Command::GetFrontendHardwareVersion => 0x70,
            Command::GetFrontendFirmwareVersion => 0x71,
            Command::GetFrontendSerialNumber => 0x74,
            Command::GetGain => 0x88,
            Command::SetGain => 0x89,
            Command::GetColdPlateTemp => 0x8C,
            Command::GetHotPlateTemp => 0x8D,
            Command::GetChannel => 0x90,
            Command::SetChannel => 0x91,
            Command::GetVacuumPressure => 0x92,
            Command::GetFrontendOffset => 0x9A,
            Command::SetFrontendOffset => 0x9B,
            Command::GetErrorStatus => 0x9E,
            Command::SetMppcTemp => 0xB0,
            Command::GetMppcTemp => 0xB1,
            Command::SetDifferentialOutput => 0xBA,
            Command::GetDifferentialPlus => 0xBB,
            Command::GetDifferentialMinus => 0xBC,
            Command::SetSingleEndedOutput => 0xBD,
            Command::GetOutputSingleEnded => 0xBE,
            Command::SetOffset => 0xBF,
            Command::SetVoltage => 0xC9,
            Command::GetVoltage => 0xCA,
            Command::GetTecCurrent => 0xCD,
            Command::GetOffset => 0xE0,
        }
    }

    /// Fixed argument width in bytes.
    pub const fn arg_len(&self) -> usize {
        match self {
            Command::SetGain
            | Command::SetMppcTemp
            | Command::SetOffset
            | Command::SetVoltage
            | Command::SetFrontendOffset => 4,
            Command::SetChannel
            | Command::SetDifferentialOutput
            | Command::SetSingleEndedOutput => 1,
            _ => 0,
        }
    }

    /// Fixed response decoding rule.
    pub const fn response_kind(&self) -> ResponseKind {
        match self {
            Command::GetHardwareVersion
            | Command::GetFirmwareVersion
            | Command::GetSerialNumber
            | Command::GetFrontendHardwareVersion
            | Command::GetFrontendFirmwareVersion
            | Command::GetFrontendSerialNumber => ResponseKind::Text,
            Command::GetGain
            | Command::GetVacuumPressure
            | Command::GetColdPlateTemp
            | Command::GetHotPlateTemp
            | Command::GetMppcTemp
            | Command::GetDifferentialPlus
            | Command::GetDifferentialMinus
            | Command::GetOutputSingleEnded
            | Command::GetVoltage
            | Command::GetTecCurrent
            | Command::GetOffset => ResponseKind::I32,
            Command::GetFrontendOffset => ResponseKind::U32,
            Command::GetChannel => ResponseKind::I8,
            Command::GetErrorStatus => ResponseKind::U8,
            Command::SetGain
            | Command::SetChannel
            | Command::SetFrontendOffset
            | Command::SetMppcTemp
            | Command::SetDifferentialOutput
            | Command::SetSingleEndedOutput
            | Command::SetOffset
            | Command::SetVoltage => ResponseKind::None,
        }
    }
}

// =============================================================================
// Color channels
// =============================================================================

/// Color channel selector of the front-end board.
///
/// The wire codes are bit flags: `Panchromatic` is always the combination of
/// `Red | Green | Blue`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    None,
    Red,
    Blue,
    Green,
    Panchromatic,
}

impl Channel {
    /// All color channels in calibration sweep order.
    pub const COLORS: [Channel; 4] = [
        Channel::Red,
        Channel::Blue,
        Channel::Green,
        Channel::Panchromatic,
    ];

    /// The one-byte wire code.
    pub const fn code(&self) -> u8 {
        match self {
            Channel::None => 0,
            Channel::Red => 1,
            Channel::Blue => 2,
            Channel::Green => 4,
            Channel::Panchromatic => 7,
        }
    }

    /// Decode a wire code back into a channel.
    pub fn from_wire(code: i8) -> Result<Channel> {
        match code {
            0 => Ok(Channel::None),
            1 => Ok(Channel::Red),
            2 => Ok(Channel::Blue),
            4 => Ok(Channel::Green),
            7 => Ok(Channel::Panchromatic),
            other => Err(DetectorError::InvalidResponse(format!(
                "unknown channel code {other}"
            ))),
        }
    }

    /// Parse a channel name (as written in calibration tables or CLI input).
    pub fn from_name(name: &str) -> Result<Channel> {
        match name.to_lowercase().as_str() {
            "none" => Ok(Channel::None),
            "red" | "r" => Ok(Channel::Red),
            "blue" | "b" => Ok(Channel::Blue),
            "green" | "g" => Ok(Channel::Green),
            "panchromatic" | "pan" => Ok(Channel::Panchromatic),
            other => Err(DetectorError::InvalidArgument(format!(
                "unknown channel '{other}'; use red, blue, green, or pan"
            ))),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Channel::None => "NONE",
            Channel::Red => "RED",
            Channel::Blue => "BLUE",
            Channel::Green => "GREEN",
            Channel::Panchromatic => "PANCHROMATIC",
        };
        write!(f, "{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panchromatic_is_rgb_combined() {
        assert_eq!(
            Channel::Panchromatic.code(),
            Channel::Red.code() | Channel::Green.code() | Channel::Blue.code()
        );
    }

    #[test]
    fn test_channel_wire_roundtrip() {
        for ch in [Channel::None, Channel::Red, Channel::Blue, Channel::Green, Channel::Panchromatic] {
            assert_eq!(Channel::from_wire(ch.code() as i8).unwrap(), ch);
        }
        assert!(Channel::from_wire(3).is_err());
        assert!(Channel::from_wire(5).is_err());
    }

    #[test]
    fn test_channel_names() {
        assert_eq!(Channel::from_name("green").unwrap(), Channel::Green);
        assert_eq!(Channel::from_name("PAN").unwrap(), Channel::Panchromatic);
        assert_eq!(Channel::Green.to_string(), "GREEN");
        assert!(Channel::from_name("magenta").is_err());
    }

    #[test]
    fn test_setter_arg_widths() {
        assert_eq!(Command::SetVoltage.arg_len(), 4);
        assert_eq!(Command::SetChannel.arg_len(), 1);
        assert_eq!(Command::GetVoltage.arg_len(), 0);
    }

    #[test]
    fn test_response_kinds() {
        assert_eq!(Command::GetSerialNumber.response_kind(), ResponseKind::Text);
        assert_eq!(Command::GetVoltage.response_kind(), ResponseKind::I32);
        assert_eq!(Command::GetFrontendOffset.response_kind(), ResponseKind::U32);
        assert_eq!(Command::SetVoltage.response_kind(), ResponseKind::None);
    }
}
