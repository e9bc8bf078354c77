//! In-memory detector simulator.
//!
//! Parses command frames exactly like the firmware would and synthesizes
//! plausible device state, so the full driver stack (codec, client, facade,
//! calibration) can run without hardware. Also reachable from the CLI via
//! `--simulate`.

use byteorder::{ByteOrder, LittleEndian};
use log::warn;

use crate::error::Result;
use crate::protocol::commands::{
    ACK, Channel, EOT, ERROR_CODE_OK, ID_BINARY, ID_COMMAND, ID_STATUS, NAK, SOH, US,
};
use crate::transport::Transport;

// Linear front-end output model: the output voltage decreases by one count
// per offset step and reaches zero at `ideal_offset(vbias)`.
const OUTPUT_MODEL_SLOPE: f64 = 0.002653;
const OUTPUT_MODEL_INTERCEPT: f64 = 0.029203;
const OUTPUT_MODEL_STEP: f64 = 0.000164;

/// Simulated computer board with a front-end sensor attached.
pub struct ArgusSimulator {
    out_buf: Vec<u8>,
    in_buf: Vec<u8>,

    voltage_uv: i32,
    offset_counts: i32,
    gain_u: i32,
    mppc_target_uc: i32,
    cold_plate_uc: i32,
    hot_plate_uc: i32,
    vacuum_ubar: i32,
    channel_code: i8,
    tec_current: i32,
    fe_offset: u32,
    single_ended: bool,

    identity: String,
    jitter_enabled: bool,
    output_fault: bool,
    rng: u64,
}

impl ArgusSimulator {
    pub fn new() -> Self {
        Self {
            out_buf: Vec::new(),
            in_buf: Vec::new(),
            voltage_uv: -12_000_000,
            offset_counts: 2048,
            gain_u: 10_000_000,
            mppc_target_uc: 30_000_000,
            cold_plate_uc: 24_000_000,
            hot_plate_uc: 35_000_000,
            vacuum_ubar: 3_000,
            channel_code: Channel::Red.code() as i8,
            tec_current: 10_000_000,
            fe_offset: 513,
            single_ended: true,
            identity: "ARGUS-CB REV2.1 SIMULATED".to_string(),
            jitter_enabled: true,
            output_fault: false,
            rng: 0x1234_5678_9ABC_DEF1,
        }
    }

    /// Simulator with all jitter disabled, for exact round-trip tests.
    pub fn noiseless() -> Self {
        Self {
            jitter_enabled: false,
            ..Self::new()
        }
    }

    /// Override the identity string reported for the hardware version query.
    pub fn with_identity(mut self, identity: &str) -> Self {
        self.identity = identity.to_string();
        self
    }

    /// Force negative output readings, imitating a defective front end.
    pub fn with_output_fault(mut self) -> Self {
        self.output_fault = true;
        self
    }

    /// Currently selected output signaling mode.
    pub fn is_single_ended(&self) -> bool {
        self.single_ended
    }

    /// The minimal front-end offset that zeroes the output at `vbias_v`.
    pub fn ideal_offset(vbias_v: f64) -> f64 {
        (OUTPUT_MODEL_SLOPE * vbias_v + OUTPUT_MODEL_INTERCEPT) / OUTPUT_MODEL_STEP
    }

    fn output_counts(&self) -> i32 {
        if self.output_fault {
            return -5;
        }
        let vbias = (self.voltage_uv as f64 * 1e-6).abs();
        let ideal = Self::ideal_offset(vbias).round() as i64;
        (ideal - self.fe_offset as i64).max(0) as i32
    }

    fn jitter(&mut self, span: i64) -> i64 {
        if !self.jitter_enabled || span == 0 {
            return 0;
        }
        // xorshift64; deterministic across runs so tests stay stable.
        let mut x = self.rng;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.rng = x;
        (x % (2 * span as u64 + 1)) as i64 - span
    }

    fn send_status(&mut self, code: u8) {
        self.out_buf
            .extend_from_slice(&[SOH, ID_STATUS, code, US, code, EOT]);
    }

    fn send_binary(&mut self, payload: &[u8]) {
        self.out_buf.push(SOH);
        self.out_buf.push(ID_BINARY);
        self.out_buf.push(payload.len() as u8);
        self.out_buf.push(US);
        self.out_buf.extend_from_slice(payload);
        self.out_buf.push(EOT);
    }

    fn send_i32(&mut self, value: i32) {
        let mut b = [0u8; 4];
        LittleEndian::write_i32(&mut b, value);
        self.send_binary(&b);
    }

    fn send_text(&mut self, text: &str) {
        // Identity replies are fixed-width 40-byte fields on real hardware.
        let mut padded = text.as_bytes().to_vec();
        padded.resize(40, b'x');
        self.send_binary(&padded);
    }

    fn handle_frame(&mut self, cmd: u8, arg: &[u8]) {
        let arg_i32 = || {
            if arg.len() == 4 {
                LittleEndian::read_i32(arg)
            } else {
                0
            }
        };

        match cmd {
            0x60 => {
                self.send_status(ACK);
                let idn = self.identity.clone();
                self.send_text(&idn);
            }
            0x61 | 0x71 => {
                self.send_status(ACK);
                self.send_text("SIMULATED_FIRMWARE");
            }
            0x70 => {
                self.send_status(ACK);
                self.send_text("SIMULATED_HARDWARE");
            }
            0x64 | 0x74 => {
                self.send_status(ACK);
                self.send_text("SIMULATED_00000000");
            }
            0xCA => {
                self.send_status(ACK);
                let v = self.voltage_uv;
                self.send_i32(v);
            }
            0xC9 => {
                self.send_status(ACK);
                self.voltage_uv = arg_i32();
            }
            0xE0 => {
                self.send_status(ACK);
                let v = self.offset_counts;
                self.send_i32(v);
            }
            0xBF => {
                self.send_status(ACK);
                self.offset_counts = arg_i32();
            }
            0x9A => {
                self.send_status(ACK);
                let mut b = [0u8; 4];
                LittleEndian::write_u32(&mut b, self.fe_offset);
                self.send_binary(&b);
            }
            0x9B => {
                self.send_status(ACK);
                if arg.len() == 4 {
                    self.fe_offset = LittleEndian::read_u32(arg);
                }
            }
            0x88 => {
                self.send_status(ACK);
                let v = self.gain_u;
                self.send_i32(v);
            }
            0x89 => {
                self.send_status(ACK);
                self.gain_u = arg_i32();
            }
            0xB1 => {
                self.send_status(ACK);
                let v = self.mppc_target_uc;
                self.send_i32(v);
            }
            0xB0 => {
                self.send_status(ACK);
                self.mppc_target_uc = arg_i32();
            }
            0x8C => {
                // Cold plate crawls toward the regulation target between reads.
                let step = 1_000_000i64;
                let delta = self.mppc_target_uc as i64 - self.cold_plate_uc as i64;
                self.cold_plate_uc += delta.clamp(-step, step) as i32;
                self.send_status(ACK);
                let v = self.cold_plate_uc;
                self.send_i32(v);
            }
            0x8D => {
                let j = self.jitter(2_000_000);
                self.hot_plate_uc = self.hot_plate_uc.saturating_add(j as i32);
                self.send_status(ACK);
                let v = self.hot_plate_uc;
                self.send_i32(v);
            }
            0xBE | 0xBB | 0xBC => {
                self.send_status(ACK);
                let v = self.output_counts();
                self.send_i32(v);
            }
            0x92 => {
                self.send_status(ACK);
                let j = self.jitter(100);
                self.vacuum_ubar = (self.vacuum_ubar.saturating_add(j as i32)).max(0);
                let v = self.vacuum_ubar;
                self.send_i32(v);
            }
            0x90 => {
                self.send_status(ACK);
                self.send_binary(&[self.channel_code as u8]);
            }
            0x91 => {
                self.send_status(ACK);
                if let Some(&c) = arg.first() {
                    self.channel_code = c as i8;
                }
            }
            0xBA => {
                self.send_status(ACK);
                self.single_ended = arg.first() == Some(&0x00);
            }
            0xBD => {
                self.send_status(ACK);
                self.single_ended = arg.first() == Some(&0xFF);
            }
            0xCD => {
                self.send_status(ACK);
                let v = self.tec_current;
                self.send_i32(v);
            }
            0x9E => {
                self.send_status(ACK);
                self.send_binary(&[ERROR_CODE_OK]);
            }
            other => {
                warn!("simulator: unknown command {other:#04x}");
                self.send_status(NAK);
            }
        }
    }

    fn process_input(&mut self) {
        // A command frame is SOH 'C' len cmd arg... EOT; consume complete
        // frames, keep any trailing partial bytes for the next write.
        loop {
            if self.in_buf.len() < 5 {
                return;
            }
            let arg_len = self.in_buf[2] as usize;
            let total = 5 + arg_len;
            if self.in_buf.len() < total {
                return;
            }
            let frame: Vec<u8> = self.in_buf.drain(..total).collect();
            if frame[0] != SOH || frame[1] != ID_COMMAND || frame[total - 1] != EOT {
                warn!("simulator: dropping malformed frame {frame:02x?}");
                self.send_status(NAK);
                continue;
            }
            let cmd = frame[3];
            let arg = frame[4..4 + arg_len].to_vec();
            self.handle_frame(cmd, &arg);
        }
    }
}

impl Default for ArgusSimulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for ArgusSimulator {
    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.in_buf.extend_from_slice(data);
        self.process_input();
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = buf.len().min(self.out_buf.len());
        buf[..n].copy_from_slice(&self.out_buf[..n]);
        self.out_buf.drain(..n);
        // n == 0 is the timeout signal, exactly like a quiet serial line.
        Ok(n)
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::commands::Command;
    use crate::protocol::frame::encode_command;

    fn exchange(sim: &mut ArgusSimulator, cmd: Command, arg: &[u8]) -> Vec<u8> {
        sim.write_all(&encode_command(cmd, arg)).unwrap();
        let mut buf = [0u8; 128];
        let n = sim.read(&mut buf).unwrap();
        buf[..n].to_vec()
    }

    #[test]
    fn test_query_produces_status_then_response() {
        let mut sim = ArgusSimulator::noiseless();
        let bytes = exchange(&mut sim, Command::GetVoltage, &[]);
        // Status frame first.
        assert_eq!(&bytes[..6], &[SOH, ID_STATUS, ACK, US, ACK, EOT]);
        // Then a binary response with a 4-byte payload.
        assert_eq!(bytes[6], SOH);
        assert_eq!(bytes[7], ID_BINARY);
        assert_eq!(bytes[8], 4);
        assert_eq!(LittleEndian::read_i32(&bytes[10..14]), -12_000_000);
    }

    #[test]
    fn test_unknown_command_naks() {
        let mut sim = ArgusSimulator::noiseless();
        sim.write_all(&[SOH, ID_COMMAND, 0, 0x55, EOT]).unwrap();
        let mut buf = [0u8; 16];
        let n = sim.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], &[SOH, ID_STATUS, NAK, US, NAK, EOT]);
    }

    #[test]
    fn test_empty_read_signals_timeout() {
        let mut sim = ArgusSimulator::noiseless();
        let mut buf = [0u8; 16];
        assert_eq!(sim.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_output_model_zero_past_ideal_offset() {
        let mut sim = ArgusSimulator::noiseless();
        sim.voltage_uv = -30_000_000;
        let ideal = ArgusSimulator::ideal_offset(30.0).round() as u32;

        sim.fe_offset = ideal - 10;
        assert_eq!(sim.output_counts(), 10);
        sim.fe_offset = ideal;
        assert_eq!(sim.output_counts(), 0);
        sim.fe_offset = ideal + 50;
        assert_eq!(sim.output_counts(), 0);
    }

    #[test]
    fn test_cold_plate_converges_on_target() {
        let mut sim = ArgusSimulator::noiseless();
        // Target 28 C, plate at 24 C: four reads to converge at 1 C/read.
        exchange(&mut sim, Command::SetMppcTemp, &28_000_000i32.to_le_bytes());
        for _ in 0..4 {
            exchange(&mut sim, Command::GetColdPlateTemp, &[]);
        }
        assert_eq!(sim.cold_plate_uc, 28_000_000);
    }

    #[test]
    fn test_signal_type_selection() {
        let mut sim = ArgusSimulator::noiseless();
        exchange(&mut sim, Command::SetSingleEndedOutput, &[0x00]);
        exchange(&mut sim, Command::SetDifferentialOutput, &[0xFF]);
        assert!(!sim.is_single_ended());
        exchange(&mut sim, Command::SetDifferentialOutput, &[0x00]);
        exchange(&mut sim, Command::SetSingleEndedOutput, &[0xFF]);
        assert!(sim.is_single_ended());
    }

    #[test]
    fn test_partial_frame_is_buffered() {
        let mut sim = ArgusSimulator::noiseless();
        let frame = encode_command(Command::GetGain, &[]);
        sim.write_all(&frame[..2]).unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(sim.read(&mut buf).unwrap(), 0);
        sim.write_all(&frame[2..]).unwrap();
        assert!(sim.read(&mut buf).unwrap() > 0);
    }
}
