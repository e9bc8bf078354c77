//! Argus computer board implementation.
//!
//! High-level typed interface on top of the framed command client: unit
//! scaling, range policy, device discovery, the single-flight voltage
//! adjustment worker, and the telemetry poller.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use byteorder::{ByteOrder, LittleEndian};
use log::{info, warn};

use crate::device::client::CommandClient;
use crate::error::{DetectorError, Result};
use crate::protocol::commands::{Channel, Command};
use crate::protocol::frame::Payload;
use crate::transport::serial::candidate_ports;
use crate::transport::{ArgusSimulator, SerialTransport, Transport};

// =============================================================================
// Constants
// =============================================================================

/// Case-insensitive marker expected in the identity string of a real board.
const VENDOR_MARKER: &str = "argus";

/// Settle time between correction steps of the voltage adjustment loop.
const ADJUST_SETTLE: Duration = Duration::from_millis(100);

/// Residual bias error considered settled, in volts.
const ADJUST_TOLERANCE: f64 = 0.01;

/// Safe operating range of the MPPC temperature, in °C.
pub const SAFERANGE_MPPC_TEMP: (f64, f64) = (-20.0, 20.0);
/// Safe operating range of the heat sink temperature, in °C.
pub const SAFERANGE_HEATSINK_TEMP: (f64, f64) = (-20.0, 40.0);
/// Safe operating range of the vacuum pressure, in mbar.
pub const SAFERANGE_VACUUM_PRESSURE: (f64, f64) = (0.0, 5.0);

// =============================================================================
// Hardware revision
// =============================================================================

/// Board revision, deciding the maximum safe bias voltage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareRevision {
    /// Original hardware, rated up to 70 V.
    Legacy,
    /// Rev. 2 boards with the 37 V front end.
    Rev2,
}

impl HardwareRevision {
    /// Detect the revision from the hardware identity string.
    pub fn from_version(version: &str) -> Self {
        if version.to_lowercase().contains("rev2") {
            HardwareRevision::Rev2
        } else {
            HardwareRevision::Legacy
        }
    }

    /// Maximum safe bias voltage for this revision, in volts.
    pub const fn max_voltage(&self) -> f64 {
        match self {
            HardwareRevision::Legacy => 70.0,
            HardwareRevision::Rev2 => 37.0,
        }
    }
}

// =============================================================================
// Telemetry
// =============================================================================

/// One snapshot of the live device readings.
#[derive(Debug, Clone, PartialEq)]
pub struct Telemetry {
    pub output: f64,
    pub gain: f64,
    pub offset: f64,
    pub voltage: f64,
    pub channel: Channel,
    pub mppc_temp: f64,
    pub hot_plate_temp: f64,
    pub vacuum_pressure: f64,
    pub error_code: u8,
    pub tec_current: i32,
}

impl std::fmt::Display for Telemetry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "output: {:6.2} %  gain: {:6.2} %  offset: {:6.2} %  voltage: {:6.2} V  \
             channel: {}  mppc: {:6.2} C  sink: {:6.2} C  pressure: {:6.3} mbar  \
             error: {}  tec: {}",
            self.output,
            self.gain,
            self.offset,
            self.voltage,
            self.channel,
            self.mppc_temp,
            self.hot_plate_temp,
            self.vacuum_pressure,
            self.error_code,
            self.tec_current,
        )
    }
}

// =============================================================================
// ArgusBoard
// =============================================================================

struct WorkerTask {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl WorkerTask {
    fn cancel_and_join(self) {
        self.stop.store(true, Ordering::Relaxed);
        let _ = self.handle.join();
    }
}

struct Inner {
    client: CommandClient,
    revision: HardwareRevision,
    port_name: Option<String>,
    adjust: Mutex<Option<WorkerTask>>,
    monitor: Mutex<Option<WorkerTask>>,
}

/// Handle to one detector. Cheap to clone; all clones share the transport
/// and its exclusive-access lock.
///
/// # Example
///
/// ```no_run
/// use argus_rust_detector::device::ArgusBoard;
///
/// let board = ArgusBoard::open()?;
/// println!("connected to {}", board.hardware_version()?);
/// board.set_voltage(30.0)?;
/// println!("bias: {:.2} V", board.get_voltage()?);
/// # Ok::<(), argus_rust_detector::error::DetectorError>(())
/// ```
#[derive(Clone)]
pub struct ArgusBoard {
    inner: Arc<Inner>,
}

impl ArgusBoard {
    /// Probe all serial ports and open the first one that identifies as an
    /// Argus board.
    ///
    /// # Errors
    /// Returns `DeviceNotFound` if no candidate port qualifies.
    pub fn open() -> Result<Self> {
        for port in candidate_ports()? {
            match Self::open_port(&port) {
                Ok(board) => return Ok(board),
                Err(e) => {
                    info!("skipping port {port}, not a compatible device: {e}");
                }
            }
        }
        Err(DetectorError::DeviceNotFound)
    }

    /// Open a specific serial port.
    pub fn open_port(path: &str) -> Result<Self> {
        let transport = SerialTransport::open(path)?;
        Self::from_transport(Box::new(transport), Some(path.to_string()))
    }

    /// Connect to a fresh in-memory simulator.
    pub fn simulated() -> Result<Self> {
        Self::from_transport(Box::new(ArgusSimulator::new()), None)
    }

    /// Connect to a caller-configured simulator (noise settings, faults).
    pub fn with_simulator(sim: ArgusSimulator) -> Result<Self> {
        Self::from_transport(Box::new(sim), None)
    }

    /// Build a board session on any transport, verifying the identity string
    /// and detecting the hardware revision.
    pub fn from_transport(transport: Box<dyn Transport>, port_name: Option<String>) -> Result<Self> {
        let client = CommandClient::new(transport);
        let identity = query_text(&client, Command::GetHardwareVersion)?;
        if !identity.to_lowercase().contains(VENDOR_MARKER) {
            return Err(DetectorError::InvalidResponse(format!(
                "device does not identify as an Argus board: {identity:?}"
            )));
        }
        let revision = HardwareRevision::from_version(&identity);
        info!("connected to {identity:?} ({revision:?})");

        Ok(Self {
            inner: Arc::new(Inner {
                client,
                revision,
                port_name,
                adjust: Mutex::new(None),
                monitor: Mutex::new(None),
            }),
        })
    }

    /// The serial port this session owns, if it is a physical one.
    pub fn port_name(&self) -> Option<&str> {
        self.inner.port_name.as_deref()
    }

    pub fn revision(&self) -> HardwareRevision {
        self.inner.revision
    }

    // =========================================================================
    // Identity strings
    // =========================================================================

    pub fn hardware_version(&self) -> Result<String> {
        query_text(&self.inner.client, Command::GetHardwareVersion)
    }

    pub fn firmware_version(&self) -> Result<String> {
        query_text(&self.inner.client, Command::GetFirmwareVersion)
    }

    pub fn serial_number(&self) -> Result<String> {
        query_text(&self.inner.client, Command::GetSerialNumber)
    }

    pub fn frontend_hardware_version(&self) -> Result<String> {
        query_text(&self.inner.client, Command::GetFrontendHardwareVersion)
    }

    pub fn frontend_firmware_version(&self) -> Result<String> {
        query_text(&self.inner.client, Command::GetFrontendFirmwareVersion)
    }

    pub fn frontend_serial_number(&self) -> Result<String> {
        query_text(&self.inner.client, Command::GetFrontendSerialNumber)
    }

    // =========================================================================
    // Bias voltage
    // =========================================================================

    /// Set the bias voltage in volts.
    ///
    /// Valid range is `[0, max_voltage]` for the detected revision;
    /// out-of-range values are logged and clamped, not rejected. The device
    /// stores the bias as a negative microvolt magnitude.
    pub fn set_voltage(&self, volts: f64) -> Result<()> {
        let max = self.inner.revision.max_voltage();
        let mut volts = volts;
        if !(0.0..=max).contains(&volts) {
            warn!("voltage {volts:.6} out of range 0 <= v <= {max}; clamping");
            volts = volts.clamp(0.0, max);
        }
        self.set_i32(Command::SetVoltage, (-volts * 1e6) as i32)
    }

    /// Current bias voltage in volts.
    pub fn get_voltage(&self) -> Result<f64> {
        Ok(-(self.query_i32(Command::GetVoltage)? as f64) * 1e-6)
    }

    /// Closed-loop bias adjustment toward `target`, running in its own
    /// worker thread.
    ///
    /// The raw set→get mapping is non-linear near the extremes, so the worker
    /// repeatedly sets a compensated set-point, waits for the supply to
    /// settle, measures, and folds the residual error into the next
    /// set-point. Starting a new adjustment cancels and joins any previous
    /// one; at most one adjustment runs per board.
    pub fn adjust_voltage(&self, target: f64, timeout: Duration) -> Result<()> {
        let mut slot = self.inner.adjust.lock().expect("adjust lock poisoned");
        if let Some(previous) = slot.take() {
            previous.cancel_and_join();
        }

        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let board = self.clone();
        let handle = std::thread::spawn(move || {
            if let Err(e) = board.run_voltage_adjustment(target, timeout, &flag) {
                warn!("voltage adjustment toward {target:.2} V failed: {e}");
            }
        });
        *slot = Some(WorkerTask { stop, handle });
        Ok(())
    }

    /// Cancel a running voltage adjustment, if any, and wait for it.
    pub fn stop_adjustment(&self) {
        let task = self.inner.adjust.lock().expect("adjust lock poisoned").take();
        if let Some(task) = task {
            task.cancel_and_join();
        }
    }

    fn run_voltage_adjustment(
        &self,
        target: f64,
        timeout: Duration,
        stop: &AtomicBool,
    ) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut correction = 0.0;
        while !stop.load(Ordering::Relaxed) && Instant::now() < deadline {
            self.set_voltage(target + correction)?;
            std::thread::sleep(ADJUST_SETTLE);
            let measured = self.get_voltage()?;
            let residual = target - measured;
            if residual.abs() < ADJUST_TOLERANCE {
                break;
            }
            correction += residual;
        }
        Ok(())
    }

    // =========================================================================
    // Gain and offsets
    // =========================================================================

    /// Set the PGA gain as a percentage of the `[0.5, 64]` device range.
    /// Out-of-range percentages are logged and clamped.
    pub fn set_gain(&self, pct: f64) -> Result<()> {
        let mut pct = pct;
        if !(0.0..=100.0).contains(&pct) {
            warn!("gain {pct:.6} out of range 0 <= gain <= 100; clamping");
            pct = pct.clamp(0.0, 100.0);
        }
        let device = pct / 100.0 * 63.5 + 0.5;
        self.set_i32(Command::SetGain, (device * 1e6) as i32)
    }

    /// Current PGA gain as a percentage.
    pub fn get_gain(&self) -> Result<f64> {
        let device = self.query_i32(Command::GetGain)? as f64 * 1e-6;
        Ok((device - 0.5) / 63.5 * 100.0)
    }

    /// Set the coarse output offset as a percentage of the 12-bit code range.
    /// Out-of-range percentages are logged and clamped.
    pub fn set_offset(&self, pct: f64) -> Result<()> {
        let mut pct = pct;
        if !(0.0..=100.0).contains(&pct) {
            warn!("offset {pct:.6} out of range 0 <= offset <= 100; clamping");
            pct = pct.clamp(0.0, 100.0);
        }
        self.set_i32(Command::SetOffset, (pct / 100.0 * 4095.0) as i32)
    }

    /// Current coarse output offset as a percentage.
    pub fn get_offset(&self) -> Result<f64> {
        Ok(self.query_i32(Command::GetOffset)? as f64 / 4095.0 * 100.0)
    }

    /// Set the fine bias adjustment of the analog front end, raw 10-bit code.
    ///
    /// Unlike the percentage setters this is a hard validation: values above
    /// 1023 are rejected with `InvalidArgument` before any I/O occurs.
    pub fn set_frontend_offset(&self, value: u32) -> Result<()> {
        if value > 1023 {
            return Err(DetectorError::InvalidArgument(format!(
                "frontend offset must be between 0 and 1023, got {value}"
            )));
        }
        let mut b = [0u8; 4];
        LittleEndian::write_u32(&mut b, value);
        self.inner.client.send_command(Command::SetFrontendOffset, &b)
    }

    /// Current front-end offset code.
    pub fn get_frontend_offset(&self) -> Result<u32> {
        let payload = self.inner.client.send_query(Command::GetFrontendOffset, &[])?;
        Ok(LittleEndian::read_u32(expect_len(&payload, 4)?))
    }

    // =========================================================================
    // Temperatures and environment
    // =========================================================================

    /// Set the MPPC regulation target in °C; valid range `[-20, 70]`,
    /// clamped with a warning.
    pub fn set_mppc_temp(&self, celsius: f64) -> Result<()> {
        let mut celsius = celsius;
        if !(-20.0..=70.0).contains(&celsius) {
            warn!("temperature {celsius:.6} out of range -20 <= t <= 70; clamping");
            celsius = celsius.clamp(-20.0, 70.0);
        }
        self.set_i32(Command::SetMppcTemp, (celsius * 1e6) as i32)
    }

    /// MPPC regulation target in °C.
    pub fn get_mppc_temp(&self) -> Result<f64> {
        Ok(self.query_i32(Command::GetMppcTemp)? as f64 * 1e-6)
    }

    /// Cold plate (sensor side) temperature in °C.
    pub fn get_cold_plate_temp(&self) -> Result<f64> {
        Ok(self.query_i32(Command::GetColdPlateTemp)? as f64 * 1e-6)
    }

    /// Hot plate (heat sink) temperature in °C.
    pub fn get_hot_plate_temp(&self) -> Result<f64> {
        Ok(self.query_i32(Command::GetHotPlateTemp)? as f64 * 1e-6)
    }

    /// Vacuum pressure in mbar.
    pub fn get_vacuum_pressure(&self) -> Result<f64> {
        Ok(self.query_i32(Command::GetVacuumPressure)? as f64 * 1e-3)
    }

    /// TEC current, raw device units.
    pub fn get_tec_current(&self) -> Result<i32> {
        self.query_i32(Command::GetTecCurrent)
    }

    /// Device error status; 8 means everything OK.
    pub fn get_error_status(&self) -> Result<u8> {
        let payload = self.inner.client.send_query(Command::GetErrorStatus, &[])?;
        Ok(expect_len(&payload, 1)?[0])
    }

    // =========================================================================
    // Outputs and channel
    // =========================================================================

    /// Single-ended front-end output as a percentage of full scale. Negative
    /// readings indicate a hardware defect.
    pub fn get_output_single_ended(&self) -> Result<f64> {
        Ok(self.query_i32(Command::GetOutputSingleEnded)? as f64 / 4095.0 * 100.0)
    }

    /// Differential output, plus side, percentage of full scale.
    pub fn get_differential_plus(&self) -> Result<f64> {
        Ok(self.query_i32(Command::GetDifferentialPlus)? as f64 / 4095.0 * 100.0)
    }

    /// Differential output, minus side, percentage of full scale.
    pub fn get_differential_minus(&self) -> Result<f64> {
        Ok(self.query_i32(Command::GetDifferentialMinus)? as f64 / 4095.0 * 100.0)
    }

    /// Select single-ended or differential output signaling.
    pub fn set_signal_type(&self, single_ended: bool) -> Result<()> {
        if single_ended {
            self.inner.client.send_command(Command::SetDifferentialOutput, &[0x00])?;
            self.inner.client.send_command(Command::SetSingleEndedOutput, &[0xFF])
        } else {
            self.inner.client.send_command(Command::SetSingleEndedOutput, &[0x00])?;
            self.inner.client.send_command(Command::SetDifferentialOutput, &[0xFF])
        }
    }

    /// Currently selected color channel.
    pub fn get_channel(&self) -> Result<Channel> {
        let payload = self.inner.client.send_query(Command::GetChannel, &[])?;
        Channel::from_wire(expect_len(&payload, 1)?[0] as i8)
    }

    /// Select a color channel.
    pub fn set_channel(&self, channel: Channel) -> Result<()> {
        self.inner
            .client
            .send_command(Command::SetChannel, &[channel.code()])
    }

    // =========================================================================
    // Telemetry
    // =========================================================================

    /// Read one full telemetry snapshot.
    pub fn read_telemetry(&self) -> Result<Telemetry> {
        Ok(Telemetry {
            output: self.get_output_single_ended()?,
            gain: self.get_gain()?,
            offset: self.get_offset()?,
            voltage: self.get_voltage()?,
            channel: self.get_channel()?,
            mppc_temp: self.get_cold_plate_temp()?,
            hot_plate_temp: self.get_hot_plate_temp()?,
            vacuum_pressure: self.get_vacuum_pressure()?,
            error_code: self.get_error_status()?,
            tec_current: self.get_tec_current()?,
        })
    }

    /// Start the telemetry polling loop, replacing any previous one.
    ///
    /// The poller shares the command lock with every other caller, so it must
    /// be stopped before a calibration run takes over the device.
    pub fn start_monitoring<F>(&self, interval: Duration, mut on_sample: F)
    where
        F: FnMut(Telemetry) + Send + 'static,
    {
        let mut slot = self.inner.monitor.lock().expect("monitor lock poisoned");
        if let Some(previous) = slot.take() {
            previous.cancel_and_join();
        }

        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let board = self.clone();
        let handle = std::thread::spawn(move || {
            while !flag.load(Ordering::Relaxed) {
                match board.read_telemetry() {
                    Ok(sample) => {
                        check_safe_ranges(&sample);
                        on_sample(sample);
                    }
                    Err(e) => warn!("telemetry poll failed: {e}"),
                }
                std::thread::sleep(interval);
            }
        });
        *slot = Some(WorkerTask { stop, handle });
    }

    /// Stop the telemetry poller, if running, and wait for it.
    pub fn stop_monitoring(&self) {
        let task = self.inner.monitor.lock().expect("monitor lock poisoned").take();
        if let Some(task) = task {
            task.cancel_and_join();
        }
    }

    // =========================================================================
    // Private helpers
    // =========================================================================

    fn query_i32(&self, cmd: Command) -> Result<i32> {
        let payload = self.inner.client.send_query(cmd, &[])?;
        Ok(LittleEndian::read_i32(expect_len(&payload, 4)?))
    }

    fn set_i32(&self, cmd: Command, value: i32) -> Result<()> {
        let mut b = [0u8; 4];
        LittleEndian::write_i32(&mut b, value);
        self.inner.client.send_command(cmd, &b)
    }
}

fn check_safe_ranges(sample: &Telemetry) {
    let checks = [
        ("MPPC temperature", sample.mppc_temp, SAFERANGE_MPPC_TEMP),
        ("heat sink temperature", sample.hot_plate_temp, SAFERANGE_HEATSINK_TEMP),
        ("vacuum pressure", sample.vacuum_pressure, SAFERANGE_VACUUM_PRESSURE),
    ];
    for (name, value, (lo, hi)) in checks {
        if !(lo..=hi).contains(&value) {
            warn!("{name} ({value:.2}) is outside the safe range {lo} -> {hi}");
        }
    }
}

fn expect_len<'a>(payload: &'a Payload, len: usize) -> Result<&'a [u8]> {
    let bytes = payload.as_bytes();
    if bytes.len() != len {
        return Err(DetectorError::InvalidResponse(format!(
            "expected {len}-byte payload, got {} bytes",
            bytes.len()
        )));
    }
    Ok(bytes)
}

fn query_text(client: &CommandClient, cmd: Command) -> Result<String> {
    let payload = client.send_query(cmd, &[])?;
    let text = match payload {
        Payload::Text(s) => s,
        Payload::Bytes(b) => b.iter().map(|&c| c as char).collect(),
    };
    Ok(text.trim_end_matches('x').trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn board() -> ArgusBoard {
        ArgusBoard::with_simulator(ArgusSimulator::noiseless()).unwrap()
    }

    #[test]
    fn test_identity_and_revision() {
        let board = board();
        assert!(board.hardware_version().unwrap().contains("ARGUS"));
        assert_eq!(board.revision(), HardwareRevision::Rev2);
        assert_eq!(board.revision().max_voltage(), 37.0);
    }

    #[test]
    fn test_legacy_revision_detection() {
        let sim = ArgusSimulator::noiseless().with_identity("ARGUS-CB MK1");
        let board = ArgusBoard::with_simulator(sim).unwrap();
        assert_eq!(board.revision(), HardwareRevision::Legacy);
        assert_eq!(board.revision().max_voltage(), 70.0);
    }

    #[test]
    fn test_rejects_foreign_identity() {
        let sim = ArgusSimulator::noiseless().with_identity("SOME OTHER INSTRUMENT");
        assert!(ArgusBoard::with_simulator(sim).is_err());
    }

    #[test]
    fn test_voltage_roundtrip_exact() {
        let board = board();
        board.set_voltage(20.0).unwrap();
        let v = board.get_voltage().unwrap();
        assert!((v - 20.0).abs() < 1e-9, "got {v}");
    }

    #[test]
    fn test_voltage_clamped_to_revision_limit() {
        let board = board(); // Rev2, 37 V max
        board.set_voltage(50.0).unwrap();
        assert!((board.get_voltage().unwrap() - 37.0).abs() < 1e-9);
        board.set_voltage(-3.0).unwrap();
        assert!(board.get_voltage().unwrap().abs() < 1e-9);
    }

    #[test]
    fn test_gain_roundtrip_within_one_step() {
        let board = board();
        // The device-side integer encoding quantizes to 1e-6 device units,
        // i.e. well below 1e-4 percentage points.
        for pct in 0..=100 {
            let pct = pct as f64;
            board.set_gain(pct).unwrap();
            let got = board.get_gain().unwrap();
            assert!((got - pct).abs() < 1e-4, "pct {pct}: got {got}");
        }
    }

    #[test]
    fn test_gain_clamped() {
        let board = board();
        board.set_gain(150.0).unwrap();
        assert!((board.get_gain().unwrap() - 100.0).abs() < 1e-4);
    }

    #[test]
    fn test_offset_roundtrip_within_one_step() {
        let board = board();
        let step = 100.0 / 4095.0;
        for pct in [0.0, 25.0, 50.0, 99.0, 100.0] {
            board.set_offset(pct).unwrap();
            let got = board.get_offset().unwrap();
            assert!((got - pct).abs() <= step, "pct {pct}: got {got}");
        }
    }

    #[test]
    fn test_frontend_offset_strict_bounds() {
        let board = board();
        board.set_frontend_offset(0).unwrap();
        assert_eq!(board.get_frontend_offset().unwrap(), 0);
        board.set_frontend_offset(1023).unwrap();
        assert_eq!(board.get_frontend_offset().unwrap(), 1023);

        for bad in [1024, 4000, u32::MAX] {
            let err = board.set_frontend_offset(bad).unwrap_err();
            assert!(matches!(err, DetectorError::InvalidArgument(_)), "{bad}");
            // The rejected value never reached the device.
            assert_eq!(board.get_frontend_offset().unwrap(), 1023);
        }
    }

    #[test]
    fn test_channel_roundtrip() {
        let board = board();
        for ch in Channel::COLORS {
            board.set_channel(ch).unwrap();
            assert_eq!(board.get_channel().unwrap(), ch);
        }
    }

    #[test]
    fn test_temperature_target_and_cold_plate() {
        let board = board();
        board.set_mppc_temp(25.0).unwrap();
        assert!((board.get_mppc_temp().unwrap() - 25.0).abs() < 1e-6);
        // Cold plate crawls to the target over a few reads.
        let mut last = 0.0;
        for _ in 0..5 {
            last = board.get_cold_plate_temp().unwrap();
        }
        assert!((last - 25.0).abs() < 1e-6, "got {last}");
    }

    #[test]
    fn test_error_status_ok() {
        let board = board();
        assert_eq!(board.get_error_status().unwrap(), 8);
    }

    #[test]
    fn test_telemetry_snapshot() {
        let board = board();
        let sample = board.read_telemetry().unwrap();
        assert_eq!(sample.channel, Channel::Red);
        assert_eq!(sample.error_code, 8);
        assert!((sample.vacuum_pressure - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_adjust_voltage_single_flight() {
        let board = board();
        board.adjust_voltage(30.0, Duration::from_secs(5)).unwrap();
        // Superseding adjustment cancels and joins the previous one.
        board.adjust_voltage(20.0, Duration::from_secs(5)).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            let v = board.get_voltage().unwrap();
            if (v - 20.0).abs() < 0.1 {
                break;
            }
            assert!(Instant::now() < deadline, "did not settle, at {v} V");
            std::thread::sleep(Duration::from_millis(10));
        }
        board.stop_adjustment();
    }
}
