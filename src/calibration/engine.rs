//! Calibration sweep engine.
//!
//! For each (temperature, channel, voltage) combination the engine searches
//! for the minimal front-end offset in `[0, 1023]` that drives the output
//! voltage to zero. The output/offset relationship is monotonic
//! non-increasing and flat at zero past a threshold, so the first voltage of
//! a channel uses an exhaustive binary search and subsequent voltages an
//! adaptive incremental search seeded from the previous result.
//!
//! Results are appended row by row to an underscore-prefixed file which is
//! renamed to its final name only on full completion: a file without the
//! prefix is guaranteed complete, an interrupted run leaves only the prefixed
//! one.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use crate::calibration::table::TABLE_HEADER;
use crate::device::ArgusBoard;
use crate::error::{DetectorError, Result};
use crate::measure::{StabilizeParams, await_set, await_set_stabilized, median, repeated_get};
use crate::protocol::commands::Channel;

/// Front-end offset search space (10-bit code).
pub const FE_OFFSET_RANGE: (u32, u32) = (0, 1023);

/// Attempts at the initial binary search before giving up on a run.
const INITIAL_SEARCH_ATTEMPTS: u32 = 5;

// =============================================================================
// Configuration
// =============================================================================

/// Bias voltage sweep as (min, max, step); the sweep covers
/// `min, min+step, ...` up to but excluding `max`, plus `max` itself.
#[derive(Debug, Clone, Copy)]
pub struct VoltageRange {
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

impl VoltageRange {
    pub fn new(min: f64, max: f64, step: f64) -> Self {
        Self { min, max, step }
    }

    /// The ascending list of target voltages.
    pub fn targets(&self) -> Vec<f64> {
        let mut targets = arange(self.min, self.max, self.step);
        targets.push(self.max);
        targets
    }
}

/// Values from `min` (inclusive) to `max` (exclusive) in `step` increments.
pub fn arange(min: f64, max: f64, step: f64) -> Vec<f64> {
    let mut values = Vec::new();
    let mut current = min;
    while current < max {
        values.push(current);
        current += step;
    }
    values
}

/// Parameters of one calibration run.
#[derive(Debug, Clone)]
pub struct CalibrationConfig {
    /// Operating temperatures in °C.
    pub temperatures: Vec<f64>,
    /// Color channels to calibrate.
    pub channels: Vec<Channel>,
    /// Bias voltage sweep.
    pub voltage_range: VoltageRange,
    /// Output file override; the default lives in the platform data
    /// directory, named after the front-end serial number and a timestamp.
    pub output_path: Option<PathBuf>,
    /// Step-back distance of the binary search convergence check. The check
    /// assumes noise amplitude stays below this many offset steps.
    pub lookback: u32,
    /// Wait after an offset change before sampling the output.
    pub settle: Duration,
    /// Delay between output samples.
    pub sample_interval: Duration,
    /// Output samples per reading (the median is used).
    pub samples: usize,
    /// Polling interval of the stabilization waits.
    pub poll_interval: Duration,
    /// Deadline of the stabilization waits.
    pub poll_timeout: Duration,
    /// Deadline of one closed-loop voltage adjustment.
    pub adjust_timeout: Duration,
}

impl CalibrationConfig {
    pub fn new(voltage_range: VoltageRange) -> Self {
        Self {
            temperatures: vec![25.0],
            channels: Channel::COLORS.to_vec(),
            voltage_range,
            output_path: None,
            lookback: 3,
            settle: Duration::from_millis(200),
            sample_interval: Duration::from_millis(30),
            samples: 5,
            poll_interval: Duration::from_millis(500),
            poll_timeout: Duration::from_secs(120),
            adjust_timeout: Duration::from_secs(60),
        }
    }

    fn stabilize(&self, tolerance: f64) -> StabilizeParams {
        StabilizeParams {
            tolerance,
            repeats: 1,
            interval: self.poll_interval,
            timeout: self.poll_timeout,
        }
    }
}

/// Result of one offset search.
///
/// Cancellation and genuine failure need different reactions from the
/// caller, so they are distinct values rather than errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchOutcome {
    /// Minimal zero-output offset found.
    Converged(u32),
    /// The stop signal was raised during the search.
    Aborted,
    /// The search could not converge.
    Failed,
}

// =============================================================================
// Offset searches
// =============================================================================

fn set_offset_stabilized(board: &ArgusBoard, config: &CalibrationConfig, value: u32) -> Result<()> {
    await_set_stabilized(
        |v| board.set_frontend_offset(v as u32),
        || board.get_frontend_offset().map(|v| v as f64),
        value as f64,
        &config.stabilize(0.1),
    )?;
    Ok(())
}

/// Median of several output readings after the configured settle time.
fn sample_output(board: &ArgusBoard, config: &CalibrationConfig) -> Result<f64> {
    std::thread::sleep(config.settle);
    let samples = repeated_get(
        || board.get_output_single_ended(),
        config.samples,
        config.sample_interval,
    )?;
    Ok(median(&samples))
}

/// Binary search for the minimal offset with zero output.
///
/// A zero reading alone is not enough: the flat region is wide, so the
/// candidate is confirmed by stepping back `lookback` codes and requiring a
/// non-zero reading there. A negative reading anywhere is a hardware fault
/// and aborts immediately.
fn find_zero_offset_binary(
    board: &ArgusBoard,
    range: (u32, u32),
    config: &CalibrationConfig,
    stop: &AtomicBool,
) -> Result<SearchOutcome> {
    let (mut min_offset, mut max_offset) = range;

    loop {
        if stop.load(Ordering::Relaxed) {
            return Ok(SearchOutcome::Aborted);
        }
        if min_offset == max_offset {
            warn!("binary search bounds converged at {max_offset} without a confirmed edge");
            return Ok(SearchOutcome::Converged(max_offset));
        }

        let candidate = (min_offset + max_offset) / 2;
        // The convergence check looks back below the candidate, so offsets
        // within lookback of zero cannot be confirmed.
        if candidate <= config.lookback {
            return Ok(SearchOutcome::Failed);
        }

        set_offset_stabilized(board, config, candidate)?;
        let output = sample_output(board, config)?;
        debug!("offset {candidate}: output {output:.4}");

        if output == 0.0 {
            // Somewhere at or above the edge; confirm by stepping back.
            set_offset_stabilized(board, config, candidate - config.lookback)?;
            let check = sample_output(board, config)?;
            if check > 0.0 {
                return Ok(SearchOutcome::Converged(candidate));
            } else if check < 0.0 {
                error!("negative output voltage during calibration; check the hardware for defects");
                return Err(DetectorError::HardwareFault(check));
            }
            // Still flat below the candidate: the edge is further down.
            max_offset = candidate;
        } else if output > 0.0 {
            min_offset = candidate;
        } else {
            error!("negative output voltage during calibration; check the hardware for defects");
            return Err(DetectorError::HardwareFault(output));
        }
    }
}

/// Initial offset search for the first voltage of a channel.
///
/// The first operating voltage is the least noisy, but the initial point is
/// critical, so a failed binary search is retried up to five times.
fn find_initial_fe_offset(
    board: &ArgusBoard,
    config: &CalibrationConfig,
    stop: &AtomicBool,
) -> Result<SearchOutcome> {
    for attempt in 1..=INITIAL_SEARCH_ATTEMPTS {
        debug!("attempt {attempt} to find the initial offset");
        match find_zero_offset_binary(board, FE_OFFSET_RANGE, config, stop)? {
            SearchOutcome::Failed => continue,
            outcome => return Ok(outcome),
        }
    }
    error!("no initial offset found after {INITIAL_SEARCH_ATTEMPTS} attempts; check the hardware for defects");
    Ok(SearchOutcome::Failed)
}

/// Incremental offset search for subsequent voltages of a channel.
///
/// The minimal offset grows with the operating voltage, and the growth is
/// near-exponential, so the search seeds at the previous offset plus 70% of
/// the previous inter-voltage gap (ignored when the gap is small enough to
/// be noise) and then steps by `sqrt(gap)` until the output reads zero.
fn find_subsequent_fe_offset(
    board: &ArgusBoard,
    seed: u32,
    previous_gap: i64,
    config: &CalibrationConfig,
    stop: &AtomicBool,
) -> Result<SearchOutcome> {
    let shift = if previous_gap < 10 {
        0
    } else {
        (previous_gap as f64 * 0.7) as i64
    };
    let mut candidate = seed as i64 + shift;

    loop {
        if stop.load(Ordering::Relaxed) {
            return Ok(SearchOutcome::Aborted);
        }
        if candidate >= FE_OFFSET_RANGE.1 as i64 {
            warn!("incremental search did not converge within range");
            return Ok(SearchOutcome::Converged(FE_OFFSET_RANGE.1));
        }

        set_offset_stabilized(board, config, candidate as u32)?;
        let output = sample_output(board, config)?;
        debug!("offset {candidate}: output {output:.4}");
        if output == 0.0 {
            return Ok(SearchOutcome::Converged(candidate as u32));
        } else if output < 0.0 {
            error!("negative output voltage during calibration; check the hardware for defects");
            return Err(DetectorError::HardwareFault(output));
        }

        let step = (previous_gap.max(0) as f64).sqrt() as i64;
        candidate += step.max(1);
    }
}

// =============================================================================
// Sweep runner
// =============================================================================

/// Run a full calibration sweep.
///
/// Stops the telemetry poller first (the two would contend for the device),
/// forces maximum gain and zero coarse offset, then walks the configured
/// temperatures, channels, and voltages. Each resolved offset is appended to
/// the in-progress file immediately; the file is renamed to its final name
/// only when every combination completed. An abort via `stop` or a failed
/// initial search returns without renaming, leaving the prefixed file as
/// evidence of partial progress.
pub fn run(board: &ArgusBoard, config: &CalibrationConfig, stop: &AtomicBool) -> Result<()> {
    board.stop_monitoring();
    let result = run_sweep(board, config, stop);
    board.stop_adjustment();
    result
}

fn run_sweep(board: &ArgusBoard, config: &CalibrationConfig, stop: &AtomicBool) -> Result<()> {
    let final_path = resolve_output_path(board, config)?;
    let tmp_path = in_progress_path(&final_path);
    if let Some(parent) = final_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    // Max gain and zero coarse offset, the canonical operating point.
    await_set_stabilized(
        |g| board.set_gain(g),
        || board.get_gain(),
        100.0,
        &config.stabilize(2.0),
    )?;
    await_set_stabilized(
        |o| board.set_offset(o),
        || board.get_offset(),
        0.0,
        &config.stabilize(1.0),
    )?;

    let targets = config.voltage_range.targets();
    let mut file = File::create(&tmp_path)?;
    writeln!(file, "{TABLE_HEADER}")?;
    drop(file);

    let total = config.temperatures.len() * config.channels.len() * targets.len();
    let mut completed = 0usize;
    let mut total_runtime = Duration::ZERO;

    for &temperature in &config.temperatures {
        info!("switching temperature to {temperature} C");
        await_set_stabilized(
            |t| board.set_mppc_temp(t),
            || board.get_cold_plate_temp(),
            temperature,
            &config.stabilize(0.1),
        )?;

        for &channel in &config.channels {
            info!("switching channel to {channel}");
            await_set(
                |c| board.set_channel(c),
                || board.get_channel(),
                channel,
                config.poll_interval,
                config.poll_timeout,
            )?;

            let mut previous_offset = 0u32;
            let mut previous_gap = 0i64;
            for (i, &voltage) in targets.iter().enumerate() {
                let point_start = Instant::now();
                info!("switching operating voltage to {voltage} V");
                await_set_stabilized(
                    |v| board.adjust_voltage(v, config.adjust_timeout),
                    || board.get_voltage(),
                    voltage,
                    &config.stabilize(0.1),
                )?;

                let outcome = if i == 0 {
                    find_initial_fe_offset(board, config, stop)?
                } else {
                    find_subsequent_fe_offset(board, previous_offset, previous_gap, config, stop)?
                };
                let fe_offset = match outcome {
                    SearchOutcome::Converged(offset) => offset,
                    SearchOutcome::Aborted => {
                        info!("calibration aborted; partial results in {}", tmp_path.display());
                        return Ok(());
                    }
                    SearchOutcome::Failed => {
                        error!("calibration abandoned; partial results in {}", tmp_path.display());
                        return Ok(());
                    }
                };
                if i > 0 {
                    previous_gap = fe_offset as i64 - previous_offset as i64;
                }
                previous_offset = fe_offset;
                info!("converged at offset {fe_offset}");

                append_entry(&tmp_path, board, temperature, channel, voltage, fe_offset)?;

                completed += 1;
                total_runtime += point_start.elapsed();
                let remaining =
                    total_runtime.as_secs_f64() * (total as f64 / completed as f64 - 1.0);
                info!(
                    "{completed}/{total} points, {:.0} s elapsed, about {remaining:.0} s left",
                    total_runtime.as_secs_f64()
                );
            }
        }
    }

    // Dropping the underscore prefix atomically marks the run complete.
    fs::rename(&tmp_path, &final_path)?;
    info!("calibration complete: {}", final_path.display());
    Ok(())
}

fn append_entry(
    path: &Path,
    board: &ArgusBoard,
    temperature_target: f64,
    channel: Channel,
    voltage_target: f64,
    fe_offset: u32,
) -> Result<()> {
    let temperature = board.get_cold_plate_temp()?;
    let voltage = board.get_voltage()?;
    let mut file = OpenOptions::new().append(true).open(path)?;
    writeln!(
        file,
        "{temperature_target:.2}\t{temperature:.2}\t{channel}\t{voltage_target:.2}\t{voltage:.2}\t{fe_offset}"
    )?;
    Ok(())
}

fn resolve_output_path(board: &ArgusBoard, config: &CalibrationConfig) -> Result<PathBuf> {
    if let Some(path) = &config.output_path {
        return Ok(path.clone());
    }
    let serial = board.frontend_serial_number().unwrap_or_else(|_| "unknown".into());
    let timestamp = chrono::Local::now().format("%Y-%m-%d_%H-%M");
    let dir = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("argus");
    Ok(dir.join(format!("argus-calibration-{serial}-{timestamp}.feo.tsv")))
}

fn in_progress_path(final_path: &Path) -> PathBuf {
    let name = final_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    final_path.with_file_name(format!("_{name}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ArgusSimulator;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;

    fn fast_config(output: PathBuf) -> CalibrationConfig {
        CalibrationConfig {
            temperatures: vec![25.0],
            channels: vec![Channel::Green],
            voltage_range: VoltageRange::new(30.0, 37.0, 1.0),
            output_path: Some(output),
            lookback: 3,
            settle: Duration::from_millis(1),
            sample_interval: Duration::from_millis(1),
            samples: 5,
            poll_interval: Duration::from_millis(1),
            poll_timeout: Duration::from_secs(5),
            adjust_timeout: Duration::from_secs(5),
        }
    }

    fn read_rows(path: &Path) -> Vec<Vec<String>> {
        let content = fs::read_to_string(path).unwrap();
        content
            .lines()
            .skip(1)
            .map(|l| l.split('\t').map(str::to_string).collect())
            .collect()
    }

    #[test]
    fn test_arange() {
        assert_eq!(arange(30.0, 37.0, 1.0).len(), 7);
        assert_eq!(arange(30.0, 30.0, 1.0).len(), 0);
        let targets = VoltageRange::new(30.0, 37.0, 1.0).targets();
        assert_eq!(targets.len(), 8);
        assert_eq!(*targets.last().unwrap(), 37.0);
    }

    #[test]
    fn test_run_matches_simulator_model() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("calibration.feo.tsv");
        let board = ArgusBoard::with_simulator(ArgusSimulator::noiseless()).unwrap();
        let stop = AtomicBool::new(false);

        run(&board, &fast_config(output.clone()), &stop).unwrap();

        assert!(output.exists());
        assert!(!in_progress_path(&output).exists());

        let rows = read_rows(&output);
        assert_eq!(rows.len(), 8);
        let mut previous = 0u32;
        for row in &rows {
            assert_eq!(row[2], "GREEN");
            let voltage_target: f64 = row[3].parse().unwrap();
            let fe_offset: u32 = row[5].parse().unwrap();
            let ideal = ArgusSimulator::ideal_offset(voltage_target);
            assert!(
                (fe_offset as f64 - ideal).abs() <= 5.0,
                "offset {fe_offset} too far from model {ideal:.1} at {voltage_target} V"
            );
            // The resolved offsets grow with the operating voltage.
            assert!(fe_offset >= previous, "{fe_offset} < {previous}");
            previous = fe_offset;
        }
    }

    #[test]
    fn test_abort_before_first_point() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("calibration.feo.tsv");
        let board = ArgusBoard::with_simulator(ArgusSimulator::noiseless()).unwrap();
        let stop = AtomicBool::new(true);

        run(&board, &fast_config(output.clone()), &stop).unwrap();

        assert!(!output.exists());
        let tmp = in_progress_path(&output);
        assert!(tmp.exists());
        assert!(read_rows(&tmp).is_empty());
    }

    #[test]
    fn test_abort_mid_sweep_keeps_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("calibration.feo.tsv");
        let board = ArgusBoard::with_simulator(ArgusSimulator::noiseless()).unwrap();
        let stop = Arc::new(AtomicBool::new(false));

        let mut config = fast_config(output.clone());
        // Slow the sampling down so the stop lands mid-sweep.
        config.settle = Duration::from_millis(40);

        let worker = {
            let board = board.clone();
            let stop = Arc::clone(&stop);
            std::thread::spawn(move || run(&board, &config, &stop))
        };
        std::thread::sleep(Duration::from_millis(400));
        stop.store(true, Ordering::Relaxed);
        worker.join().unwrap().unwrap();

        assert!(!output.exists());
        let tmp = in_progress_path(&output);
        assert!(tmp.exists());
        // Whatever made it to disk is complete rows only.
        for row in read_rows(&tmp) {
            assert_eq!(row.len(), 6);
            let _: u32 = row[5].parse().unwrap();
        }
    }

    #[test]
    fn test_negative_output_aborts_with_hardware_fault() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("calibration.feo.tsv");
        let sim = ArgusSimulator::noiseless().with_output_fault();
        let board = ArgusBoard::with_simulator(sim).unwrap();
        let stop = AtomicBool::new(false);

        let err = run(&board, &fast_config(output.clone()), &stop).unwrap_err();
        assert!(matches!(err, DetectorError::HardwareFault(_)));
        assert!(!output.exists());
    }
}
