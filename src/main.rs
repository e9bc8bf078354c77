//! Argus Detector Control CLI
//!
//! Command-line interface for monitoring, configuring, and calibrating the
//! Argus cooled MPPC detector.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use argus_rust_detector::calibration::{self, CalibrationConfig, CalibrationTable, VoltageRange};
use argus_rust_detector::config::DeviceConfig;
use argus_rust_detector::device::ArgusBoard;
use argus_rust_detector::protocol::Channel;
use argus_rust_detector::transport::serial::candidate_ports;

// =============================================================================
// CLI Arguments
// =============================================================================

/// Argus MPPC Detector Control Tool
#[derive(Parser, Debug)]
#[command(name = "argus-detector-cli")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Use the in-memory simulator instead of real hardware
    #[arg(long, global = true)]
    simulate: bool,

    /// Connect to a specific serial port instead of probing
    #[arg(long, global = true)]
    port: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List candidate serial ports
    List,

    /// Show device identity and firmware information
    Info,

    /// Show one telemetry snapshot
    Status,

    /// Continuously poll and print telemetry
    Monitor {
        /// Update interval in seconds
        #[arg(short, long, default_value = "1")]
        interval: u64,
    },

    /// Set the bias voltage in volts
    SetVoltage { volts: f64 },

    /// Set the PGA gain percentage (0-100)
    SetGain { pct: f64 },

    /// Set the coarse output offset percentage (0-100)
    SetOffset { pct: f64 },

    /// Set the raw front-end offset code (0-1023)
    SetFeOffset { value: u32 },

    /// Select the color channel: red, blue, green, or pan
    SetChannel { channel: String },

    /// Set the MPPC regulation temperature in Celsius
    SetTemperature { celsius: f64 },

    /// Select the output signal type: single-ended or differential
    Signal { kind: String },

    /// Run a front-end offset calibration sweep
    Calibrate {
        /// Target temperatures in Celsius, comma separated
        #[arg(long, default_value = "25")]
        temperatures: String,

        /// Channels to calibrate, comma separated
        #[arg(long, default_value = "red,blue,green,pan")]
        channels: String,

        /// Sweep start voltage in volts
        #[arg(long)]
        min: f64,

        /// Sweep end voltage in volts
        #[arg(long)]
        max: f64,

        /// Sweep step in volts
        #[arg(long, default_value = "1")]
        step: f64,

        /// Output file path (default: platform data directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Save the current device settings to the config file
    SaveConfig,

    /// Apply the saved config file to the device
    ApplyConfig,

    /// Interpolate a front-end offset from a calibration table
    Lookup {
        /// Calibration table file
        table: PathBuf,

        /// Temperature target of the rows to use
        #[arg(long, default_value = "25")]
        temperature: f64,

        /// Channel name
        #[arg(long)]
        channel: String,

        /// Operating voltage in volts
        #[arg(long)]
        voltage: f64,
    },
}

// =============================================================================
// Main
// =============================================================================

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    match args.command {
        Command::List => {
            let ports = candidate_ports().context("failed to enumerate serial ports")?;
            if ports.is_empty() {
                println!("No serial ports found.");
            }
            for port in ports {
                println!("{port}");
            }
            Ok(())
        }
        Command::Lookup {
            table,
            temperature,
            channel,
            voltage,
        } => {
            let channel = Channel::from_name(&channel)?;
            let table = CalibrationTable::load(&table).context("failed to load table")?;
            match table.frontend_offset(temperature, channel, voltage) {
                Some(offset) => println!("{offset:.1}"),
                None => bail!("no rows for {temperature} C / {channel}"),
            }
            Ok(())
        }
        command => {
            let board = connect(args.simulate, args.port.as_deref())?;
            run_command(&board, command)
        }
    }
}

fn connect(simulate: bool, port: Option<&str>) -> Result<ArgusBoard> {
    let board = if simulate {
        ArgusBoard::simulated()?
    } else if let Some(port) = port {
        ArgusBoard::open_port(port).with_context(|| format!("failed to open {port}"))?
    } else {
        ArgusBoard::open().context("no detector found")?
    };
    Ok(board)
}

fn stop_flag() -> Result<Arc<AtomicBool>> {
    let stop = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&stop);
    ctrlc::set_handler(move || {
        handler_flag.store(true, Ordering::Relaxed);
    })
    .context("failed to install Ctrl-C handler")?;
    Ok(stop)
}

fn run_command(board: &ArgusBoard, command: Command) -> Result<()> {
    match command {
        Command::Info => {
            println!("Hardware:          {}", board.hardware_version()?);
            println!("Firmware:          {}", board.firmware_version()?);
            println!("Serial number:     {}", board.serial_number()?);
            println!("Frontend hardware: {}", board.frontend_hardware_version()?);
            println!("Frontend firmware: {}", board.frontend_firmware_version()?);
            println!("Frontend serial:   {}", board.frontend_serial_number()?);
            println!("Revision:          {:?} (max {} V)", board.revision(), board.revision().max_voltage());
            if let Some(port) = board.port_name() {
                println!("Port:              {port}");
            }
        }

        Command::Status => {
            println!("{}", board.read_telemetry()?);
        }

        Command::Monitor { interval } => {
            let stop = stop_flag()?;
            board.start_monitoring(Duration::from_secs(interval), |sample| {
                println!("{sample}");
            });
            println!("Monitoring... press Ctrl-C to stop.");
            while !stop.load(Ordering::Relaxed) {
                std::thread::sleep(Duration::from_millis(100));
            }
            board.stop_monitoring();
        }

        Command::SetVoltage { volts } => {
            board.set_voltage(volts)?;
            println!("Bias voltage: {:.2} V", board.get_voltage()?);
        }

        Command::SetGain { pct } => {
            board.set_gain(pct)?;
            println!("Gain: {:.2} %", board.get_gain()?);
        }

        Command::SetOffset { pct } => {
            board.set_offset(pct)?;
            println!("Offset: {:.2} %", board.get_offset()?);
        }

        Command::SetFeOffset { value } => {
            board.set_frontend_offset(value)?;
            println!("Front-end offset: {}", board.get_frontend_offset()?);
        }

        Command::SetChannel { channel } => {
            board.set_channel(Channel::from_name(&channel)?)?;
            println!("Channel: {}", board.get_channel()?);
        }

        Command::SetTemperature { celsius } => {
            board.set_mppc_temp(celsius)?;
            println!("MPPC target: {:.2} C", board.get_mppc_temp()?);
        }

        Command::Signal { kind } => {
            let single_ended = match kind.to_lowercase().as_str() {
                "single-ended" | "se" => true,
                "differential" | "diff" => false,
                other => bail!("unknown signal type '{other}'; use single-ended or differential"),
            };
            board.set_signal_type(single_ended)?;
            println!("Signal type: {kind}");
        }

        Command::Calibrate {
            temperatures,
            channels,
            min,
            max,
            step,
            output,
        } => {
            let temperatures = parse_list::<f64>(&temperatures).context("bad temperature list")?;
            let channels = channels
                .split(',')
                .map(|name| Channel::from_name(name.trim()))
                .collect::<argus_rust_detector::Result<Vec<_>>>()?;

            let mut config = CalibrationConfig::new(VoltageRange::new(min, max, step));
            config.temperatures = temperatures;
            config.channels = channels;
            config.output_path = output;

            let stop = stop_flag()?;
            println!("Calibrating... press Ctrl-C to abort.");
            calibration::run(board, &config, &stop)?;
            if stop.load(Ordering::Relaxed) {
                println!("Calibration aborted; the in-progress file keeps its underscore prefix.");
            } else {
                println!("Calibration finished.");
            }
        }

        Command::SaveConfig => {
            let config = DeviceConfig::capture(board)?;
            config.save()?;
            println!("Saved current settings.");
        }

        Command::ApplyConfig => {
            let config = DeviceConfig::load()?;
            config.apply(board)?;
            println!("Applied saved settings.");
        }

        Command::List | Command::Lookup { .. } => unreachable!("handled before connecting"),
    }
    Ok(())
}

fn parse_list<T: std::str::FromStr>(input: &str) -> Result<Vec<T>> {
    input
        .split(',')
        .map(|item| {
            item.trim()
                .parse::<T>()
                .map_err(|_| anyhow::anyhow!("could not parse {item:?}"))
        })
        .collect()
}
