//! CAN PDO Monitor CLI Application
//!
//! Command-line front end for the can-pdo-monitor library:
//! - Loads a TOML configuration and an optional object dictionary file
//! - Runs a monitor against the virtual bus device
//! - Writes the configured data logs and prints a run summary

use anyhow::{Context, Result};
use can_pdo_monitor::{
    DataLog, Device, LogMode, Monitor, MonitorError, RecordFormat, VirtualDevice,
};
use chrono::Local;
use clap::Parser;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

mod config;

/// CAN PDO Monitor - Decode and log PDO signals
#[derive(Parser, Debug)]
#[command(name = "can-pdo-cli")]
#[command(about = "Decode CANopen PDO frames and log signal values", long_about = None)]
#[command(version)]
struct Args {
    /// Path to configuration file (config.toml)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Object dictionary parameter file defining the PDO layout
    #[arg(long, value_name = "FILE")]
    odr: Option<PathBuf>,

    /// Maximum run time in seconds
    #[arg(short, long, value_name = "SECONDS", default_value_t = 2.0)]
    duration: f64,

    /// Log file used when the configuration defines no data logs
    /// (default: pdo_log_<timestamp>.csv)
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Verbosity level (can be repeated: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize logging
    init_logging(args.verbose, args.quiet);

    log::info!("CAN PDO Monitor CLI v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Using monitor library v{}", can_pdo_monitor::VERSION);

    let app_config = match &args.config {
        Some(path) => {
            log::info!("Loading configuration from: {:?}", path);
            config::load_config(path)?
        }
        None => config::AppConfig::default(),
    };

    run(&args, &app_config)
}

fn run(args: &Args, app_config: &config::AppConfig) -> Result<()> {
    let duration = Duration::try_from_secs_f64(args.duration)
        .with_context(|| format!("Invalid duration: {}", args.duration))?;

    let format = app_config.format.build(args.odr.as_deref())?;
    let stats = format.stats();

    println!("═══════════════════════════════════════════════");
    println!("  CAN PDO Monitor - Virtual Bus");
    println!("═══════════════════════════════════════════════\n");
    println!("📊 PDO Format:");
    println!("  Frames: {}", stats.num_frames);
    println!("  Fields: {}", stats.num_fields);
    println!("  Rate:   {} Hz", format.rate);

    let device = VirtualDevice::with_config(
        app_config.device.virtual_bus.clone(),
        app_config.device.queue.clone(),
    )?;
    let device: Arc<dyn Device> = Arc::new(device);

    let mut monitor = Monitor::with_config(Arc::clone(&device), format, app_config.converter.clone());

    for calibration in &app_config.calibrations {
        log::debug!("Calibration on '{}'", calibration.name);
        monitor.add_calibration(calibration.clone());
    }

    let has_configured_logs = !app_config.datalogs.is_empty();
    if has_configured_logs {
        for datalog in &app_config.datalogs {
            monitor.add_datalog(datalog.build()?);
        }
    } else {
        monitor.add_datalog(default_datalog(args.output.clone())?);
    }

    let started = Local::now();
    let clock = Instant::now();
    println!("\n▶ Started at {}", started.format("%Y-%m-%d %H:%M:%S"));

    monitor.start()?;
    // Configured logs may finish early; the fallback log runs for the whole duration
    if has_configured_logs && monitor.wait_for_logs(duration) {
        log::info!("All data logs finished");
    } else if !has_configured_logs {
        std::thread::sleep(duration);
    } else {
        log::warn!("Data logs still running after {:?}", duration);
    }
    let stopped = monitor.stop();

    println!("■ Stopped after {:.2} s", clock.elapsed().as_secs_f64());
    print_summary(&monitor, device.as_ref());

    stopped?;
    Ok(())
}

/// Continuous CSV log, named after the run start time unless a path is given
fn default_datalog(output: Option<PathBuf>) -> Result<DataLog> {
    let path = output.unwrap_or_else(|| {
        PathBuf::from(format!("pdo_log_{}.csv", Local::now().format("%Y%m%d_%H%M%S")))
    });
    log::info!("Logging all signals to {:?}", path);

    let datalog = DataLog::create(&path, LogMode::Continuous)
        .with_context(|| format!("Failed to create data log: {:?}", path))?
        .with_record_format(RecordFormat::Csv);
    Ok(datalog)
}

fn print_summary(monitor: &Monitor, device: &dyn Device) {
    let queue = device.stats();
    println!("\n📡 Device:");
    println!("  Frames received: {}", queue.received);
    println!("  Frames dropped:  {}", queue.dropped);
    println!("  Frame rate:      {:.1} frames/s", queue.rate);

    println!("\n📄 Data logs:");
    for datalog in monitor.take_datalogs() {
        let status = if datalog.is_finished() { "✓" } else { "…" };
        println!(
            "  {} {} ({} records)",
            status,
            datalog.name(),
            datalog.records_written()
        );
    }

    let errors = monitor.drain_errors();
    if errors.is_empty() {
        println!("\n✓ No stream errors");
        return;
    }

    let mut by_kind: BTreeMap<&'static str, usize> = BTreeMap::new();
    for error in &errors {
        *by_kind.entry(error_kind(error)).or_default() += 1;
    }
    println!("\n⚠️  Stream errors:");
    for (kind, count) in by_kind {
        println!("  {}: {}", kind, count);
    }
}

fn error_kind(error: &MonitorError) -> &'static str {
    match error {
        MonitorError::FrameQueueOverflow { .. } => "queue overflow",
        MonitorError::FrameOrder { .. } => "frame order",
        MonitorError::InvalidFrame(_) => "invalid frame",
        MonitorError::Hardware(_) => "hardware",
        MonitorError::Io(_) | MonitorError::Json(_) => "log write",
        _ => "other",
    }
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: u8, quiet: bool) {
    use env_logger::Builder;
    use log::LevelFilter;
    use std::io::Write;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parse() {
        let args = Args::parse_from(["can-pdo-cli", "--duration", "0.5", "-vv", "--odr", "a.odr"]);
        assert_eq!(args.duration, 0.5);
        assert_eq!(args.verbose, 2);
        assert_eq!(args.odr, Some(PathBuf::from("a.odr")));
        assert!(args.config.is_none());
    }

    #[test]
    fn test_run_with_configured_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("count.csv");
        let app_config: config::AppConfig = toml::from_str(&format!(
            "[[datalogs]]\npath = {:?}\nmode = {{ count = 20 }}\n",
            path
        ))
        .unwrap();
        let args = Args::parse_from(["can-pdo-cli", "--duration", "5"]);

        run(&args, &app_config).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 21);
    }
}
