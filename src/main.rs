//! Headless entry point for the acquisition core.
//!
//! Wires the library's `Supervisor` to a configuration file, a `tracing`
//! logging backend, and a console status line standing in for the
//! out-of-scope GUI. Starts acquiring immediately (unless `--no-start` is
//! given) and runs until interrupted, then drives the orderly shutdown
//! sequence documented on `Supervisor::shutdown`.

// Microsoft Rust Guidelines M-MIMALLOC-APPS: use mimalloc in the binary,
// matching the rest of this workspace's allocator choice.
#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::{info, warn, Level};

use ccd_daq::camera::picam::PicamBackend;
use ccd_daq::camera::pvcam::PvcamBackend;
use ccd_daq::camera::simulated::SimulatedBackend;
use ccd_daq::camera::CameraBackend;
use ccd_daq::config::SharedConfig;
use ccd_daq::fits::SimpleFitsEncoder;
use ccd_daq::logging::{self, OutputFormat};
use ccd_daq::supervisor::{Supervisor, SupervisorConfig};
use ccd_daq::timer::serial_backend::SerialTimerBackend;
use ccd_daq::timer::simulated::SimulatedTimerBackend;
use ccd_daq::timer::TimerBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum CameraChoice {
    Simulated,
    Pvcam,
    Picam,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum TimerChoice {
    Simulated,
    Serial,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Pretty,
    Compact,
    Json,
}

/// GPS-timestamped CCD photometer acquisition core.
#[derive(Parser, Debug)]
#[command(name = "ccd_daq", about = "GPS-timestamped CCD photometer acquisition core", long_about = None)]
struct Cli {
    /// Path to the acquisition TOML config file.
    #[arg(long, default_value = "config/acquisition.toml")]
    config: PathBuf,

    /// Camera backend to drive.
    #[arg(long, value_enum, default_value_t = CameraChoice::Simulated)]
    camera: CameraChoice,

    /// Camera name/model string passed to PVCAM/PICAM backends.
    #[arg(long, default_value = "PrimeBSI")]
    camera_name: String,

    /// Timer backend to drive.
    #[arg(long, value_enum, default_value_t = TimerChoice::Simulated)]
    timer: TimerChoice,

    /// Serial port the GPS timer is attached to (timer=serial only).
    #[arg(long, default_value = "/dev/ttyUSB0")]
    timer_port: String,

    /// Baud rate for the timer serial link (timer=serial only).
    #[arg(long, default_value_t = 115_200)]
    timer_baud: u32,

    /// Path to the preview subprocess script.
    #[arg(long, default_value = "./preview.sh")]
    preview_script: PathBuf,

    /// Path to the reduction subprocess script.
    #[arg(long, default_value = "./reduction.sh")]
    reduction_script: PathBuf,

    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Don't start acquiring automatically; just initialize workers and
    /// wait for Ctrl-C. Useful for smoke-testing configuration/hardware
    /// wiring without writing any files.
    #[arg(long)]
    no_start: bool,

    /// Keep the shutter closed for the initial acquisition (dark frames).
    #[arg(long)]
    shutter_closed: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level: Level = cli.log_level.parse().unwrap_or(Level::INFO);
    let log_format = match cli.log_format {
        LogFormat::Pretty => OutputFormat::Pretty,
        LogFormat::Compact => OutputFormat::Compact,
        LogFormat::Json => OutputFormat::Json,
    };
    let log_buffer = logging::init(log_level, log_format);

    info!(config = %cli.config.display(), "starting ccd_daq");

    let shared_config = if cli.config.exists() {
        SharedConfig::load(&cli.config)
            .with_context(|| format!("failed to load config from {}", cli.config.display()))?
    } else {
        warn!(
            path = %cli.config.display(),
            "config file not found, starting from built-in defaults"
        );
        SharedConfig::new(Default::default(), Default::default())
    };

    let camera_backend: Box<dyn CameraBackend> = match cli.camera {
        CameraChoice::Simulated => Box::new(SimulatedBackend::default()),
        CameraChoice::Pvcam => Box::new(PvcamBackend::new(cli.camera_name.clone())),
        CameraChoice::Picam => Box::new(PicamBackend::new(cli.camera_name.clone())),
    };

    let timer_backend: Box<dyn TimerBackend> = match cli.timer {
        TimerChoice::Simulated => Box::new(SimulatedTimerBackend::default()),
        TimerChoice::Serial => Box::new(SerialTimerBackend::new(cli.timer_port.clone(), cli.timer_baud)),
    };

    let supervisor = Supervisor::start(SupervisorConfig {
        shared_config: shared_config.clone(),
        log_buffer,
        camera_backend,
        timer_backend,
        encoder: Arc::new(SimpleFitsEncoder),
        preview_script: Some(cli.preview_script),
        reduction_script: Some(cli.reduction_script),
    });

    if !cli.no_start {
        info!("starting acquisition");
        supervisor.start_acquiring(!cli.shutter_closed);
    } else {
        info!("--no-start given, workers initialized but idle");
    }

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    info!("shutdown requested");

    supervisor.stop_acquiring();
    if let Some(err) = supervisor.fatal_error.lock().await.clone() {
        warn!(error = %err, "a worker reported a fatal error before shutdown");
    }
    supervisor.shutdown().await;

    Ok(())
}
