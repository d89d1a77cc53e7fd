//! airslot MAC scheduler daemon.
//!
//! Pushes the per-slot station schedule to the radio control interface at
//! the start of every slot and accepts schedule updates over a TCP
//! request/reply channel. `TERMINATE` on the channel or SIGINT shuts the
//! process down cleanly.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use airslot_core::schedule::SlotTable;
use airslot_mac::config::Settings;
use airslot_mac::control::ControlServer;
use airslot_mac::radio::TracingRadio;
use airslot_mac::runtime::{RuntimeConfig, SchedulerRuntime};

/// airslot hybrid TDMA/CSMA MAC scheduler daemon.
#[derive(Parser, Debug)]
#[command(name = "airslot-macd", about = "airslot slot scheduler daemon")]
struct Cli {
    /// Wireless interface the slot schedule is pushed to.
    #[arg(short, long)]
    interface: String,

    /// Slot duration in microseconds.
    #[arg(short = 'f', long)]
    slot_duration_us: Option<u64>,

    /// Number of slots per frame.
    #[arg(short = 'n', long)]
    slots_per_frame: Option<usize>,

    /// Initial schedule string (`slot,mac,mask#...`).
    #[arg(short = 'c', long, default_value = "")]
    schedule: String,

    /// Debug level: 0 = info, 1 = debug, 2 = trace. RUST_LOG overrides.
    #[arg(short, long, default_value_t = 0)]
    debug: u8,

    /// Control channel port.
    #[arg(long)]
    control_port: Option<u16>,

    /// Optional TOML settings file.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = match cli.debug {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let mut settings = match &cli.config {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };
    if let Some(us) = cli.slot_duration_us {
        settings.slot_duration = Duration::from_micros(us);
    }
    if let Some(n) = cli.slots_per_frame {
        settings.slots_per_frame = n.max(1);
    }
    if let Some(port) = cli.control_port {
        settings.control_port = port;
    }

    let initial = SlotTable::parse(&cli.schedule, settings.slots_per_frame)
        .context("invalid initial schedule")?;

    tracing::info!(
        interface = %cli.interface,
        slot_duration_us = settings.slot_duration.as_micros() as u64,
        slots_per_frame = settings.slots_per_frame,
        control_port = settings.control_port,
        "airslot-macd starting"
    );
    tracing::info!(schedule = %initial, "initial schedule");

    let mut runtime = SchedulerRuntime::start(
        RuntimeConfig {
            interface: cli.interface,
            clock: settings.clock_config(),
            initial_delay: None,
        },
        initial,
        Box::new(TracingRadio),
    )?;
    let handle = runtime.handle();

    let control_addr = SocketAddr::from(([0, 0, 0, 0], settings.control_port));
    let mut control = ControlServer::start(control_addr, handle.clone())
        .with_context(|| format!("failed to bind control channel on {control_addr}"))?;

    let sigint_handle = handle.clone();
    ctrlc::set_handler(move || {
        tracing::info!("SIGINT received, shutting down");
        sigint_handle.request_shutdown();
    })
    .context("failed to install SIGINT handler")?;

    while handle.is_running() {
        thread::sleep(Duration::from_millis(100));
    }

    control.stop();
    runtime.shutdown();

    let stats = handle.stats();
    tracing::info!(
        ticks = stats.ticks,
        frames = stats.frames,
        updates_applied = stats.updates_applied,
        updates_rejected = stats.updates_rejected,
        observed_interval_us = stats.observed_interval_us,
        "scheduler stopped"
    );

    Ok(())
}
