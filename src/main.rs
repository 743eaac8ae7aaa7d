//! modular-midi - serial controller and generator bridge to a MIDI output

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use modular_midi::catalog::{MidiPortsFile, SerialPortsFile};
use modular_midi::cli;
use modular_midi::midi::batch_from_rows;
use modular_midi::output::MidirBackend;
use modular_midi::paths::AppPaths;
use modular_midi::pipeline::{PipelineReport, PipelineSettings, PipelineState};
use modular_midi::serial::{IngestorState, SelectionSource, StateCallback, SystemSerial};
use modular_midi::waveform::{demo_sequence, run_sequence};
use modular_midi::{AppConfig, Selection};

/// Modular MIDI - bridge a serial controller and test generators to one MIDI output
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (default: <root>/modularMidi.yaml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Application root holding the catalog files and logs
    #[arg(long, env = "MODULAR_MIDI_ROOT")]
    root: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// List available MIDI outputs and serial ports
    #[arg(long)]
    list_ports: bool,

    /// Rewrite the catalog files from the live port lists
    #[arg(long)]
    refresh_catalog: bool,

    /// Run the built-in waveform demo against the selected output
    #[arg(long)]
    demo: bool,

    /// Send a one-shot batch, e.g. "1:64,7:100"
    #[arg(long, value_name = "CC:VALUE,...")]
    send: Option<String>,

    /// MIDI channel for --send (1-16)
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(1..=16))]
    channel: u8,

    /// MIDI output match key, overriding the catalog selection
    #[arg(long, value_name = "KEY")]
    output: Option<String>,

    /// Serial device match key, overriding the catalog selection
    #[arg(long, value_name = "KEY")]
    serial: Option<String>,

    /// Do not start the serial ingestor
    #[arg(long)]
    no_serial: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let mut paths = AppPaths::detect(args.root.as_deref());
    let _log_guard = init_logging(&args.log_level, &paths.logs_dir())?;

    info!("Starting modular-midi v{}...", env!("CARGO_PKG_VERSION"));

    let config_path = args.config.clone().unwrap_or_else(|| paths.config_file());
    info!("Configuration file: {}", config_path.display());
    let config = AppConfig::load_or_default(&config_path).await?;
    if args.root.is_none() {
        if let Some(root) = &config.paths.root {
            paths = AppPaths::new(root);
        }
    }
    paths.ensure_directories()?;
    info!("Application root: {}", paths.root.display());

    let backend = MidirBackend::new(config.midi.client_name.clone());

    if args.list_ports {
        cli::list_ports_formatted(&backend);
        return Ok(());
    }

    if args.refresh_catalog {
        cli::refresh_catalogs(&paths, &backend)?;
        return Ok(());
    }

    let output = match &args.output {
        Some(key) => Selection::new(key.trim()),
        None => MidiPortsFile::load(&paths.midi_catalog())
            .context("No MIDI output selected (run --refresh-catalog and pick a port)")?
            .selection(),
    };

    let settings = PipelineSettings::from(&config);
    let mut pipeline = match PipelineState::start(settings, backend, &output) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            error!("Failed to start pipeline: {}", e);
            return Err(e.into());
        }
    };
    info!("✅ MIDI output ready: {}", pipeline.output_name());

    if let Some(spec) = &args.send {
        let (controllers, values) = cli::parse_send_spec(spec)?;
        let batch = batch_from_rows(&controllers, &values, args.channel - 1)?;
        let producer = pipeline.producer();
        for event in batch {
            producer.send_blocking(event)?;
        }
        drop(producer);
        return finish(pipeline).await;
    }

    if args.demo {
        let producer = pipeline.producer();
        let sent = tokio::task::spawn_blocking(move || run_sequence(&demo_sequence(), &producer))
            .await
            .context("Demo task panicked")??;
        info!("Demo finished ({} events)", sent);
        return finish(pipeline).await;
    }

    if args.no_serial {
        info!("Serial ingestor disabled");
    } else {
        let selection = serial_selection(args.serial.clone(), paths.serial_catalog());
        let on_state_change: StateCallback =
            Arc::new(|state: IngestorState| info!("Serial controller: {:?}", state));
        pipeline.attach_serial(SystemSerial, selection, Some(on_state_change))?;
    }

    info!("Running, press Ctrl+C to stop");
    shutdown_signal().await;

    finish(pipeline).await
}

/// Serial selection source: a fixed key, or the catalog file re-read on every attempt
fn serial_selection(fixed: Option<String>, catalog: PathBuf) -> SelectionSource {
    match fixed {
        Some(key) => Box::new(move || Selection::new(key.trim())),
        None => Box::new(move || match SerialPortsFile::load(&catalog) {
            Ok(file) => file.selection(),
            Err(e) => {
                warn!("{:#}", e);
                Selection::default()
            }
        }),
    }
}

async fn finish(pipeline: PipelineState) -> Result<()> {
    let report: PipelineReport = tokio::task::spawn_blocking(move || pipeline.shutdown())
        .await
        .context("Shutdown task panicked")?;

    info!(
        "Events written: {}, failed: {}",
        report.writer.written, report.writer.failed
    );
    if let Some(serial) = &report.serial {
        info!(
            "Serial frames: {}, delivered: {}, dropped: {}, protocol errors: {}",
            serial.frames(),
            serial.delivered(),
            serial.dropped(),
            serial.protocol_errors()
        );
    }
    info!("modular-midi shutdown complete");
    Ok(())
}

fn init_logging(level: &str, logs_dir: &Path) -> Result<Option<WorkerGuard>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let (file_layer, guard) = match std::fs::create_dir_all(logs_dir) {
        Ok(()) => {
            let appender = tracing_appender::rolling::daily(logs_dir, "modular-midi.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_thread_names(true)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        Err(e) => {
            eprintln!("[logging] File logging disabled ({}): {}", logs_dir.display(), e);
            (None, None)
        }
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false)
                .with_writer(std::io::stderr),
        )
        .with(file_layer)
        .try_init()
        .context("Failed to initialize logging")?;

    Ok(guard)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl+C: {}", e);
        return;
    }
    info!("Shutdown signal received");
}
