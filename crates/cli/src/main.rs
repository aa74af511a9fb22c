//! CLI entry point for vidbatch
//!
//! Parses command line arguments, loads the run configuration (CLI flags
//! override file values field-by-field), wires up the event observers, and
//! drives one batch run. Ctrl-C maps to a graceful shutdown: running encodes
//! finish, nothing new is admitted.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use vidbatch::config::{ConfigError, RunConfig};
use vidbatch::events::{EventBus, EventKind, EventPayload};
use vidbatch::executor::FfmpegRunner;
use vidbatch::orchestrator::{OperatorCommand, Orchestrator, RunSummary};

/// Default config file consulted when --config is not given.
const DEFAULT_CONFIG_PATH: &str = "vidbatch.toml";

/// vidbatch - batch video compression with adaptive concurrency
#[derive(Parser, Debug)]
#[command(name = "vidbatch")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input directory containing video files
    input_dir: PathBuf,

    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Initial number of parallel compression jobs
    #[arg(short, long)]
    threads: Option<u32>,

    /// Constant quality value (0-63, lower is better quality)
    #[arg(long)]
    cq: Option<u8>,

    /// Use the CPU encoder (libsvtav1) instead of the GPU
    #[arg(long)]
    cpu: bool,

    /// Rotate every video by this angle (0, 90, 180, 270)
    #[arg(long)]
    rotate: Option<u16>,

    /// Submit-on-demand prefetch multiplier (1-5)
    #[arg(long)]
    prefetch_factor: Option<u32>,

    /// Do not copy container/EXIF tags onto outputs
    #[arg(long)]
    no_metadata: bool,

    /// Clear error markers and re-attempt previously failed files
    #[arg(long)]
    retry_failed: bool,

    /// Skip files smaller than this many bytes
    #[arg(long)]
    min_size_bytes: Option<u64>,
}

/// Load the config file and fold the CLI flags over it field-by-field.
fn resolve_config(args: &Args) -> Result<RunConfig, ConfigError> {
    let mut config = match &args.config {
        Some(path) => RunConfig::load(path)?,
        None => {
            let default_path = PathBuf::from(DEFAULT_CONFIG_PATH);
            if default_path.exists() {
                RunConfig::load(&default_path)?
            } else {
                RunConfig::default()
            }
        }
    };

    if let Some(threads) = args.threads {
        config.concurrency.initial = Some(threads);
    }
    if let Some(cq) = args.cq {
        config.quality.default_cq = cq;
    }
    if args.cpu {
        config.execution.use_gpu = false;
    }
    if let Some(angle) = args.rotate {
        config.rotation.manual = Some(angle);
    }
    if let Some(prefetch) = args.prefetch_factor {
        config.concurrency.prefetch_factor = prefetch;
    }
    if args.no_metadata {
        config.execution.copy_metadata = false;
    }
    if args.retry_failed {
        config.execution.retry_failed = true;
    }
    if let Some(min_size) = args.min_size_bytes {
        config.filters.min_size_bytes = min_size;
    }

    config.validate()?;
    Ok(config)
}

/// Attach log observers for the run's lifecycle events.
fn subscribe_log_observers(bus: &EventBus) {
    bus.subscribe(EventKind::DiscoveryFinished, |event| {
        if let EventPayload::DiscoveryFinished { files_found } = &event.payload {
            info!(files = files_found, "discovered candidate files");
        }
    });
    bus.subscribe(EventKind::JobStarted, |event| {
        if let EventPayload::JobStarted { path, .. } = &event.payload {
            info!(path = %path.display(), "compressing");
        }
    });
    bus.subscribe(EventKind::JobCompleted, |event| {
        if let EventPayload::JobCompleted {
            path,
            input_bytes,
            output_bytes,
            ..
        } = &event.payload
        {
            let saved = if *input_bytes > 0 {
                (1.0 - *output_bytes as f64 / *input_bytes as f64) * 100.0
            } else {
                0.0
            };
            info!(
                path = %path.display(),
                input_bytes,
                output_bytes,
                saved = %format!("{:.1}%", saved),
                "completed"
            );
        }
    });
    bus.subscribe(EventKind::JobFailed, |event| {
        if let EventPayload::JobFailed { path, reason, .. } = &event.payload {
            error!(path = %path.display(), reason = %reason, "failed");
        }
    });
    bus.subscribe(EventKind::JobSkipped, |event| {
        if let EventPayload::JobSkipped { path, reason, .. } = &event.payload {
            info!(path = %path.display(), reason = %reason, "skipped");
        }
    });
    bus.subscribe(EventKind::HardwareCapabilityLimited, |event| {
        if let EventPayload::HardwareCapabilityLimited { attempt, .. } = &event.payload {
            warn!(attempt, "hardware rejected an encode session, backing off");
        }
    });
    bus.subscribe(EventKind::ConcurrencyLevelChanged, |event| {
        if let EventPayload::ConcurrencyLevelChanged { level } = &event.payload {
            info!(level, "concurrency level changed");
        }
    });
    bus.subscribe(EventKind::ShutdownRequested, |_| {
        warn!("shutdown requested, finishing running jobs");
    });
}

fn print_summary(summary: &RunSummary) {
    println!();
    println!("Completed: {}", summary.completed);
    println!("Failed:    {}", summary.failed);
    println!("Skipped:   {}", summary.skipped);
    if summary.input_bytes > 0 {
        let saved = (1.0 - summary.output_bytes as f64 / summary.input_bytes as f64) * 100.0;
        println!(
            "Size:      {} -> {} bytes ({:.1}% saved)",
            summary.input_bytes, summary.output_bytes, saved
        );
    }
    println!("Elapsed:   {:.0?}", summary.elapsed);
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    if !args.input_dir.is_dir() {
        eprintln!(
            "Error: input path is not a directory: {}",
            args.input_dir.display()
        );
        return ExitCode::FAILURE;
    }

    let config = match resolve_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let bus = Arc::new(EventBus::new());
    subscribe_log_observers(&bus);

    let runner = Arc::new(FfmpegRunner::new(bus.clone()));
    let orchestrator =
        match Orchestrator::new(config, args.input_dir.clone(), bus, runner) {
            Ok(orchestrator) => orchestrator,
            Err(e) => {
                eprintln!("Error: {}", e);
                return ExitCode::FAILURE;
            }
        };

    let (cmd_tx, cmd_rx) = mpsc::channel(8);

    // Ctrl-C requests a graceful shutdown; running encodes are never killed.
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = cmd_tx.send(OperatorCommand::Shutdown).await;
        }
    });

    match orchestrator.run(cmd_rx).await {
        Ok(summary) => {
            print_summary(&summary);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Run aborted: {}", e);
            ExitCode::FAILURE
        }
    }
}
