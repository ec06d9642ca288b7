//! fixwire CLI
//!
//! Replays recorded telemetry through the aggregation pipeline and manages
//! the batches it leaves behind.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use crossbeam_channel::{unbounded, RecvTimeoutError};
use fixwire::{
    config::Config,
    core::{ChannelSink, Codec, DeliveryMode, JsonCodec, LogSink, ResultDispatcher},
    pipeline::Pipeline,
    source::{ReplayConfig, ReplaySource},
    stats::{create_shared_stats_with_persistence, PipelineStats},
    transport::{BatchDirectory, OfflineTransport, Transport},
    VERSION,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fixwire")]
#[command(version = VERSION)]
#[command(about = "Telemetry aggregation and batching pipeline", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Push a recorded session (JSON lines) through the pipeline
    Replay {
        /// Recording to replay
        file: PathBuf,

        /// Playback speed multiplier (0 replays as fast as possible)
        #[arg(long, default_value = "0")]
        speed: f64,

        /// Delivery mode for this run (defaults to the configured mode)
        #[arg(long)]
        mode: Option<DeliveryMode>,

        /// Never touch the network; every update goes to the batch
        #[arg(long)]
        offline: bool,
    },

    /// Show or change the delivery mode
    Mode {
        /// stopped, realtime, passive or periodic
        mode: Option<DeliveryMode>,
    },

    /// Show pipeline status and cumulative statistics
    Status,

    /// Decode persisted batch files
    Inspect {
        /// Batch file to inspect (defaults to every pending batch)
        file: Option<PathBuf>,
    },

    /// Upload pending batch files to the batch endpoint
    Upload,

    /// Show configuration
    Config,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Replay {
            file,
            speed,
            mode,
            offline,
        } => cmd_replay(&file, speed, mode, offline),
        Commands::Mode { mode } => cmd_mode(mode),
        Commands::Status => cmd_status(),
        Commands::Inspect { file } => cmd_inspect(file),
        Commands::Upload => cmd_upload(),
        Commands::Config => cmd_config(),
    }
}

fn cmd_replay(file: &Path, speed: f64, mode: Option<DeliveryMode>, offline: bool) -> Result<()> {
    println!("fixwire v{VERSION}");
    println!();

    let mut config = Config::load().context("Failed to load configuration")?;
    if let Some(mode) = mode {
        config.mode = mode;
    }
    config
        .ensure_directories()
        .context("Failed to create data directories")?;

    let transport = build_transport(&config, offline);
    let stats = create_shared_stats_with_persistence(config.stats_path());

    let (improvement_tx, improvements) = unbounded();
    let dispatcher = ResultDispatcher::new()
        .with_sink(LogSink)
        .with_sink(ChannelSink::new(improvement_tx));
    let pipeline = Pipeline::from_config(&config, transport, dispatcher, stats.clone());

    println!("Replaying {}", file.display());
    println!("  User: {}", config.user_id);
    println!("  Mode: {}", pipeline.mode());
    println!("  Batch capacity: {}", config.batch_capacity);
    println!("  Batch directory: {}", config.batch_path.display());
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone())?;

    let mut source = ReplaySource::new(ReplayConfig::new(file).with_speed(speed));
    source.start()?;
    let receiver = source.receiver().clone();

    // A CLI-only override is not replaced by the configured mode.
    let follow_config = mode.is_none();
    let mut last_config_check = Instant::now();

    while running.load(Ordering::SeqCst) {
        // Let `fixwire mode` steer a running replay.
        if follow_config && last_config_check.elapsed() >= Duration::from_secs(1) {
            if let Ok(cfg) = Config::load() {
                if cfg.mode != pipeline.mode() {
                    println!("Delivery mode changed to {}", cfg.mode);
                    pipeline.set_mode(cfg.mode);
                }
            }
            last_config_check = Instant::now();
        }

        match receiver.recv_timeout(Duration::from_millis(100)) {
            Ok(sample) => pipeline.push(sample),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        while let Ok(improvement) = improvements.try_recv() {
            println!(
                "[{}] Improved location {:.6}, {:.6} (±{:.1} m){}",
                improvement.response_time.format("%H:%M:%S"),
                improvement.latitude,
                improvement.longitude,
                improvement.accuracy,
                improvement
                    .place
                    .as_deref()
                    .map(|p| format!(" near {p}"))
                    .unwrap_or_default()
            );
        }
    }

    println!();
    println!("Stopping pipeline...");
    source.stop();
    if let Some(summary) = source.join() {
        println!(
            "Replayed {} samples ({} unreadable lines skipped)",
            summary.emitted, summary.skipped
        );
    }

    match pipeline.shutdown() {
        Ok(Some(report)) => println!(
            "Persisted final batch {} ({} updates)",
            report.batch_id, report.updates
        ),
        Ok(None) => {}
        Err(e) => eprintln!("Error persisting final batch: {e}"),
    }

    if let Err(e) = stats.save() {
        eprintln!("Warning: Could not save pipeline stats: {e}");
    }

    println!();
    println!("{}", stats.summary());
    Ok(())
}

#[cfg(feature = "gateway")]
fn build_transport(config: &Config, offline: bool) -> Arc<dyn Transport> {
    use fixwire::transport::{HttpTransport, UplinkConfig};

    let store = BatchDirectory::new(&config.batch_path);
    if offline {
        return Arc::new(OfflineTransport::new(store));
    }

    match HttpTransport::new(
        UplinkConfig::from_config(config),
        store.clone(),
        JsonCodec.content_type(),
    ) {
        Ok(transport) => Arc::new(transport),
        Err(e) => {
            eprintln!("Warning: Uplink unavailable ({e}), batching everything");
            Arc::new(OfflineTransport::new(store))
        }
    }
}

#[cfg(not(feature = "gateway"))]
fn build_transport(config: &Config, offline: bool) -> Arc<dyn Transport> {
    if !offline {
        eprintln!("Warning: built without the gateway feature, batching everything");
    }
    Arc::new(OfflineTransport::new(BatchDirectory::new(&config.batch_path)))
}

fn cmd_mode(mode: Option<DeliveryMode>) -> Result<()> {
    let mut config = Config::load().context("Failed to load configuration")?;

    match mode {
        Some(mode) => {
            config.mode = mode;
            config.save().context("Failed to save configuration")?;
            println!("Delivery mode set to {mode}.");
        }
        None => println!("Delivery mode: {}", config.mode),
    }
    Ok(())
}

fn cmd_status() -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;
    let codec = JsonCodec;

    println!("fixwire Status");
    println!("==============");
    println!();

    println!("Configuration:");
    println!("  User: {}", config.user_id);
    println!("  Mode: {}", config.mode);
    println!("  Endpoint: {}", config.endpoint);
    println!("  Batch capacity: {}", config.batch_capacity);
    match config.max_update_age() {
        Some(age) => println!("  Max update age: {}s", age.num_seconds()),
        None => println!("  Max update age: disabled"),
    }
    println!();

    let pending = BatchDirectory::new(&config.batch_path)
        .pending(codec.extension())
        .unwrap_or_default();
    println!("Pending batch files: {}", pending.len());
    println!();

    let stats_path = config.stats_path();
    if stats_path.exists() {
        let stats = PipelineStats::with_persistence(stats_path).snapshot();
        println!("Cumulative Statistics:");
        println!("  Samples received: {}", stats.total_samples());
        println!("  Updates finalized: {}", stats.updates_finalized);
        println!("  Delivered in realtime: {}", stats.updates_delivered);
        println!("  Added to batch: {}", stats.updates_batched);
        println!("  Batches persisted: {}", stats.batches_persisted);
        println!("  Flush failures: {}", stats.flush_failures);
        println!("  Encode failures: {}", stats.encode_failures);
    } else {
        println!("No previous session data found.");
    }
    Ok(())
}

fn cmd_inspect(file: Option<PathBuf>) -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;
    let codec = JsonCodec;

    let files = match file {
        Some(file) => vec![file],
        None => BatchDirectory::new(&config.batch_path)
            .pending(codec.extension())
            .context("Failed to list batch directory")?,
    };

    if files.is_empty() {
        println!("No batch files found in {}", config.batch_path.display());
        return Ok(());
    }

    for path in &files {
        let bytes =
            std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        let batch = match codec.decode_batch(&bytes) {
            Ok(batch) => batch,
            Err(e) => {
                eprintln!("{}: {e}", path.display());
                continue;
            }
        };

        let samples: usize = batch.updates.iter().map(|u| u.sample_count()).sum();
        let range = match (batch.start_time, batch.end_time) {
            (Some(start), Some(end)) => format!(
                "{} .. {}",
                start.format("%Y-%m-%d %H:%M:%S"),
                end.format("%H:%M:%S")
            ),
            _ => "no fixes".to_string(),
        };
        println!(
            "{}: {} updates, {} samples, {}",
            batch.batch_id,
            batch.len(),
            samples,
            range
        );
    }
    Ok(())
}

#[cfg(feature = "gateway")]
fn cmd_upload() -> Result<()> {
    use fixwire::transport::{BlockingUplinkClient, UplinkConfig};

    let config = Config::load().context("Failed to load configuration")?;
    let codec = JsonCodec;
    let store = BatchDirectory::new(&config.batch_path);
    let files = store
        .pending(codec.extension())
        .context("Failed to list batch directory")?;

    if files.is_empty() {
        println!("No pending batches.");
        return Ok(());
    }

    let client = BlockingUplinkClient::new(UplinkConfig::from_config(&config))?;
    println!(
        "Uploading {} batch file(s) to {}",
        files.len(),
        client.config().batch_endpoint
    );

    let mut uploaded = 0;
    for path in &files {
        let bytes =
            std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        match client.send_batch(&bytes, codec.content_type()) {
            Ok(()) => {
                store.remove(path)?;
                uploaded += 1;
            }
            Err(e) => {
                // Keep this and the remaining files for the next attempt.
                eprintln!("Upload of {} failed: {e}", path.display());
                break;
            }
        }
    }

    println!("Uploaded {uploaded} of {} batch file(s).", files.len());
    Ok(())
}

#[cfg(not(feature = "gateway"))]
fn cmd_upload() -> Result<()> {
    anyhow::bail!("Uploading requires the gateway feature")
}

fn cmd_config() -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!("{}", serde_json::to_string_pretty(&config.redacted())?);
    Ok(())
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(running: Arc<AtomicBool>) -> Result<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .context("Error setting Ctrl+C handler")
}
