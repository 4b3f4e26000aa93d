//! eduaudit: background audit logging pipeline.
//!
//! Runs the audit worker behind an admin HTTP server, or inspects and
//! replays the dead-letter store from the command line.

use clap::{Parser, Subcommand};
use eduaudit::config::Config;
use eduaudit::dlq::DeadLetterStore;
use eduaudit::error::{
    AddressParseSnafu, AppError, ConfigSnafu, DeadLetterSnafu, MetricsSnafu, WorkerDisabledSnafu,
};
use eduaudit::worker::AuditWorker;
use eduaudit::{metrics, signal, sink};
use snafu::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Background audit logging pipeline.
#[derive(Parser, Debug)]
#[command(name = "eduaudit")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file.
    #[arg(short, long)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Dry run - validate configuration without running.
    #[arg(long)]
    dry_run: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Command {
    /// Run the audit worker until a shutdown signal (default).
    Run,
    /// Print dead-letter store statistics.
    DlqStats,
    /// Replay dead letters through the configured sink.
    DlqRetry {
        /// Skip entries that already failed more than this many sweeps.
        #[arg(long)]
        max_retries: Option<u32>,
    },
}

#[snafu::report]
#[tokio::main]
async fn main() -> Result<(), AppError> {
    let args = Args::parse();

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = Config::from_file(&args.config).context(ConfigSnafu)?;

    if args.dry_run {
        info!("Dry run mode - validating configuration");
        info!("Worker enabled: {}", config.worker.enabled);
        info!(
            "Batch size: {}, queue capacity: {}, flush interval: {}ms",
            config.worker.batch_size, config.worker.channel_capacity, config.worker.flush_interval_ms
        );
        info!(
            "Retries: {}, shed after {} failures",
            config.worker.max_retries, config.worker.max_failures
        );
        info!("Sink: {:?}", config.sink);
        info!("Dead-letter store: {}", config.dead_letter.path.display());
        info!("Configuration is valid");
        return Ok(());
    }

    let store = Arc::new(
        DeadLetterStore::from_config(&config.dead_letter)
            .with_replay_batch_size(config.worker.batch_size),
    );

    match args.command.unwrap_or(Command::Run) {
        Command::Run => run(config, store).await,
        Command::DlqStats => {
            let stats = store.stats().await.context(DeadLetterSnafu)?;
            info!("Dead-letter store: {}", store.path().display());
            info!("  Entries: {}", stats.total_entries);
            info!("  Files: {}", stats.file_count);
            info!("  Bytes: {}", stats.total_size_bytes);
            for (retries, count) in &stats.retry_histogram {
                info!("  Retried {} times: {}", retries, count);
            }
            Ok(())
        }
        Command::DlqRetry { max_retries } => {
            let sink = sink::from_config(&config.sink);
            let max_retries = max_retries.unwrap_or(config.dead_letter.retry_max_count);
            let report = store
                .retry_failed(sink.as_ref(), max_retries)
                .await
                .context(DeadLetterSnafu)?;
            info!("Retry sweep completed");
            info!("  Succeeded: {}", report.succeeded);
            info!("  Failed: {}", report.failed);
            info!("  Skipped: {}", report.skipped);
            Ok(())
        }
    }
}

async fn run(config: Config, store: Arc<DeadLetterStore>) -> Result<(), AppError> {
    ensure!(config.worker.enabled, WorkerDisabledSnafu);
    info!("eduaudit starting");

    let sink = sink::from_config(&config.sink);
    debug!("Persisting audit entries to the {} sink", sink.name());

    let worker = Arc::new(
        AuditWorker::new(config.worker, sink, store)
            .with_sweep_retry_limit(config.dead_letter.retry_max_count),
    );
    let shutdown = CancellationToken::new();

    // Initialize the admin server if enabled
    let server = if config.metrics.enabled {
        let addr = config.metrics.address.parse().context(AddressParseSnafu)?;
        Some(
            metrics::init(addr, worker.clone(), shutdown.clone())
                .await
                .context(MetricsSnafu)?,
        )
    } else {
        None
    };

    worker.start();
    let sweeper = config
        .dead_letter
        .retry_interval()
        .map(|period| worker.spawn_retry_sweeper(period));

    signal::shutdown_signal().await;
    info!("Shutting down, flushing queued entries");

    worker.stop().await;
    shutdown.cancel();

    for (name, task) in [("retry sweeper", sweeper), ("admin server", server)] {
        if let Some(task) = task
            && let Err(e) = task.await
        {
            warn!("{} task failed: {}", name, e);
        }
    }

    let health = worker.health_status();
    info!("Audit worker stopped");
    info!("  Entries processed: {}", health.total_processed);
    info!("  Entries dropped: {}", health.total_dropped);
    info!("  Consecutive failures: {}", health.consecutive_failures);

    Ok(())
}
