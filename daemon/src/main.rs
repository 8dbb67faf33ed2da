//! gitwarden-daemon: keeps a cluster converged with a git repository.
//!
//! Runs a sync cycle on startup and then on a fixed interval, and executes
//! queued jobs between cycles.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use gitwarden::{Daemon, EventSink, LogEventSink, Settings};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Layer};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// gitwarden reconciliation daemon
#[derive(Parser, Debug)]
#[command(name = "gitwarden-daemon", version, about)]
struct Args {
    /// Settings file
    #[arg(short, long, default_value = "gitwarden.yaml")]
    config: PathBuf,

    /// Run a single sync cycle and exit
    #[arg(long)]
    once: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn init_tracing(format: LogFormat) -> Result<()> {
    // Route `log` records from dependencies into tracing
    tracing_log::LogTracer::init().context("failed to install log bridge")?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "gitwarden=info,gitwarden_daemon=info".into());
    let output = match format {
        LogFormat::Text => fmt::layer().boxed(),
        LogFormat::Json => fmt::layer().json().boxed(),
    };
    let subscriber = tracing_subscriber::registry().with(filter).with(output);
    tracing::subscriber::set_global_default(subscriber).context("failed to install subscriber")?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format)?;

    let settings = Settings::load(&args.config)
        .with_context(|| format!("failed to load settings from {}", args.config.display()))?;
    let sink: Arc<dyn EventSink> = Arc::new(LogEventSink);
    let mut daemon = Daemon::from_settings(&settings, sink)?;

    if args.once {
        let outcome = daemon.sync_once().await?;
        info!(
            revision = %outcome.range.new_revision,
            errors = outcome.errors.len(),
            marker = ?outcome.marker,
            "single sync finished"
        );
        return Ok(());
    }

    daemon.start();
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutdown signal received");
    daemon.shutdown().await;

    Ok(())
}
