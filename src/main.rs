use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, EnvFilter};

use ergopulse::config::Config;
use ergopulse::outbox::OutboxProcessor;
use ergopulse::service;
use ergopulse::store::CounterStore;

/// Ergonomic observation outbox gateway and aggregation service.
#[derive(Parser)]
#[command(name = "ergopulse", about)]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Logging verbosity level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the aggregation service.
    Serve,
    /// Drain the outbox directory once and exit.
    Drain,
    /// Print version information and exit.
    Version,
}

/// Build-time version info, injected via RUSTFLAGS or build.rs.
mod version {
    /// Release version string (set at build time).
    pub const RELEASE: &str = env!("CARGO_PKG_VERSION");

    /// Git commit hash (set at build time via env, or "unknown").
    pub fn git_commit() -> &'static str {
        option_env!("GIT_COMMIT").unwrap_or("unknown")
    }

    /// Full version string with platform info.
    pub fn full() -> String {
        format!(
            "{} (commit: {}, {}/{})",
            RELEASE,
            git_commit(),
            std::env::consts::OS,
            std::env::consts::ARCH,
        )
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Handle version subcommand before anything else.
    if let Command::Version = cli.command {
        println!("ergopulse {}", version::full());
        return Ok(());
    }

    // Initialize tracing.
    let filter = EnvFilter::try_new(&cli.log_level)
        .with_context(|| format!("invalid log level: {}", cli.log_level))?;

    fmt().with_env_filter(filter).with_target(true).init();

    let cfg = Config::load_or_default(cli.config.as_deref())?;

    tracing::info!(
        version = version::RELEASE,
        commit = version::git_commit(),
        "starting ergopulse",
    );

    // Build and run the tokio runtime.
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    match cli.command {
        Command::Serve => rt.block_on(serve(cfg)),
        Command::Drain => rt.block_on(drain(cfg)),
        Command::Version => unreachable!("handled above"),
    }
}

async fn serve(cfg: Config) -> Result<()> {
    let store = CounterStore::open(&cfg.store.path)
        .with_context(|| format!("opening counter store {}", cfg.store.path.display()))?;

    // Set up signal handling.
    let shutdown = CancellationToken::new();

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("received SIGINT, shutting down");
            }
            _ = sigterm.recv() => {
                tracing::info!("received SIGTERM, shutting down");
            }
        }

        signal_shutdown.cancel();
    });

    service::serve(&cfg.server.listen, Arc::new(store), shutdown).await
}

async fn drain(cfg: Config) -> Result<()> {
    let processor = OutboxProcessor::new(&cfg.outbox)?;
    let stats = processor.drain().await?;

    tracing::info!(sent = stats.sent, failed = stats.failed, "drain finished");

    Ok(())
}
