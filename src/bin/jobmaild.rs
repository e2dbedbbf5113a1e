//! relion-jobmail collector daemon
//!
//! Receives job completion notices from compute nodes, queues them on disk,
//! and mails a grouped digest on a fixed interval.
//!
//! # Usage
//!
//! ```bash
//! # Run the collector (foreground)
//! jobmaild run
//!
//! # Drain the queue and send a digest right now
//! jobmaild flush
//!
//! # Validate the configuration and print the effective values
//! jobmaild check-config
//!
//! # Use an explicit config file
//! jobmaild --config /etc/relion-jobmail.toml run
//!
//! # Enable debug logging
//! RUST_LOG=jobmaild=debug jobmaild run
//! ```
//!
//! # Signal Handling
//!
//! - SIGTERM/SIGINT: Graceful shutdown

use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use jobmail_core::DigestBuilder;
use jobmaild::config::Config;
use jobmaild::dispatch::DispatchSink;
use jobmaild::queue::spawn_queue;
use jobmaild::scheduler::{spawn_scheduler, DrainCycle};
use jobmaild::server::IngressServer;

/// relion-jobmail collector daemon
#[derive(Parser, Debug)]
#[command(name = "jobmaild", version, about)]
struct Args {
    /// Path to the config file (default: $JOBMAIL_CONFIG, ./relion-jobmail.toml, /etc/relion-jobmail.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the listener and the digest scheduler
    Run,
    /// Run one drain cycle immediately and exit
    Flush,
    /// Load and validate the configuration, then print it
    CheckConfig,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = Config::locate(args.config.as_deref())?;
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;

    match args.command.unwrap_or(Command::Run) {
        Command::Run => run_daemon(config),
        Command::Flush => flush_once(config),
        Command::CheckConfig => {
            print_config(&config_path, &config);
            Ok(())
        }
    }
}

fn init_logging() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("jobmaild=info".parse()?)
                .add_directive("jobmail_core=info".parse()?)
                .add_directive("jobmail_protocol=info".parse()?),
        )
        .init();
    Ok(())
}

fn print_config(path: &std::path::Path, config: &Config) {
    println!("config:     {}", path.display());
    println!("listen:     {}", config.server.bind_addr());
    println!("timeout:    {}s", config.server.read_timeout_secs);
    println!("queue:      {}", config.queue.path.display());
    println!("interval:   {}s", config.digest.interval_secs);
    println!("subject:    {} <N> jobs finished", config.digest.subject_prefix);
    println!("sender:     {}", config.mail.sender);
    println!("recipients: {}", config.recipients().join(", "));
    println!("transport:  {}", config.mail.transport);
}

/// Runs the daemon (async entry point).
#[tokio::main]
async fn run_daemon(config: Config) -> Result<()> {
    init_logging()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        "relion-jobmail collector starting"
    );

    let queue = spawn_queue(config.queue.path.clone())
        .await
        .context("Failed to open event queue")?;

    match queue.pending().await {
        Ok(0) => {}
        Ok(pending) => info!(pending, "Recovered undrained events from previous run"),
        Err(e) => warn!(error = %e, "Could not count pending events"),
    }

    // Create cancellation token for graceful shutdown
    let cancel_token = CancellationToken::new();

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let sink = DispatchSink::from_config(&config);
    info!(
        transport = sink.transport_name(),
        recipients = config.recipients().len(),
        "Dispatch sink ready"
    );

    let cycle = DrainCycle::new(
        queue.clone(),
        DigestBuilder::new(config.digest.subject_prefix.clone()),
        sink,
    );
    let scheduler = spawn_scheduler(cycle, config.digest.interval(), cancel_token.clone());

    let server = IngressServer::bind(&config.server, queue, cancel_token.clone()).await?;

    if let Err(e) = server.run().await {
        error!(error = %e, "Server error");
        cancel_token.cancel();
        return Err(e.into());
    }

    // Let a running drain cycle finish before exiting
    if let Err(e) = scheduler.await {
        error!(error = %e, "Digest scheduler task failed");
    }

    info!("relion-jobmail collector stopped");
    Ok(())
}

/// Drains the queue once and dispatches the digest.
#[tokio::main]
async fn flush_once(config: Config) -> Result<()> {
    init_logging()?;

    let queue = spawn_queue(config.queue.path.clone())
        .await
        .context("Failed to open event queue")?;
    let cycle = DrainCycle::new(
        queue,
        DigestBuilder::new(config.digest.subject_prefix.clone()),
        DispatchSink::from_config(&config),
    );

    let outcome = cycle.run().await?;
    info!(?outcome, "Flush complete");
    Ok(())
}

/// Waits for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
