//! relion-jobmail notifier
//!
//! Runs on compute nodes. The filesystem watcher invokes it with the paths
//! of newly created files; every `RELION_JOB_EXIT*` marker among them is
//! reported to the collector as one notice per connection.
//!
//! # Usage
//!
//! ```bash
//! jobmail-notify --server collector:62457 /data/proj/Refine3D/job012/RELION_JOB_EXIT_SUCCESS
//!
//! # Override the reported node name
//! jobmail-notify --nodename gpu07 --server collector:62457 "$PATH_FROM_WATCHER"
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use jobmail_protocol::{notice_for_marker, DEFAULT_PORT};
use jobmaild::client::{send_notice, DEFAULT_SEND_TIMEOUT};

/// Report RELION job exit markers to the collector
#[derive(Parser, Debug)]
#[command(name = "jobmail-notify", version, about)]
struct Args {
    /// Collector address (host:port)
    #[arg(short, long, default_value_t = format!("localhost:{DEFAULT_PORT}"))]
    server: String,

    /// Node name reported with each notice (default: this host's name)
    #[arg(short, long)]
    nodename: Option<String>,

    /// Seconds allowed for each send
    #[arg(long, default_value_t = DEFAULT_SEND_TIMEOUT.as_secs())]
    timeout: u64,

    /// Newly created files; anything that is not an exit marker is ignored
    #[arg(required = true)]
    paths: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(args).await {
        Ok(0) => ExitCode::SUCCESS,
        Ok(failed) => {
            error!(failed, "Some notices could not be delivered");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!(error = %e, "jobmail-notify failed");
            ExitCode::FAILURE
        }
    }
}

/// Sends every marker among `args.paths`; returns the number of failed sends.
async fn run(args: Args) -> Result<usize> {
    let nodename = match args.nodename {
        Some(name) => name,
        None => sysinfo::System::host_name().context("Could not determine host name")?,
    };
    let send_timeout = Duration::from_secs(args.timeout.max(1));

    let mut failed = 0;
    for path in &args.paths {
        let path = absolute(path)?;
        let Some(notice) = notice_for_marker(&path, &nodename) else {
            debug!(path = %path.display(), "Not an exit marker, ignoring");
            continue;
        };

        match send_notice(&args.server, &notice, send_timeout).await {
            Ok(()) => info!(path = %notice.path, server = %args.server, "Reported job exit"),
            Err(e) => {
                error!(path = %notice.path, error = %e, "Failed to report job exit");
                failed += 1;
            }
        }
    }

    Ok(failed)
}

/// Resolves `path` against the working directory without touching the file.
fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("Could not read working directory")?;
    Ok(cwd.join(path))
}
