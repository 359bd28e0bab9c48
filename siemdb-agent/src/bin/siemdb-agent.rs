//! `siemdb-agent --config --daemon --loglevel`. Config path resolution
//! falls back from `--config` to `/etc/siem_agent/config.json` to
//! `./siem_config.json`, exiting 1 if none exist. `--daemon` is
//! accepted but does not fork: double-fork daemonization has no
//! idiomatic Tokio equivalent and conflicts with an async runtime that
//! expects to own the process, so operators should use their service
//! manager (systemd, etc.) to background the process instead. Graceful
//! shutdown on SIGINT/SIGTERM/SIGHUP uses `tokio::signal`.

use std::path::{Path, PathBuf};

use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info};

use siemdb_agent::{Agent, AgentConfig};

#[derive(Parser)]
#[command(name = "siemdb-agent")]
#[command(about = "Security Information and Event Management agent")]
struct Args {
    #[arg(long, default_value = "/etc/siem_agent/config.json")]
    config: String,

    /// Accepted for compatibility; this build never forks. Use your
    /// service manager to run it in the background instead.
    #[arg(long)]
    daemon: bool,

    #[arg(long, default_value = "info")]
    loglevel: String,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(&args.loglevel);

    info!(config = %args.config, daemon = args.daemon, "starting siemdb-agent");

    let config_path = match resolve_config_path(&args.config) {
        Some(path) => path,
        None => {
            error!("no configuration file found at {} or ./siem_config.json", args.config);
            std::process::exit(1);
        }
    };

    let config = match AgentConfig::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "failed to parse configuration");
            std::process::exit(1);
        }
    };

    if args.daemon {
        info!("--daemon requested: running in the foreground under this process's service manager");
    }

    let agent = Agent::new(config).await;

    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
    tokio::spawn(wait_for_shutdown_signal(shutdown_tx));

    if let Err(e) = agent.run_until_shutdown(shutdown_rx).await {
        error!(error = %e, "agent exited with error");
        std::process::exit(1);
    }
}

fn init_logging(level: &str) {
    let filter = format!("siemdb_agent={level},siemdb_client={level}");
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .init();
}

/// `--config` path if it exists, else `./siem_config.json` if that
/// exists, else `None`.
fn resolve_config_path(requested: &str) -> Option<PathBuf> {
    let requested_path = Path::new(requested);
    if requested_path.exists() {
        return Some(requested_path.to_path_buf());
    }
    let fallback = Path::new("./siem_config.json");
    if fallback.exists() {
        return Some(fallback.to_path_buf());
    }
    None
}

async fn wait_for_shutdown_signal(tx: mpsc::Sender<()>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
        let mut sighup = signal(SignalKind::hangup()).expect("failed to register SIGHUP handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
            _ = sighup.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    let _ = tx.send(()).await;
}
