use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use gatekeeper::config::GatekeeperConfig;
use gatekeeper::http::GatekeeperServer;
use gatekeeper::ratelimit::MemoryWindowStore;

/// Command line arguments. Flags override the configuration file.
#[derive(Parser, Debug)]
#[command(name = "gatekeeper", version, about = "Request admission gateway")]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// HTTP listen address
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Attempts allowed per caller per window
    #[arg(long)]
    max_attempts: Option<u64>,

    /// Window length in milliseconds
    #[arg(long)]
    window_ms: Option<u64>,

    /// Requests allowed to execute at once
    #[arg(long)]
    concurrent_num: Option<usize>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if config.server.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_thread_ids(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init();
    }

    info!("Starting Gatekeeper");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        listen_addr = %config.server.listen_addr,
        max_attempts = config.throttle.max_attempts,
        window_ms = config.throttle.window_ms,
        concurrent_num = config.concurrency.concurrent_num,
        "Configuration loaded"
    );

    let store = Arc::new(MemoryWindowStore::new());
    let sweep_every = config.throttle.to_throttle_config().window;
    let sweeper = {
        let store = store.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_every);
            loop {
                ticker.tick().await;
                let purged = store.purge_expired();
                if purged > 0 {
                    debug!(purged, "Swept expired window entries");
                }
            }
        })
    };

    let server = GatekeeperServer::from_config(&config, store)?;
    server.serve_with_shutdown(shutdown_signal()).await?;

    sweeper.abort();
    info!("Gatekeeper stopped");
    Ok(())
}

fn load_config(args: &Args) -> anyhow::Result<GatekeeperConfig> {
    let mut config = GatekeeperConfig::load(args.config.as_deref())?;

    if let Some(listen) = args.listen {
        config.server.listen_addr = listen;
    }
    if let Some(max_attempts) = args.max_attempts {
        config.throttle.max_attempts = max_attempts;
    }
    if let Some(window_ms) = args.window_ms {
        config.throttle.window_ms = window_ms;
    }
    if let Some(concurrent_num) = args.concurrent_num {
        config.concurrency.concurrent_num = concurrent_num;
    }
    if args.json_logs {
        config.server.json_logs = true;
    }

    config.validate()?;
    Ok(config)
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
