use chrono::Duration;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use gatehouse::clock::{Clock, SystemClock};
use gatehouse::config::{GatehouseConfig, MAX_DURATION_MINUTES};
use gatehouse::http::HttpServer;
use gatehouse::ratelimit::RateLimiter;
use gatehouse::store::MemoryStore;
use gatehouse::sweeper::RetentionSweeper;

/// Request admission service.
#[derive(Parser, Debug)]
#[command(name = "gatehouse", version, about)]
struct Args {
    /// Path to the YAML configuration file
    #[arg(short, long, env = "GATEHOUSE_CONFIG")]
    config: Option<PathBuf>,

    /// Override the configured listen address
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    info!("Starting Gatehouse admission service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = GatehouseConfig::load(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        config.server.listen_addr = listen;
    }
    info!(
        listen_addr = %config.server.listen_addr,
        requests = ?config.limiter.requests,
        window_minutes = config.limiter.window_minutes,
        block_minutes = config.limiter.block_minutes,
        "Configuration loaded"
    );

    let store = Arc::new(MemoryStore::new());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let limiter = Arc::new(RateLimiter::with_clock(config.limiter.clone(), store.clone(), clock.clone())?);
    info!("Rate limiter initialized");

    let (stop_tx, stop_rx) = watch::channel(false);
    let sweeper_task = if config.retention.enabled {
        let sweeper = Arc::new(RetentionSweeper::new(store, clock, config.retention.archive));
        let retention = Duration::minutes(config.retention_minutes().clamp(1, MAX_DURATION_MINUTES) as i64);
        let every = std::time::Duration::from_secs(config.retention.interval_secs.max(1));
        Some(tokio::spawn(sweeper.run(retention, config.retention.batch_size, every, stop_rx)))
    } else {
        None
    };

    let server = HttpServer::new(
        config.server.listen_addr,
        limiter,
        config.server.trust_forwarded_headers,
    );
    server.serve_with_shutdown(shutdown_signal()).await?;

    let _ = stop_tx.send(true);
    if let Some(task) = sweeper_task {
        task.await?;
    }

    info!("Gatehouse admission service stopped");
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init();
    }
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
