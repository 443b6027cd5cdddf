use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use floodgate::config::{FloodgateConfig, StoreBackend};
use floodgate::http::{HttpServer, ThrottleState};
use floodgate::store::{CounterStore, MemoryCounterStore, RedisCounterStore};

/// Throttled demo API server.
#[derive(Debug, Parser)]
#[command(name = "floodgate", version, about)]
struct Args {
    /// Path to the YAML configuration file
    #[arg(short, long, default_value = "floodgate.yaml")]
    config: PathBuf,

    /// Override the configured listen address
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if args.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init();
    }

    info!("Starting Floodgate Throttling Service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = FloodgateConfig::from_file(&args.config)?;
    if let Some(listen) = args.listen {
        config.server.listen_addr = listen;
    }
    info!(
        listen_addr = %config.server.listen_addr,
        backend = ?config.store.backend,
        failure_policy = ?config.store.failure_policy,
        "Configuration loaded"
    );

    let store = build_store(&config).await?;
    let state = ThrottleState::from_config(&config, store)?;

    let server = HttpServer::new(config.server.listen_addr, state);
    server.serve_with_shutdown(shutdown_signal()).await?;

    info!("Floodgate Throttling Service stopped");
    Ok(())
}

/// Create the counter store selected by the configuration.
async fn build_store(config: &FloodgateConfig) -> anyhow::Result<Arc<dyn CounterStore>> {
    match config.store.backend {
        StoreBackend::Memory => {
            let store = Arc::new(MemoryCounterStore::new());
            store.start_cleanup_task(Duration::from_secs(config.store.cleanup_interval_secs));
            info!("In-memory counter store initialized");
            Ok(store)
        }
        StoreBackend::Redis => {
            let url = config
                .store
                .redis_url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("store.redis_url is required for the redis backend"))?;
            let store = RedisCounterStore::connect(url).await?;
            store.ping().await?;
            info!("Redis counter store initialized");
            Ok(Arc::new(store))
        }
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
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
