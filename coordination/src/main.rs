//! HTTP server for the swarm coordination engine
//!
//! # Usage
//!
//! ```bash
//! # Defaults: 127.0.0.1:8080, traces in ./.coordination-traces
//! swarm-coordinator
//!
//! # Config file plus overrides
//! swarm-coordinator --config coordination.toml --bind 0.0.0.0:9000
//!
//! # No durable traces
//! swarm-coordinator --ephemeral
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use swarm_coordinator::api::{create_router, AppState};
use swarm_coordinator::{Engine, EngineConfig};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML config file (applied before COORDINATION_* environment variables)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen address (overrides COORDINATION_BIND_ADDR)
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// RocksDB trace directory (overrides COORDINATION_TRACE_PATH)
    #[arg(long)]
    trace_path: Option<PathBuf>,

    /// Keep traces in memory only
    #[arg(long, default_value_t = false)]
    ephemeral: bool,

    /// Overall consensus threshold (overrides COORDINATION_CONSENSUS_THRESHOLD)
    #[arg(long)]
    consensus_threshold: Option<f64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("swarm_coordinator=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &args.config {
        Some(path) => EngineConfig::from_toml_file(path)?,
        None => EngineConfig::default(),
    };
    config.apply_env();

    if let Some(addr) = args.bind {
        config.bind_addr = addr;
    }
    if let Some(path) = args.trace_path {
        config.trace_path = path;
    }
    if let Some(threshold) = args.consensus_threshold {
        config.consensus_threshold = threshold;
    }

    let bind_addr = config.bind_addr;
    let engine = if args.ephemeral {
        info!("Starting with in-memory traces");
        Engine::in_memory(config)?
    } else {
        info!(path = %config.trace_path.display(), "Opening trace store");
        Engine::open(config)?
    }
    .shared();

    let watchdog = engine.spawn_watchdog();

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;
    info!(addr = %bind_addr, "Swarm coordinator listening");

    axum::serve(listener, create_router(AppState::new(engine)))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    watchdog.abort();
    info!("Swarm coordinator stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
