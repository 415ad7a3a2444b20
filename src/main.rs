//! Upstream guard (v1)
//!
//! Operational host for the resilience layer: loads configuration, serves the
//! admin surface and applies configuration changes while running.
//!
//! # Architecture Overview
//!
//! ```text
//!     caller ──▶ ResilientClient::complete
//!                    │
//!                    ▼
//!              ┌───────────┐  hit   ┌──────────────────────────┐
//!              │   cache   │───────▶│ local LRU ◀─ remote store │
//!              └─────┬─────┘        └──────────────────────────┘
//!                    │ miss
//!                    ▼
//!              ┌───────────┐
//!              │ coalesce  │  identical in-flight misses share one call
//!              └─────┬─────┘
//!                    ▼
//!              ┌───────────┐   ┌──────────────┐   ┌───────────────────────┐
//!              │  retries  │──▶│service breaker│──▶│ pool: host breaker,   │──▶ provider
//!              └───────────┘   └──────────────┘   │ socket cap, batching  │
//!                                                 └───────────────────────┘
//!
//!     admin HTTP: /health /metrics /admin/status /admin/breakers/reset
//!     Prometheus: metrics_address
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;

use upstream_guard::admin;
use upstream_guard::cache::{MemoryStore, RemoteStore};
use upstream_guard::config::{load_config, ConfigWatcher, GuardConfig};
use upstream_guard::lifecycle::{shutdown_signal, Shutdown};
use upstream_guard::observability::{logging, metrics};
use upstream_guard::pool::HttpConnector;
use upstream_guard::ResilientClient;

#[derive(Parser)]
#[command(name = "upstream-guard")]
#[command(about = "Resilience and caching layer for completion APIs", long_about = None)]
struct Args {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => GuardConfig::default(),
    };

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "upstream-guard starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let remote = config
        .cache
        .remote_enabled
        .then(|| Arc::new(MemoryStore::new(config.cache.remote_max_entries)) as Arc<dyn RemoteStore>);
    let client = Arc::new(ResilientClient::new(
        &config,
        Arc::new(HttpConnector::new(&config.pool)),
        remote,
    ));

    tracing::info!(
        services = config.services.len(),
        batching = config.pool.batching_enabled,
        max_sockets_per_host = config.pool.max_sockets_per_host,
        remote_cache = config.cache.remote_enabled,
        "Configuration loaded"
    );

    let shutdown = Shutdown::new();

    // Hot reload; the watcher handle must outlive the loop.
    let _watcher = match &args.config {
        Some(path) => {
            let (watcher, mut updates) = ConfigWatcher::new(path);
            let handle = watcher.run()?;
            let client = client.clone();
            let mut stop = shutdown.subscribe();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        Some(update) = updates.recv() => client.apply_config(&update),
                        _ = stop.recv() => break,
                    }
                }
            });
            Some(handle)
        }
        None => None,
    };

    {
        let client = client.clone();
        let mut stop = shutdown.subscribe();
        let mut sweep = tokio::time::interval(Duration::from_secs(config.cache.sweep_interval_secs.max(1)));
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = sweep.tick() => {
                        client.cache().purge_expired();
                    }
                    _ = stop.recv() => break,
                }
            }
        });
    }

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            shutdown.trigger();
        });
    }

    if config.admin.enabled {
        let listener = TcpListener::bind(&config.admin.bind_address).await?;
        let router = admin::admin_router(
            client.clone(),
            Duration::from_secs(config.admin.request_timeout_secs),
        );
        admin::serve(listener, router, shutdown.wait()).await?;
    } else {
        shutdown.wait().await;
    }

    client.shutdown().await;
    tracing::info!("Shutdown complete");
    Ok(())
}
