//! Mini Grid - node binary
//!
//! Boots a single grid node from environment configuration, keeps its
//! background tasks running and shuts it down cleanly on a signal.

use std::sync::Arc;

use anyhow::Context;
use serde_json::Value;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mini_grid::cache::{DefaultTimeService, TimeService};
use mini_grid::distribution::ConsistentHashFactory;
use mini_grid::persistence::{FileStore, PersistenceMode};
use mini_grid::{spawn_purge_task, spawn_write_behind_task, Config, GridCache};

type NodeCache = GridCache<String, Value>;

/// Main entry point for a grid node.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load and validate configuration from environment variables
/// 3. Build the cache, its file store and the initial topology
/// 4. Preload from the store if requested
/// 5. Start the purge and write-behind tasks
/// 6. Wait for SIGINT/SIGTERM, then stop tasks, flush and passivate
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber with env filter
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mini_grid=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Mini Grid node");

    let config = Config::from_env();
    config.validate()?;
    info!(
        "Configuration loaded: node={}, segments={}, owners={}, eviction={} (max {:?}), persistence={}",
        config.node_name,
        config.num_segments,
        config.num_owners,
        config.eviction_strategy,
        config.eviction_max_count,
        config.persistence_mode
    );

    let time: Arc<dyn TimeService> = Arc::new(DefaultTimeService::new());
    let grid_config = config.grid_config();
    let cache: NodeCache = if config.persistence_mode == PersistenceMode::None {
        GridCache::new(grid_config, time)?
    } else {
        let store = FileStore::open(&config.store_path)
            .with_context(|| format!("opening file store at {}", config.store_path.display()))?;
        GridCache::with_store(grid_config, Arc::new(store), time)?
    };

    let topology = ConsistentHashFactory::create(&config.members(), config.num_owners, config.num_segments)?;
    let cache = Arc::new(cache.with_topology(config.local_address(), topology)?);
    info!(
        "Owning {} of {} segments",
        cache.segments_owned_locally().len(),
        config.num_segments
    );

    if config.preload {
        let preloading = Arc::clone(&cache);
        let loaded = tokio::task::spawn_blocking(move || preloading.preload()).await??;
        info!("Preload complete: {} entries", loaded);
    }

    let mut handles = vec![spawn_purge_task(Arc::clone(&cache), config.purge_interval())];
    info!("Background purge task started");
    if let Some(coordinator) = cache.persistence() {
        if coordinator.mode() == PersistenceMode::Async {
            handles.push(spawn_write_behind_task(
                Arc::clone(coordinator),
                config.write_behind_interval(),
            ));
            info!("Write-behind task started");
        }
    }

    shutdown_signal(handles).await;

    let stopping = Arc::clone(&cache);
    tokio::task::spawn_blocking(move || stopping.stop()).await??;
    info!(
        "Node shutdown complete: {}",
        serde_json::to_string(&cache.stats())?
    );
    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
///
/// On shutdown signal, aborts the background tasks.
async fn shutdown_signal(handles: Vec<JoinHandle<()>>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
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
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    for handle in &handles {
        handle.abort();
    }
    warn!("Background tasks aborted");
}
