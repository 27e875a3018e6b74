//! # Harbor Agent
//!
//! Headless process hosting the offline sync core.
//!
//! ## Startup
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  1. tracing-subscriber (RUST_LOG, default "info")                       │
//! │  2. HubConfiguration::load ($HARBOR_CONFIG or platform hub.toml)        │
//! │  3. Database::new (SQLite, migrations)                                  │
//! │  4. Orchestrator::init (probe, auto-sync, health poll)                  │
//! │  5. log health every health_check_interval until Ctrl-C / SIGTERM      │
//! │  6. Orchestrator::shutdown, Database::close                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use harbor_db::{Database, DbConfig};
use harbor_sync::{HubConfiguration, Orchestrator};

/// Health log period when the periodic health poll is disabled.
const FALLBACK_HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    info!("Starting Harbor sync agent...");

    let config = HubConfiguration::load(None).context("loading hub configuration")?;
    info!(
        endpoint = %config.endpoint.base_url,
        database = %config.database.path.display(),
        sync_interval_secs = config.sync_interval_seconds,
        "Configuration loaded"
    );

    let db = Database::new(DbConfig::new(config.database.path.clone()))
        .await
        .context("opening local database")?;

    let log_interval = config
        .health_check_interval()
        .unwrap_or(FALLBACK_HEALTH_LOG_INTERVAL);

    let hub = Orchestrator::builder(config)
        .with_database(db.clone())
        .with_connectivity_source("network")
        .with_cache_usage_source("storage")
        .build()
        .context("building orchestrator")?;

    hub.init().await.context("initializing hub")?;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let mut ticker = tokio::time::interval(log_interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let health = hub.health().await;
                info!(
                    status = %health.status,
                    online = health.connectivity.online,
                    quality = %health.connectivity.quality,
                    pending = health.cache.pending,
                    cache_bytes = health.cache.size_bytes,
                    "Hub health"
                );
            }

            _ = &mut shutdown => {
                break;
            }
        }
    }

    hub.shutdown().await;
    db.close().await;

    info!("Agent shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown...");
}
