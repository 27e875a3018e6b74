//! # Orchestrator
//!
//! Facade the dashboard talks to. Owns the probe, the cache store, the sync
//! engine and the health monitor, and drives their lifecycle.
//!
//! ## Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   Uninitialized ──── init() ────► Initialized ──── shutdown() ───┐     │
//! │         ▲                              │                          │     │
//! │         └──────────────────────────────┼──────────────────────────┘     │
//! │                                        │                                │
//! │   init():   db check, re-arm retries, probe, health poll,              │
//! │             auto-sync (realtime_sync), health task (interval > 0)      │
//! │   shutdown(): stop auto-sync, stop health task, cancel retry sleeps    │
//! │                                                                         │
//! │   Both are idempotent. store_offline / sync / health work in either    │
//! │   state; health() reports `not_ready` until init().                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use harbor_core::{
    CacheEntry, CacheStats, CacheSummary, ConnectionState, ConnectivitySummary, HealthSnapshot,
    HealthStatus, NewMutation, SyncResult,
};
use harbor_db::{Database, LocalCacheStore, ReadCache};

use crate::config::HubConfiguration;
use crate::endpoint::{HttpEndpoint, RemoteEndpoint};
use crate::engine::SyncEngine;
use crate::error::{HubError, HubResult};
use crate::events::{HubEventEmitter, NoOpEmitter};
use crate::monitor::{
    CacheUsageStatusSource, ConnectivityStatusSource, ModuleHealthMonitor, StatusSource,
};
use crate::probe::ConnectivityProbe;

// =============================================================================
// Lifecycle State
// =============================================================================

/// Periodic health poll task.
struct HealthTask {
    shutdown_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct Lifecycle {
    health_task: Option<HealthTask>,
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Offline sync core facade. Build with [`OrchestratorBuilder`].
pub struct Orchestrator {
    config: Arc<HubConfiguration>,
    db: Database,
    cache: LocalCacheStore,
    read_cache: ReadCache,
    probe: Arc<ConnectivityProbe>,
    engine: Arc<SyncEngine>,
    monitor: Arc<ModuleHealthMonitor>,
    emitter: Arc<dyn HubEventEmitter>,

    /// Serializes init/shutdown.
    lifecycle: Mutex<Lifecycle>,
    initialized: AtomicBool,
}

impl Orchestrator {
    /// Starts building an orchestrator for `config`.
    pub fn builder(config: HubConfiguration) -> OrchestratorBuilder {
        OrchestratorBuilder::new(config)
    }

    pub fn config(&self) -> &HubConfiguration {
        &self.config
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Brings the hub online. No-op if already initialized.
    pub async fn init(&self) -> HubResult<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        if self.is_initialized() {
            debug!("Hub already initialized");
            return Ok(());
        }

        if !self.db.health_check().await {
            return Err(HubError::DatabaseError(
                "local database is not available".to_string(),
            ));
        }

        self.probe.rearm();
        let connection = self.probe.check_connection().await;
        self.monitor.poll().await;

        if self.config.feature_flags.realtime_sync {
            self.engine.start_auto_sync();
        }

        if let Some(period) = self.config.health_check_interval() {
            lifecycle.health_task = Some(self.spawn_health_task(period));
        }

        self.initialized.store(true, Ordering::Release);

        info!(
            online = connection.connected,
            quality = %connection.quality,
            realtime_sync = self.config.feature_flags.realtime_sync,
            offline_cache = self.config.feature_flags.offline_cache,
            "Hub initialized"
        );
        Ok(())
    }

    /// Stops background work. No-op if not initialized.
    ///
    /// A sync cycle already delivering entries runs to completion, but its
    /// sleeping retries give up immediately.
    pub async fn shutdown(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        if !self.is_initialized() {
            debug!("Hub not initialized, nothing to shut down");
            return;
        }

        self.engine.stop_auto_sync();
        self.probe.cancel_pending_retries();

        if let Some(task) = lifecycle.health_task.take() {
            let _ = task.shutdown_tx.try_send(());
            let _ = task.handle.await;
        }

        self.initialized.store(false, Ordering::Release);
        info!("Hub shut down");
    }

    fn spawn_health_task(&self, period: Duration) -> HealthTask {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let monitor = self.monitor.clone();
        let read_cache = self.read_cache.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        monitor.poll().await;
                        if let Err(e) = read_cache.purge_expired().await {
                            warn!(error = %e, "Failed to purge expired reads");
                        }
                    }

                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }

            debug!("Health task stopped");
        });

        HealthTask {
            shutdown_tx,
            handle,
        }
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Buffers `data` for `module`.
    ///
    /// Returns `Ok(None)` without touching the store when the offline cache
    /// is disabled.
    pub async fn store_offline(
        &self,
        data: serde_json::Value,
        module: &str,
    ) -> HubResult<Option<CacheEntry>> {
        self.store_mutation(NewMutation::create(module, data)).await
    }

    /// Buffers a full mutation. A missing priority defaults to the
    /// configured priority of its module.
    pub async fn store_mutation(&self, mut mutation: NewMutation) -> HubResult<Option<CacheEntry>> {
        if !self.config.feature_flags.offline_cache {
            warn!(
                module = %mutation.module,
                kind = %mutation.kind,
                "Offline cache disabled, mutation not stored"
            );
            return Ok(None);
        }

        if mutation.priority.is_none() {
            mutation.priority = self.config.module_priority(&mutation.module);
        }

        let outcome = self.cache.put_mutation(mutation).await?;
        if let Some(report) = outcome.eviction {
            debug!(removed = report.removed, "Store triggered eviction");
        }

        Ok(Some(outcome.entry))
    }

    /// Wipes the mutation store, pending entries included.
    pub async fn clear_cache(&self) -> HubResult<u64> {
        Ok(self.cache.clear().await?)
    }

    // =========================================================================
    // Sync
    // =========================================================================

    /// Runs one sync cycle through the engine's guard.
    pub async fn sync(&self) -> SyncResult {
        self.engine.run().await
    }

    pub async fn last_sync_result(&self) -> Option<SyncResult> {
        self.engine.last_result().await
    }

    pub fn is_auto_sync_running(&self) -> bool {
        self.engine.is_auto_sync_running()
    }

    // =========================================================================
    // Modules
    // =========================================================================

    /// Registers a module fault and forwards it to the event emitter.
    pub async fn register_error(&self, module: &str, message: &str) -> HubResult<()> {
        self.monitor.register_error(module, message).await?;

        let fault = HubError::ModuleFault {
            module: module.to_string(),
            message: message.to_string(),
        };
        self.emitter.emit_error(&fault.to_string(), false);
        Ok(())
    }

    pub async fn reset_module(&self, module: &str) -> HubResult<()> {
        self.monitor.reset_module(module).await
    }

    // =========================================================================
    // Read Side
    // =========================================================================

    pub async fn cache_stats(&self) -> HubResult<CacheStats> {
        Ok(self.cache.stats().await?)
    }

    /// Last probed connection state.
    pub async fn connectivity(&self) -> ConnectionState {
        self.probe.current().await
    }

    /// TTL cache for reads fetched while online.
    pub fn read_cache(&self) -> &ReadCache {
        &self.read_cache
    }

    /// Composes the health snapshot from current component state.
    ///
    /// Has no side effects; before `init()` it returns the `not_ready` shape.
    pub async fn health(&self) -> HealthSnapshot {
        if !self.is_initialized() {
            return HealthSnapshot::not_ready();
        }

        let modules = self.monitor.statuses().await;
        let status = HealthStatus::aggregate(modules.iter().map(|m| &m.state));

        let cache = match self.cache.stats().await {
            Ok(stats) => CacheSummary {
                size_bytes: stats.size_bytes,
                pending: stats.pending,
                capacity_bytes: stats.capacity_bytes,
            },
            Err(e) => {
                warn!(error = %e, "Cache stats unavailable for health snapshot");
                CacheSummary {
                    capacity_bytes: self.cache.capacity_bytes(),
                    ..Default::default()
                }
            }
        };

        let connection = self.probe.current().await;

        HealthSnapshot {
            status,
            uptime_seconds: self.monitor.uptime_seconds(),
            modules,
            cache,
            connectivity: ConnectivitySummary {
                online: connection.connected,
                quality: connection.quality,
                last_sync: self.engine.last_sync_at().await,
            },
        }
    }

    /// Same as [`Orchestrator::health`].
    pub async fn snapshot(&self) -> HealthSnapshot {
        self.health().await
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.engine.stop_auto_sync();
        self.probe.cancel_pending_retries();
        if let Some(task) = self.lifecycle.get_mut().health_task.take() {
            task.handle.abort();
        }
    }
}

// =============================================================================
// Builder Pattern
// =============================================================================

enum SourceSpec {
    Custom(Arc<dyn StatusSource>),
    Connectivity,
    CacheUsage,
}

/// Builder for creating an Orchestrator with options.
pub struct OrchestratorBuilder {
    config: HubConfiguration,
    db: Option<Database>,
    endpoint: Option<Arc<dyn RemoteEndpoint>>,
    emitter: Option<Arc<dyn HubEventEmitter>>,
    sources: Vec<(String, SourceSpec)>,
}

impl OrchestratorBuilder {
    /// Creates a new builder with the given config.
    pub fn new(config: HubConfiguration) -> Self {
        OrchestratorBuilder {
            config,
            db: None,
            endpoint: None,
            emitter: None,
            sources: Vec::new(),
        }
    }

    /// Sets the database. Required.
    pub fn with_database(mut self, db: Database) -> Self {
        self.db = Some(db);
        self
    }

    /// Sets the remote endpoint. Defaults to an `HttpEndpoint` built from
    /// the configuration.
    pub fn with_endpoint(mut self, endpoint: Arc<dyn RemoteEndpoint>) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    /// Sets the event emitter.
    pub fn with_emitter(mut self, emitter: Arc<dyn HubEventEmitter>) -> Self {
        self.emitter = Some(emitter);
        self
    }

    /// Uses `source` for the module `key`.
    pub fn with_status_source(mut self, key: impl Into<String>, source: Arc<dyn StatusSource>) -> Self {
        self.sources.push((key.into(), SourceSpec::Custom(source)));
        self
    }

    /// Derives the state of module `key` from the connectivity probe.
    pub fn with_connectivity_source(mut self, key: impl Into<String>) -> Self {
        self.sources.push((key.into(), SourceSpec::Connectivity));
        self
    }

    /// Derives the state of module `key` from cache usage.
    pub fn with_cache_usage_source(mut self, key: impl Into<String>) -> Self {
        self.sources.push((key.into(), SourceSpec::CacheUsage));
        self
    }

    /// Builds the Orchestrator.
    pub fn build(self) -> HubResult<Orchestrator> {
        self.config.validate()?;

        let db = self
            .db
            .ok_or_else(|| HubError::InvalidConfig("Database required".into()))?;

        let endpoint: Arc<dyn RemoteEndpoint> = match self.endpoint {
            Some(endpoint) => endpoint,
            None => Arc::new(HttpEndpoint::from_config(&self.config)?),
        };

        let emitter = self.emitter.unwrap_or_else(|| Arc::new(NoOpEmitter));
        let config = Arc::new(self.config);

        let cache = db.local_cache(config.cache_size_limit_bytes);
        let read_cache = db.read_cache();

        let probe = Arc::new(ConnectivityProbe::new(endpoint, &config).with_emitter(emitter.clone()));

        let engine = Arc::new(
            SyncEngine::new(probe.clone(), cache.clone(), config.sync_interval())
                .with_emitter(emitter.clone()),
        );

        let sources: HashMap<String, Arc<dyn StatusSource>> = self
            .sources
            .into_iter()
            .map(|(key, spec)| {
                let source: Arc<dyn StatusSource> = match spec {
                    SourceSpec::Custom(source) => source,
                    SourceSpec::Connectivity => {
                        Arc::new(ConnectivityStatusSource::new(probe.clone()))
                    }
                    SourceSpec::CacheUsage => Arc::new(CacheUsageStatusSource::new(cache.clone())),
                };
                (key, source)
            })
            .collect();

        let monitor = Arc::new(ModuleHealthMonitor::new(&config, sources));

        Ok(Orchestrator {
            config,
            db,
            cache,
            read_cache,
            probe,
            engine,
            monitor,
            emitter,
            lifecycle: Mutex::new(Lifecycle::default()),
            initialized: AtomicBool::new(false),
        })
    }
}
