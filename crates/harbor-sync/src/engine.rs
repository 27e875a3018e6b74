//! # Sync Engine
//!
//! Drains pending cache entries to the remote endpoint, one cycle at a time.
//!
//! ## Sync Cycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         SyncEngine::run                                 │
//! │                                                                         │
//! │   Idle ──► Syncing ──────────────────────────────────────────► Idle     │
//! │              │                                                          │
//! │              │  (a second run() while Syncing is rejected:              │
//! │              │   "sync already in progress", nothing queued)            │
//! │              ▼                                                          │
//! │   1. check_connection()     offline ──► "no connection"                │
//! │   2. get_pending()          empty   ──► success, 0 sent                │
//! │   3. sort: high < medium < low, then created_at                        │
//! │   4. for each entry, sequentially:                                     │
//! │        send_with_retry ── ok ──► collect id                            │
//! │                        └─ ✗ ──► record_failure, "entry {id}: {error}"  │
//! │   5. mark_synchronized(collected ids)   one batched call               │
//! │   6. SyncResult { success = errors.is_empty(), records_sent, ... }     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Timer-triggered and manual cycles share `run()`, so at most one cycle
//! executes at a time across the process.

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use harbor_core::{policy, SyncResult};
use harbor_db::LocalCacheStore;

use crate::error::HubError;
use crate::events::{HubEventEmitter, NoOpEmitter};
use crate::probe::ConnectivityProbe;

/// Shortest auto-sync period; tokio intervals reject a zero period.
const MIN_AUTO_SYNC_INTERVAL: Duration = Duration::from_millis(1);

// =============================================================================
// Sync Phase
// =============================================================================

/// In-flight state of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncPhase {
    #[default]
    Idle,
    Syncing,
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncPhase::Idle => write!(f, "idle"),
            SyncPhase::Syncing => write!(f, "syncing"),
        }
    }
}

/// Returns the phase to `Idle` when dropped.
struct PhaseGuard<'a> {
    phase: &'a Mutex<SyncPhase>,
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner) = SyncPhase::Idle;
    }
}

/// Running auto-sync timer.
struct AutoSyncTask {
    shutdown_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

// =============================================================================
// Sync Engine
// =============================================================================

/// Guarded drain cycle plus the optional periodic trigger.
pub struct SyncEngine {
    probe: Arc<ConnectivityProbe>,
    cache: LocalCacheStore,
    emitter: Arc<dyn HubEventEmitter>,

    /// Auto-sync period.
    interval: Duration,

    phase: Mutex<SyncPhase>,
    last_result: RwLock<Option<SyncResult>>,

    /// Timestamp of the last successful cycle.
    last_sync_at: RwLock<Option<DateTime<Utc>>>,

    auto_sync: Mutex<Option<AutoSyncTask>>,
}

impl SyncEngine {
    /// Creates an idle engine. `interval` is the auto-sync period; a zero
    /// period is raised to one millisecond.
    pub fn new(probe: Arc<ConnectivityProbe>, cache: LocalCacheStore, interval: Duration) -> Self {
        if interval < MIN_AUTO_SYNC_INTERVAL {
            warn!(
                interval_ms = interval.as_millis() as u64,
                min_ms = MIN_AUTO_SYNC_INTERVAL.as_millis() as u64,
                "Auto-sync interval too short, clamping"
            );
        }
        let interval = interval.max(MIN_AUTO_SYNC_INTERVAL);

        SyncEngine {
            probe,
            cache,
            emitter: Arc::new(NoOpEmitter),
            interval,
            phase: Mutex::new(SyncPhase::Idle),
            last_result: RwLock::new(None),
            last_sync_at: RwLock::new(None),
            auto_sync: Mutex::new(None),
        }
    }

    /// Sets the event emitter.
    pub fn with_emitter(mut self, emitter: Arc<dyn HubEventEmitter>) -> Self {
        self.emitter = emitter;
        self
    }

    /// Effective auto-sync period.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn phase(&self) -> SyncPhase {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub async fn last_result(&self) -> Option<SyncResult> {
        self.last_result.read().await.clone()
    }

    pub async fn last_sync_at(&self) -> Option<DateTime<Utc>> {
        *self.last_sync_at.read().await
    }

    /// Runs one sync cycle. Never fails; every path yields a `SyncResult`.
    pub async fn run(&self) -> SyncResult {
        let Some(_guard) = self.try_begin() else {
            debug!("Sync requested while a cycle is running, rejecting");
            let result = SyncResult::rejected(HubError::ReentrantSyncRejected.to_string());
            self.emitter.emit_sync_result(&result);
            return result;
        };

        let result = self.run_cycle().await;
        self.finish(&result).await;
        result
    }

    /// Moves `Idle -> Syncing`, or returns `None` if a cycle is running.
    fn try_begin(&self) -> Option<PhaseGuard<'_>> {
        let mut phase = self.phase.lock().unwrap_or_else(PoisonError::into_inner);
        if *phase == SyncPhase::Syncing {
            return None;
        }
        *phase = SyncPhase::Syncing;
        Some(PhaseGuard { phase: &self.phase })
    }

    async fn run_cycle(&self) -> SyncResult {
        let connection = self.probe.check_connection().await;
        if !connection.connected {
            debug!("Skipping sync cycle, endpoint unreachable");
            return SyncResult::rejected(HubError::offline().to_string());
        }

        let mut pending = match self.cache.get_pending().await {
            Ok(pending) => pending,
            Err(e) => {
                error!(error = %e, "Failed to read pending entries");
                return SyncResult::rejected(format!("failed to read pending entries: {}", e));
            }
        };

        if pending.is_empty() {
            debug!("Nothing to sync");
            return SyncResult::completed(0, Vec::new());
        }

        policy::sort_for_delivery(&mut pending);

        info!(
            pending = pending.len(),
            quality = %connection.quality,
            "Sync cycle started"
        );

        let mut delivered = Vec::with_capacity(pending.len());
        let mut errors = Vec::new();

        for entry in &pending {
            let outcome = self.probe.send_with_retry(entry).await;
            if outcome.success {
                debug!(id = %entry.id, attempts = outcome.attempts, "Entry synced");
                delivered.push(entry.id.clone());
                continue;
            }

            let message = outcome
                .error
                .unwrap_or_else(|| "delivery failed".to_string());

            if let Err(e) = self.cache.record_failure(&entry.id, &message).await {
                warn!(id = %entry.id, error = %e, "Failed to record delivery failure");
            }

            errors.push(format!("entry {}: {}", entry.id, message));
        }

        let sent = delivered.len() as u64;
        if let Err(e) = self.cache.mark_synchronized(&delivered).await {
            error!(error = %e, delivered = sent, "Failed to mark delivered entries");
            errors.push(format!(
                "failed to mark {} delivered entries synchronized: {}",
                sent, e
            ));
        }

        SyncResult::completed(sent, errors)
    }

    async fn finish(&self, result: &SyncResult) {
        if result.success {
            *self.last_sync_at.write().await = Some(result.timestamp);
            info!(records_sent = result.records_sent, "Sync cycle completed");
        } else {
            warn!(
                records_sent = result.records_sent,
                errors = result.errors.len(),
                first_error = ?result.errors.first(),
                "Sync cycle finished with errors"
            );
        }

        *self.last_result.write().await = Some(result.clone());
        self.emitter.emit_sync_result(result);
    }

    // =========================================================================
    // Auto Sync
    // =========================================================================

    /// Starts the periodic trigger. Returns `false` if it was already running.
    pub fn start_auto_sync(self: &Arc<Self>) -> bool {
        let mut slot = self.auto_sync.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|task| !task.handle.is_finished()) {
            return false;
        }

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let handle = tokio::spawn(Self::auto_sync_loop(
            Arc::downgrade(self),
            self.interval,
            shutdown_rx,
        ));

        *slot = Some(AutoSyncTask {
            shutdown_tx,
            handle,
        });

        info!(interval_ms = self.interval.as_millis() as u64, "Auto-sync started");
        true
    }

    /// Stops the periodic trigger. A cycle already running completes.
    ///
    /// Returns `false` if auto-sync was not running.
    pub fn stop_auto_sync(&self) -> bool {
        let task = self
            .auto_sync
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match task {
            Some(task) => {
                let _ = task.shutdown_tx.try_send(());
                info!("Auto-sync stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_auto_sync_running(&self) -> bool {
        self.auto_sync
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|task| !task.handle.is_finished())
    }

    async fn auto_sync_loop(
        engine: Weak<SyncEngine>,
        period: Duration,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let Some(engine) = engine.upgrade() else {
                        break;
                    };
                    let result = engine.run().await;
                    debug!(success = result.success, "Scheduled sync finished");
                }

                _ = shutdown_rx.recv() => {
                    break;
                }
            }
        }

        debug!("Auto-sync loop exited");
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        let task = self
            .auto_sync
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HubConfiguration;
    use crate::endpoint::RemoteEndpoint;
    use crate::error::HubResult;
    use async_trait::async_trait;
    use harbor_core::{CacheEntry, NewMutation, Priority, NO_CONNECTION, SYNC_IN_PROGRESS};
    use harbor_db::{Database, DbConfig};
    use serde_json::json;
    use tokio::sync::Notify;

    /// Records deliveries in order; rejects entries of the `rejected` module.
    #[derive(Default)]
    struct RecordingEndpoint {
        offline: bool,
        delivered: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl RemoteEndpoint for RecordingEndpoint {
        async fn ping(&self) -> HubResult<()> {
            if self.offline {
                Err(HubError::offline())
            } else {
                Ok(())
            }
        }

        async fn deliver(&self, entry: &CacheEntry) -> HubResult<()> {
            if entry.module == "rejected" {
                return Err(HubError::DeliveryFailure {
                    status: Some(400),
                    message: "HTTP 400".into(),
                });
            }
            self.delivered.lock().unwrap().push(entry.id.clone());
            Ok(())
        }
    }

    /// Blocks every delivery until released.
    #[derive(Default)]
    struct GatedEndpoint {
        entered: Notify,
        release: Notify,
        deliveries: std::sync::Mutex<u32>,
    }

    #[async_trait]
    impl RemoteEndpoint for GatedEndpoint {
        async fn ping(&self) -> HubResult<()> {
            Ok(())
        }

        async fn deliver(&self, _entry: &CacheEntry) -> HubResult<()> {
            *self.deliveries.lock().unwrap() += 1;
            self.entered.notify_one();
            self.release.notified().await;
            Ok(())
        }
    }

    fn test_config() -> HubConfiguration {
        HubConfiguration {
            retry_attempts: 2,
            retry_base_delay_ms: 1,
            ..Default::default()
        }
    }

    async fn engine_with(
        endpoint: Arc<dyn RemoteEndpoint>,
        interval: Duration,
    ) -> (Arc<SyncEngine>, LocalCacheStore) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let cache = db.local_cache(1024 * 1024);
        let probe = Arc::new(ConnectivityProbe::new(endpoint, &test_config()));
        let engine = Arc::new(SyncEngine::new(probe, cache.clone(), interval));
        (engine, cache)
    }

    #[tokio::test]
    async fn test_empty_cache_is_success() {
        let (engine, _cache) =
            engine_with(Arc::new(RecordingEndpoint::default()), Duration::from_secs(30)).await;

        let result = engine.run().await;

        assert!(result.success);
        assert_eq!(result.records_sent, 0);
        assert!(result.errors.is_empty());
        assert!(engine.last_sync_at().await.is_some());
        assert_eq!(engine.phase(), SyncPhase::Idle);
    }

    #[tokio::test]
    async fn test_offline_leaves_cache_untouched() {
        let endpoint = Arc::new(RecordingEndpoint {
            offline: true,
            ..Default::default()
        });
        let (engine, cache) = engine_with(endpoint.clone(), Duration::from_secs(30)).await;
        cache.put(json!({"x": 1}), "mmi").await.unwrap();

        let result = engine.run().await;

        assert!(!result.success);
        assert_eq!(result.records_sent, 0);
        assert_eq!(result.errors, vec![NO_CONNECTION.to_string()]);
        assert_eq!(cache.count_pending().await.unwrap(), 1);
        assert!(endpoint.delivered.lock().unwrap().is_empty());
        assert_eq!(engine.last_sync_at().await, None);
        assert_eq!(engine.last_result().await, Some(result));
    }

    #[tokio::test]
    async fn test_delivers_by_priority_then_age() {
        let endpoint = Arc::new(RecordingEndpoint::default());
        let (engine, cache) = engine_with(endpoint.clone(), Duration::from_secs(30)).await;

        let low = cache
            .put_mutation(NewMutation::create("mmi", json!(1)).with_priority(Priority::Low))
            .await
            .unwrap()
            .entry;
        let unset = cache.put(json!(2), "mmi").await.unwrap();
        let high = cache
            .put_mutation(NewMutation::create("mmi", json!(3)).with_priority(Priority::High))
            .await
            .unwrap()
            .entry;
        let medium = cache
            .put_mutation(NewMutation::create("mmi", json!(4)).with_priority(Priority::Medium))
            .await
            .unwrap()
            .entry;

        let result = engine.run().await;

        assert!(result.success);
        assert_eq!(result.records_sent, 4);
        assert_eq!(
            *endpoint.delivered.lock().unwrap(),
            vec![high.id, unset.id, medium.id, low.id]
        );
        assert_eq!(cache.count_pending().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_failed_entry_pending() {
        let endpoint = Arc::new(RecordingEndpoint::default());
        let (engine, cache) = engine_with(endpoint, Duration::from_secs(30)).await;

        let good = cache.put(json!({"ok": true}), "mmi").await.unwrap();
        let bad = cache.put(json!({"ok": false}), "rejected").await.unwrap();

        let result = engine.run().await;

        assert!(!result.success);
        assert_eq!(result.records_sent, 1);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains(&bad.id));
        assert!(result.errors[0].contains("HTTP 400"));

        assert!(cache.get(&good.id).await.unwrap().unwrap().synchronized);

        let failed = cache.get(&bad.id).await.unwrap().unwrap();
        assert!(!failed.synchronized);
        assert_eq!(failed.attempts, 1);
        assert_eq!(failed.last_error.as_deref(), Some("HTTP 400"));

        // Retried on the next cycle
        let again = engine.run().await;
        assert_eq!(again.records_sent, 0);
        assert_eq!(cache.get(&bad.id).await.unwrap().unwrap().attempts, 2);
        assert_eq!(engine.last_sync_at().await, None);
    }

    #[tokio::test]
    async fn test_concurrent_run_is_rejected() {
        let endpoint = Arc::new(GatedEndpoint::default());
        let (engine, cache) = engine_with(endpoint.clone(), Duration::from_secs(30)).await;
        cache.put(json!({"x": 1}), "mmi").await.unwrap();

        let first = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.run().await })
        };

        endpoint.entered.notified().await;
        assert_eq!(engine.phase(), SyncPhase::Syncing);

        let second = engine.run().await;
        assert!(!second.success);
        assert_eq!(second.records_sent, 0);
        assert_eq!(second.errors, vec![SYNC_IN_PROGRESS.to_string()]);

        endpoint.release.notify_one();
        let first = first.await.unwrap();

        assert!(first.success);
        assert_eq!(first.records_sent, 1);
        assert_eq!(*endpoint.deliveries.lock().unwrap(), 1);
        assert_eq!(engine.phase(), SyncPhase::Idle);
    }

    #[tokio::test]
    async fn test_auto_sync_start_is_idempotent() {
        let (engine, _cache) =
            engine_with(Arc::new(RecordingEndpoint::default()), Duration::from_secs(30)).await;

        assert!(!engine.is_auto_sync_running());
        assert!(engine.start_auto_sync());
        assert!(!engine.start_auto_sync());
        assert!(engine.is_auto_sync_running());

        assert!(engine.stop_auto_sync());
        assert!(!engine.stop_auto_sync());
        assert!(!engine.is_auto_sync_running());
    }

    #[tokio::test]
    async fn test_auto_sync_drains_cache() {
        let endpoint = Arc::new(RecordingEndpoint::default());
        let (engine, cache) = engine_with(endpoint, Duration::from_millis(20)).await;
        cache.put(json!({"x": 1}), "mmi").await.unwrap();

        engine.start_auto_sync();

        let drained = tokio::time::timeout(Duration::from_secs(5), async {
            while cache.count_pending().await.unwrap() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;

        assert!(drained.is_ok());
        engine.stop_auto_sync();
    }

    #[tokio::test]
    async fn test_zero_interval_is_clamped() {
        let endpoint = Arc::new(RecordingEndpoint::default());
        let (engine, cache) = engine_with(endpoint, Duration::ZERO).await;
        assert_eq!(engine.interval(), MIN_AUTO_SYNC_INTERVAL);
        cache.put(json!({"x": 1}), "mmi").await.unwrap();

        assert!(engine.start_auto_sync());

        let drained = tokio::time::timeout(Duration::from_secs(5), async {
            while cache.count_pending().await.unwrap() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;

        assert!(drained.is_ok());
        assert!(engine.is_auto_sync_running());
        assert!(engine.stop_auto_sync());
    }
}
