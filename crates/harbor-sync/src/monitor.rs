//! # Module Health Monitor
//!
//! Tracks the status of every enabled dashboard module and derives the
//! system-wide verdict.
//!
//! ## Poll Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   poll() ──► StatusSource::sample() per module (outside the lock)      │
//! │                 │                                                       │
//! │                 ▼                                                       │
//! │         module faulted by register_error?                              │
//! │            yes, auto_recovery off ──► keep `error`                     │
//! │            otherwise              ──► take the sampled state/score     │
//! │                                                                         │
//! │   SOURCES                                                              │
//! │   ConnectivityStatusSource   offline ─► offline, poor ─► warning,      │
//! │                              else online; score from latency           │
//! │   CacheUsageStatusSource     ≥100% ─► error, ≥80% ─► warning, else ok  │
//! │   FixedStatusSource          constant sample (default: ok / 100)       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use harbor_core::{
    ConnectionQuality, HealthStatus, ModuleState, ModuleStatus, BASELINE_PERFORMANCE_SCORE,
};
use harbor_db::LocalCacheStore;

use crate::config::HubConfiguration;
use crate::error::{HubError, HubResult};
use crate::probe::ConnectivityProbe;

/// Cache usage at which the storage module reports a warning.
pub const CACHE_WARNING_PERCENT: f64 = 80.0;

/// Cache usage at which the storage module reports an error.
pub const CACHE_ERROR_PERCENT: f64 = 100.0;

// =============================================================================
// Status Sources
// =============================================================================

/// One observation of a module.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatusSample {
    pub state: ModuleState,
    pub performance_score: Option<f64>,
}

impl StatusSample {
    pub fn new(state: ModuleState, performance_score: Option<f64>) -> Self {
        StatusSample {
            state,
            performance_score,
        }
    }
}

impl Default for StatusSample {
    fn default() -> Self {
        StatusSample::new(ModuleState::Ok, Some(BASELINE_PERFORMANCE_SCORE))
    }
}

/// Module-specific status rule.
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn sample(&self) -> StatusSample;
}

/// Always reports the same sample.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedStatusSource(pub StatusSample);

impl FixedStatusSource {
    pub fn new(state: ModuleState, performance_score: Option<f64>) -> Self {
        FixedStatusSource(StatusSample::new(state, performance_score))
    }
}

#[async_trait]
impl StatusSource for FixedStatusSource {
    async fn sample(&self) -> StatusSample {
        self.0
    }
}

/// Derives a module state from the probe's last connection state.
///
/// Reads the stored state only; it never probes on its own.
pub struct ConnectivityStatusSource {
    probe: Arc<ConnectivityProbe>,
}

impl ConnectivityStatusSource {
    pub fn new(probe: Arc<ConnectivityProbe>) -> Self {
        ConnectivityStatusSource { probe }
    }
}

#[async_trait]
impl StatusSource for ConnectivityStatusSource {
    async fn sample(&self) -> StatusSample {
        let connection = self.probe.current().await;
        if !connection.connected {
            return StatusSample::new(ModuleState::Offline, Some(0.0));
        }

        let state = match connection.quality {
            ConnectionQuality::Poor => ModuleState::Warning,
            ConnectionQuality::Offline => ModuleState::Offline,
            _ => ModuleState::Online,
        };

        // 100 at 0ms, 0 at 1s and beyond
        let latency = connection.latency_ms.unwrap_or(0) as f64;
        let score = (BASELINE_PERFORMANCE_SCORE - latency / 10.0).clamp(0.0, 100.0);

        StatusSample::new(state, Some(score))
    }
}

/// Derives a module state from local cache usage.
pub struct CacheUsageStatusSource {
    cache: LocalCacheStore,
}

impl CacheUsageStatusSource {
    pub fn new(cache: LocalCacheStore) -> Self {
        CacheUsageStatusSource { cache }
    }
}

#[async_trait]
impl StatusSource for CacheUsageStatusSource {
    async fn sample(&self) -> StatusSample {
        let stats = match self.cache.stats().await {
            Ok(stats) => stats,
            Err(e) => {
                warn!(error = %e, "Cache stats unavailable");
                return StatusSample::new(ModuleState::Error, Some(0.0));
            }
        };

        let state = if stats.usage_percent >= CACHE_ERROR_PERCENT {
            ModuleState::Error
        } else if stats.usage_percent >= CACHE_WARNING_PERCENT {
            ModuleState::Warning
        } else {
            ModuleState::Ok
        };

        let score = (BASELINE_PERFORMANCE_SCORE - stats.usage_percent).clamp(0.0, 100.0);
        StatusSample::new(state, Some(score))
    }
}

// =============================================================================
// Monitor
// =============================================================================

struct TrackedModule {
    status: ModuleStatus,
    source: Arc<dyn StatusSource>,

    /// Set by `register_error`, cleared by recovery or `reset_module`.
    faulted: bool,
}

/// Health tracker for the enabled modules of a configuration.
pub struct ModuleHealthMonitor {
    modules: RwLock<BTreeMap<String, TrackedModule>>,
    started_at: Instant,
    auto_recovery: bool,
}

impl ModuleHealthMonitor {
    /// Tracks every enabled module of `config`.
    ///
    /// Modules without an entry in `sources` use a `FixedStatusSource`.
    pub fn new(
        config: &HubConfiguration,
        mut sources: HashMap<String, Arc<dyn StatusSource>>,
    ) -> Self {
        let modules = config
            .enabled_modules()
            .map(|(key, module)| {
                let source = sources
                    .remove(key)
                    .unwrap_or_else(|| Arc::new(FixedStatusSource::default()));
                let tracked = TrackedModule {
                    status: ModuleStatus::new(key.clone(), module.name.clone()),
                    source,
                    faulted: false,
                };
                (key.clone(), tracked)
            })
            .collect::<BTreeMap<_, _>>();

        for key in sources.keys() {
            debug!(module = %key, "Status source for untracked module ignored");
        }

        ModuleHealthMonitor {
            modules: RwLock::new(modules),
            started_at: Instant::now(),
            auto_recovery: config.feature_flags.auto_recovery,
        }
    }

    /// Seconds since the monitor was created.
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Refreshes every tracked module from its status source.
    pub async fn poll(&self) {
        let sources: Vec<(String, Arc<dyn StatusSource>)> = self
            .modules
            .read()
            .await
            .iter()
            .map(|(key, tracked)| (key.clone(), tracked.source.clone()))
            .collect();

        let mut samples = Vec::with_capacity(sources.len());
        for (key, source) in sources {
            samples.push((key, source.sample().await));
        }

        let uptime = self.uptime_seconds();
        let mut modules = self.modules.write().await;

        for (key, sample) in samples {
            let Some(tracked) = modules.get_mut(&key) else {
                continue;
            };

            tracked.status.uptime_seconds = uptime;

            if tracked.faulted && !self.auto_recovery {
                continue;
            }

            if tracked.faulted {
                info!(module = %key, state = %sample.state, "Module recovered");
                tracked.faulted = false;
            } else if tracked.status.state != sample.state {
                debug!(
                    module = %key,
                    from = %tracked.status.state,
                    to = %sample.state,
                    "Module state changed"
                );
            }

            tracked.status.state = sample.state;
            tracked.status.performance_score = sample.performance_score;
        }
    }

    /// Records a fault: increments the error count and forces `error`.
    pub async fn register_error(&self, key: &str, message: &str) -> HubResult<()> {
        let mut modules = self.modules.write().await;
        let tracked = modules
            .get_mut(key)
            .ok_or_else(|| HubError::UnknownModule(key.to_string()))?;

        tracked.status.error_count += 1;
        tracked.status.state = ModuleState::Error;
        tracked.status.last_error = Some(message.to_string());
        tracked.faulted = true;

        warn!(
            module = %key,
            error_count = tracked.status.error_count,
            message = %message,
            "Module error registered"
        );
        Ok(())
    }

    /// Clears a module's fault. The error count is kept.
    pub async fn reset_module(&self, key: &str) -> HubResult<()> {
        let mut modules = self.modules.write().await;
        let tracked = modules
            .get_mut(key)
            .ok_or_else(|| HubError::UnknownModule(key.to_string()))?;

        tracked.faulted = false;
        tracked.status.state = ModuleState::Ok;
        tracked.status.performance_score = Some(BASELINE_PERFORMANCE_SCORE);
        tracked.status.last_error = None;

        info!(module = %key, "Module reset");
        Ok(())
    }

    /// Tracked statuses in key order.
    pub async fn statuses(&self) -> Vec<ModuleStatus> {
        self.modules
            .read()
            .await
            .values()
            .map(|tracked| tracked.status.clone())
            .collect()
    }

    pub async fn status(&self, key: &str) -> Option<ModuleStatus> {
        self.modules
            .read()
            .await
            .get(key)
            .map(|tracked| tracked.status.clone())
    }

    /// Aggregated verdict over the tracked modules.
    pub async fn system_health(&self) -> HealthStatus {
        let modules = self.modules.read().await;
        HealthStatus::aggregate(modules.values().map(|tracked| &tracked.status.state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModuleConfig;
    use harbor_core::Priority;
    use harbor_db::{Database, DbConfig};
    use serde_json::json;

    fn config_with(keys: &[&str]) -> HubConfiguration {
        HubConfiguration {
            modules: keys
                .iter()
                .map(|k| (k.to_string(), ModuleConfig::new(k.to_uppercase(), Priority::Medium)))
                .collect(),
            ..Default::default()
        }
    }

    fn fixed(state: ModuleState) -> Arc<dyn StatusSource> {
        Arc::new(FixedStatusSource::new(state, Some(50.0)))
    }

    #[tokio::test]
    async fn test_only_enabled_modules_are_tracked() {
        let mut config = config_with(&["mmi", "network"]);
        config
            .modules
            .insert("bi".into(), ModuleConfig::new("BI", Priority::Low).disabled());

        let monitor = ModuleHealthMonitor::new(&config, HashMap::new());
        let statuses = monitor.statuses().await;

        let keys: Vec<&str> = statuses.iter().map(|s| s.key.as_str()).collect();
        assert_eq!(keys, vec!["mmi", "network"]);
        assert!(statuses.iter().all(|s| s.state == ModuleState::Ok));
        assert!(statuses
            .iter()
            .all(|s| s.performance_score == Some(BASELINE_PERFORMANCE_SCORE)));
        assert_eq!(monitor.system_health().await, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn test_health_aggregation() {
        let config = config_with(&["a", "b", "c"]);

        let one_warning = ModuleHealthMonitor::new(
            &config,
            HashMap::from([("a".to_string(), fixed(ModuleState::Warning))]),
        );
        one_warning.poll().await;
        assert_eq!(one_warning.system_health().await, HealthStatus::Healthy);

        let two_warnings = ModuleHealthMonitor::new(
            &config,
            HashMap::from([
                ("a".to_string(), fixed(ModuleState::Warning)),
                ("b".to_string(), fixed(ModuleState::Warning)),
            ]),
        );
        two_warnings.poll().await;
        assert_eq!(two_warnings.system_health().await, HealthStatus::Degraded);

        let offline = ModuleHealthMonitor::new(
            &config,
            HashMap::from([("c".to_string(), fixed(ModuleState::Offline))]),
        );
        offline.poll().await;
        assert_eq!(offline.system_health().await, HealthStatus::Critical);
        assert_eq!(
            offline.status("c").await.unwrap().performance_score,
            Some(50.0)
        );
    }

    #[tokio::test]
    async fn test_registered_error_is_sticky() {
        let monitor = ModuleHealthMonitor::new(&config_with(&["mmi", "network"]), HashMap::new());

        monitor.register_error("mmi", "feed stalled").await.unwrap();
        monitor.poll().await;

        let status = monitor.status("mmi").await.unwrap();
        assert_eq!(status.state, ModuleState::Error);
        assert_eq!(status.error_count, 1);
        assert_eq!(status.last_error.as_deref(), Some("feed stalled"));
        assert_eq!(monitor.system_health().await, HealthStatus::Critical);

        monitor.reset_module("mmi").await.unwrap();
        let status = monitor.status("mmi").await.unwrap();
        assert_eq!(status.state, ModuleState::Ok);
        assert_eq!(status.error_count, 1);
        assert_eq!(monitor.system_health().await, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn test_auto_recovery_replaces_error_on_poll() {
        let mut config = config_with(&["mmi"]);
        config.feature_flags.auto_recovery = true;
        let monitor = ModuleHealthMonitor::new(&config, HashMap::new());

        monitor.register_error("mmi", "feed stalled").await.unwrap();
        monitor.register_error("mmi", "feed stalled again").await.unwrap();
        assert_eq!(monitor.system_health().await, HealthStatus::Critical);

        monitor.poll().await;

        let status = monitor.status("mmi").await.unwrap();
        assert_eq!(status.state, ModuleState::Ok);
        assert_eq!(status.error_count, 2);
        assert_eq!(monitor.system_health().await, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn test_unknown_module() {
        let monitor = ModuleHealthMonitor::new(&config_with(&["mmi"]), HashMap::new());

        assert!(matches!(
            monitor.register_error("crew", "x").await,
            Err(HubError::UnknownModule(key)) if key == "crew"
        ));
        assert!(monitor.reset_module("crew").await.is_err());
        assert!(monitor.status("crew").await.is_none());
    }

    #[tokio::test]
    async fn test_cache_usage_source_thresholds() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();

        let roomy = CacheUsageStatusSource::new(db.local_cache(1024 * 1024));
        assert_eq!(roomy.sample().await.state, ModuleState::Ok);

        let tight = db.local_cache(10);
        tight.put(json!({"payload": "x"}), "mmi").await.unwrap();
        let sample = CacheUsageStatusSource::new(tight).sample().await;
        assert_eq!(sample.state, ModuleState::Error);
        assert_eq!(sample.performance_score, Some(0.0));
    }

    #[tokio::test]
    async fn test_connectivity_source_before_probe_is_offline() {
        use crate::endpoint::RemoteEndpoint;
        use harbor_core::CacheEntry;

        struct Up;

        #[async_trait]
        impl RemoteEndpoint for Up {
            async fn ping(&self) -> HubResult<()> {
                Ok(())
            }
            async fn deliver(&self, _entry: &CacheEntry) -> HubResult<()> {
                Ok(())
            }
        }

        let probe = Arc::new(ConnectivityProbe::new(Arc::new(Up), &HubConfiguration::default()));
        let source = ConnectivityStatusSource::new(probe.clone());

        let sample = source.sample().await;
        assert_eq!(sample.state, ModuleState::Offline);
        assert_eq!(sample.performance_score, Some(0.0));

        probe.check_connection().await;
        let sample = source.sample().await;
        assert_eq!(sample.state, ModuleState::Online);
        assert!(sample.performance_score.unwrap() > 90.0);
    }
}
