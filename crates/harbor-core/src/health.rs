//! # Module Health
//!
//! Per-module status, the system-wide verdict and the dashboard snapshot.
//!
//! ## Aggregation Rule
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  any module error | offline         ──►  CRITICAL                       │
//! │  else more than one module warning  ──►  DEGRADED                       │
//! │  else                               ──►  HEALTHY                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::types::ConnectionQuality;
use crate::BASELINE_PERFORMANCE_SCORE;

// =============================================================================
// Module State
// =============================================================================

/// Operational state of one tracked module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum ModuleState {
    #[default]
    Ok,
    Warning,
    Error,
    Online,
    Offline,
}

impl ModuleState {
    /// Error-class states make the system critical.
    #[inline]
    pub fn is_critical(&self) -> bool {
        matches!(self, ModuleState::Error | ModuleState::Offline)
    }

    #[inline]
    pub fn is_warning(&self) -> bool {
        matches!(self, ModuleState::Warning)
    }
}

impl std::fmt::Display for ModuleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ModuleState::Ok => "ok",
            ModuleState::Warning => "warning",
            ModuleState::Error => "error",
            ModuleState::Online => "online",
            ModuleState::Offline => "offline",
        };
        f.write_str(s)
    }
}

// =============================================================================
// Module Status
// =============================================================================

/// Status of one tracked module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct ModuleStatus {
    /// Configuration key of the module.
    pub key: String,
    pub name: String,
    pub state: ModuleState,
    pub uptime_seconds: u64,
    pub error_count: u64,
    pub performance_score: Option<f64>,
    pub last_error: Option<String>,
}

impl ModuleStatus {
    /// A freshly tracked module: `ok` with the baseline score.
    pub fn new(key: impl Into<String>, name: impl Into<String>) -> Self {
        ModuleStatus {
            key: key.into(),
            name: name.into(),
            state: ModuleState::Ok,
            uptime_seconds: 0,
            error_count: 0,
            performance_score: Some(BASELINE_PERFORMANCE_SCORE),
            last_error: None,
        }
    }
}

// =============================================================================
// Health Status
// =============================================================================

/// System-wide verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Critical,
    /// The orchestrator has not been initialized yet.
    NotReady,
}

impl HealthStatus {
    /// Aggregates module states into a verdict.
    pub fn aggregate<'a>(states: impl IntoIterator<Item = &'a ModuleState>) -> Self {
        let mut warnings = 0usize;
        for state in states {
            if state.is_critical() {
                return HealthStatus::Critical;
            }
            if state.is_warning() {
                warnings += 1;
            }
        }

        if warnings > 1 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Critical => "critical",
            HealthStatus::NotReady => "not_ready",
        };
        f.write_str(s)
    }
}

// =============================================================================
// Health Snapshot
// =============================================================================

/// Cache part of the health snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct CacheSummary {
    pub size_bytes: u64,
    pub pending: u64,
    pub capacity_bytes: u64,
}

/// Connectivity part of the health snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct ConnectivitySummary {
    pub online: bool,
    pub quality: ConnectionQuality,
    /// Last successful sync cycle.
    #[ts(as = "Option<String>")]
    pub last_sync: Option<DateTime<Utc>>,
}

/// Read-only health view consumed by dashboard screens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
    pub status: HealthStatus,
    pub uptime_seconds: u64,
    pub modules: Vec<ModuleStatus>,
    pub cache: CacheSummary,
    pub connectivity: ConnectivitySummary,
}

impl HealthSnapshot {
    /// Shape returned before the orchestrator is initialized.
    pub fn not_ready() -> Self {
        HealthSnapshot {
            status: HealthStatus::NotReady,
            uptime_seconds: 0,
            modules: Vec::new(),
            cache: CacheSummary::default(),
            connectivity: ConnectivitySummary::default(),
        }
    }
}
