//! # Domain Types
//!
//! Core domain types used throughout the sync core.
//!
//! ## Type Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │   CacheEntry    │   │ ConnectionState │   │   SyncResult    │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id (UUID)      │   │  connected      │   │  success        │       │
//! │  │  kind           │   │  quality        │   │  records_sent   │       │
//! │  │  module (tag)   │   │  latency_ms     │   │  errors[]       │       │
//! │  │  data (JSON)    │   │  last_probe_at  │   │  timestamp      │       │
//! │  │  synchronized   │   └─────────────────┘   └─────────────────┘       │
//! │  │  priority?      │                                                    │
//! │  └─────────────────┘   ┌─────────────────┐   ┌─────────────────┐       │
//! │                        │  MutationKind   │   │    Priority     │       │
//! │                        │  Create → POST  │   │  High           │       │
//! │                        │  Update → PUT   │   │  Medium         │       │
//! │                        │  Delete → DELETE│   │  Low            │       │
//! │                        └─────────────────┘   └─────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use ts_rs::TS;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::policy;

// =============================================================================
// Mutation Kind
// =============================================================================

/// The kind of buffered write. Selects the HTTP method on delivery.
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum MutationKind {
    #[default]
    Create,
    Update,
    Delete,
}

impl MutationKind {
    /// Returns the HTTP method used to deliver this mutation.
    pub fn http_method(&self) -> &'static str {
        match self {
            MutationKind::Create => "POST",
            MutationKind::Update => "PUT",
            MutationKind::Delete => "DELETE",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MutationKind::Create => "create",
            MutationKind::Update => "update",
            MutationKind::Delete => "delete",
        }
    }
}

impl std::fmt::Display for MutationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MutationKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "create" | "post" => Ok(MutationKind::Create),
            "update" | "put" => Ok(MutationKind::Update),
            "delete" => Ok(MutationKind::Delete),
            other => Err(CoreError::UnknownVariant {
                kind: "mutation kind",
                value: other.to_string(),
            }),
        }
    }
}

// =============================================================================
// Priority
// =============================================================================

/// Delivery priority of a cache entry.
///
/// Declaration order is the delivery order: `High < Medium < Low`.
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize, TS,
)]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Priority {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "high" | "critical" => Ok(Priority::High),
            "medium" | "normal" => Ok(Priority::Medium),
            "low" => Ok(Priority::Low),
            other => Err(CoreError::UnknownVariant {
                kind: "priority",
                value: other.to_string(),
            }),
        }
    }
}

// =============================================================================
// Cache Entry
// =============================================================================

/// A buffered mutation waiting for (or past) remote delivery.
///
/// ## Invariant
/// An entry with `synchronized == false` is never evicted. Only the sync
/// engine flips the flag, and only after a confirmed delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    /// Unique identifier (UUID v4).
    pub id: String,

    pub kind: MutationKind,

    /// Producer/category tag (e.g. "mmi", "logistics").
    pub module: String,

    /// The buffered payload.
    #[ts(type = "unknown")]
    pub data: serde_json::Value,

    pub priority: Option<Priority>,

    pub synchronized: bool,

    /// Delivery cycles that exhausted their retries for this entry.
    pub attempts: i64,

    /// Final error message of the last exhausted cycle.
    pub last_error: Option<String>,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,

    #[ts(as = "Option<String>")]
    pub synchronized_at: Option<DateTime<Utc>>,
}

impl CacheEntry {
    /// Priority used for delivery ordering (missing priority sorts as medium).
    #[inline]
    pub fn effective_priority(&self) -> Priority {
        self.priority.unwrap_or_default()
    }

    /// Returns the record in the persisted collection layout.
    pub fn to_record(&self) -> PersistedRecord {
        PersistedRecord {
            id: self.id.clone(),
            data: self.data.clone(),
            timestamp: self.created_at.timestamp_millis(),
            synchronized: self.synchronized,
            module: self.module.clone(),
        }
    }

    /// Byte length of this entry serialized in the persisted layout.
    pub fn persisted_size(&self) -> CoreResult<usize> {
        Ok(serde_json::to_vec(&self.to_record())?.len())
    }
}

/// A mutation as submitted by a producer, before it gets an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMutation {
    pub kind: MutationKind,
    pub module: String,
    pub data: serde_json::Value,
    pub priority: Option<Priority>,
}

impl NewMutation {
    /// Creates a `create` mutation with no explicit priority.
    pub fn create(module: impl Into<String>, data: serde_json::Value) -> Self {
        NewMutation {
            kind: MutationKind::Create,
            module: module.into(),
            data,
            priority: None,
        }
    }

    pub fn with_kind(mut self, kind: MutationKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }
}

// =============================================================================
// Persisted Layout
// =============================================================================

/// One element of the persisted collection: `{id, data, timestamp,
/// synchronized, module}` with `timestamp` in epoch milliseconds.
///
/// This is the import/export format and the unit of size accounting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedRecord {
    pub id: String,
    pub data: serde_json::Value,
    pub timestamp: i64,
    pub synchronized: bool,
    pub module: String,
}

impl TryFrom<PersistedRecord> for CacheEntry {
    type Error = CoreError;

    fn try_from(record: PersistedRecord) -> Result<Self, Self::Error> {
        let created_at = DateTime::<Utc>::from_timestamp_millis(record.timestamp).ok_or_else(|| {
            ValidationError::InvalidFormat {
                field: "timestamp".to_string(),
                reason: format!("{} is out of range", record.timestamp),
            }
        })?;

        Ok(CacheEntry {
            id: record.id,
            kind: MutationKind::Create,
            module: record.module,
            data: record.data,
            priority: None,
            synchronized: record.synchronized,
            attempts: 0,
            last_error: None,
            created_at,
            synchronized_at: record.synchronized.then_some(created_at),
        })
    }
}

// =============================================================================
// Cache Statistics
// =============================================================================

/// Point-in-time statistics of the local cache store.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub total: u64,
    pub pending: u64,
    pub synchronized: u64,
    pub size_bytes: u64,
    pub capacity_bytes: u64,
    pub usage_percent: f64,
}

impl CacheStats {
    /// Builds stats and derives `usage_percent` from size and capacity.
    pub fn new(total: u64, pending: u64, size_bytes: u64, capacity_bytes: u64) -> Self {
        CacheStats {
            total,
            pending,
            synchronized: total.saturating_sub(pending),
            size_bytes,
            capacity_bytes,
            usage_percent: policy::usage_percent(size_bytes, capacity_bytes),
        }
    }

    #[inline]
    pub fn is_over_capacity(&self) -> bool {
        self.size_bytes > self.capacity_bytes
    }
}

/// Result of a capacity-driven eviction. Not a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EvictionReport {
    /// Synchronized entries that were candidates.
    pub candidates: u64,
    pub removed: u64,
    pub size_before: u64,
    pub size_after: u64,
}

// =============================================================================
// Connection State
// =============================================================================

/// Coarse classification of link usability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionQuality {
    Excellent,
    Good,
    Fair,
    Poor,
    #[default]
    Offline,
}

impl ConnectionQuality {
    /// Classifies a measured round-trip latency.
    ///
    /// ```text
    /// < 100ms  excellent
    /// < 250ms  good
    /// < 500ms  fair
    /// else     poor
    /// ```
    pub fn from_latency(latency: Duration) -> Self {
        let ms = latency.as_millis();
        if ms < policy::EXCELLENT_LATENCY_MS {
            ConnectionQuality::Excellent
        } else if ms < policy::GOOD_LATENCY_MS {
            ConnectionQuality::Good
        } else if ms < policy::FAIR_LATENCY_MS {
            ConnectionQuality::Fair
        } else {
            ConnectionQuality::Poor
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionQuality::Excellent => "excellent",
            ConnectionQuality::Good => "good",
            ConnectionQuality::Fair => "fair",
            ConnectionQuality::Poor => "poor",
            ConnectionQuality::Offline => "offline",
        }
    }
}

impl std::fmt::Display for ConnectionQuality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of the most recent connectivity probe.
///
/// Recomputed on every probe and replaced as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionState {
    pub connected: bool,
    pub quality: ConnectionQuality,
    pub latency_ms: Option<u64>,
    #[ts(as = "Option<String>")]
    pub last_probe_at: Option<DateTime<Utc>>,
}

impl ConnectionState {
    /// A reachable link with the measured latency.
    pub fn online(latency: Duration, probed_at: DateTime<Utc>) -> Self {
        ConnectionState {
            connected: true,
            quality: ConnectionQuality::from_latency(latency),
            latency_ms: Some(latency.as_millis() as u64),
            last_probe_at: Some(probed_at),
        }
    }

    /// An unreachable link.
    pub fn offline(probed_at: DateTime<Utc>) -> Self {
        ConnectionState {
            connected: false,
            quality: ConnectionQuality::Offline,
            latency_ms: None,
            last_probe_at: Some(probed_at),
        }
    }
}

// =============================================================================
// Sync Result
// =============================================================================

/// Outcome of one sync attempt. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    pub success: bool,
    pub records_sent: u64,
    pub errors: Vec<String>,
    #[ts(as = "String")]
    pub timestamp: DateTime<Utc>,
}

impl SyncResult {
    /// A cycle that was rejected or aborted before any delivery.
    pub fn rejected(reason: impl Into<String>) -> Self {
        SyncResult {
            success: false,
            records_sent: 0,
            errors: vec![reason.into()],
            timestamp: Utc::now(),
        }
    }

    /// A completed cycle; successful only if no entry failed.
    pub fn completed(records_sent: u64, errors: Vec<String>) -> Self {
        SyncResult {
            success: errors.is_empty(),
            records_sent,
            errors,
            timestamp: Utc::now(),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
