//! # harbor-core: Pure Types for the Offline Sync Core
//!
//! This crate holds the domain types and the pure policy functions shared by
//! the storage layer and the sync layer. It performs no I/O.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Harbor Architecture                              │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │              Dashboard screens (external collaborators)         │   │
//! │  │    storeOffline ──► sync ──► health snapshot                    │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                harbor-sync (Orchestrator & friends)             │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ harbor-core (THIS CRATE) ★                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │  policy   │  │  health   │  │ validation│  │   │
//! │  │   │CacheEntry │  │ quality   │  │ aggregate │  │  tags     │  │   │
//! │  │   │SyncResult │  │ eviction  │  │ snapshot  │  │  limits   │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Cache entries, connection state, sync results
//! - [`policy`] - Latency thresholds, eviction quantity, delivery ordering
//! - [`health`] - Module status, health aggregation, health snapshot
//! - [`error`] - Domain error types
//! - [`validation`] - Input validation
//!
//! ## Example Usage
//!
//! ```rust
//! use harbor_core::{ConnectionQuality, policy};
//! use std::time::Duration;
//!
//! let quality = ConnectionQuality::from_latency(Duration::from_millis(50));
//! assert_eq!(quality, ConnectionQuality::Excellent);
//!
//! // 10 synchronized entries over capacity: the 3 oldest go
//! assert_eq!(policy::eviction_count(10), 3);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod health;
pub mod policy;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use health::{
    CacheSummary, ConnectivitySummary, HealthSnapshot, HealthStatus, ModuleState, ModuleStatus,
};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Error string returned when a sync is requested while another one runs.
pub const SYNC_IN_PROGRESS: &str = "sync already in progress";

/// Error string returned when a sync is requested without a usable link.
pub const NO_CONNECTION: &str = "no connection";

/// Baseline performance score a module starts with.
pub const BASELINE_PERFORMANCE_SCORE: f64 = 100.0;
