//! # harbor-sync: Offline Sync Core for the Harbor Dashboard
//!
//! This crate keeps dashboard writes safe while the vessel link is down and
//! drains them to the fleet operations API once it comes back.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Offline Sync Core                                │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                     Orchestrator (facade)                        │  │
//! │  │                                                                  │  │
//! │  │  init / shutdown, store_offline, sync, health snapshot          │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               │                                         │
//! │         ┌─────────────────────┼─────────────────────┐                  │
//! │         ▼                     ▼                     ▼                   │
//! │  ┌────────────────┐  ┌────────────────┐  ┌────────────────────────┐    │
//! │  │  SyncEngine    │  │ ModuleHealth   │  │  LocalCacheStore       │    │
//! │  │                │  │ Monitor        │  │  (harbor-db)           │    │
//! │  │ One guarded    │  │                │  │                        │    │
//! │  │ cycle at a     │  │ Status sources │  │ SQLite, capacity-bound │    │
//! │  │ time, timer    │  │ per module     │  │ eviction of synced     │    │
//! │  └───────┬────────┘  └────────────────┘  └────────────────────────┘    │
//! │          ▼                                                              │
//! │  ┌────────────────┐        ┌────────────────────────┐                  │
//! │  │ Connectivity   │ ─────► │ RemoteEndpoint         │                  │
//! │  │ Probe          │        │ HttpEndpoint (reqwest) │                  │
//! │  │ ping, backoff  │        └────────────────────────┘                  │
//! │  └────────────────┘                                                     │
//! │                                                                         │
//! │  EVENTS (HubEventEmitter):                                             │
//! │  • "hub://sync" - Sync cycle results                                   │
//! │  • "hub://connection" - Link state changes                             │
//! │  • "hub://error" - Module faults                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//! - [`config`] - Hub configuration (TOML + environment)
//! - [`endpoint`] - Remote endpoint seam and its HTTP implementation
//! - [`engine`] - Sync engine and auto-sync timer
//! - [`error`] - Hub error types
//! - [`events`] - Event emitter trait
//! - [`monitor`] - Module health monitor and status sources
//! - [`orchestrator`] - Lifecycle facade and builder
//! - [`probe`] - Connectivity probe with retrying delivery
//!
//! ## Usage
//!
//! ```rust,ignore
//! use harbor_sync::{HubConfiguration, Orchestrator};
//! use harbor_db::{Database, DbConfig};
//!
//! let config = HubConfiguration::load_or_default(None);
//! let db = Database::new(DbConfig::new(&config.database.path)).await?;
//!
//! let hub = Orchestrator::builder(config)
//!     .with_database(db)
//!     .with_connectivity_source("network")
//!     .with_cache_usage_source("storage")
//!     .build()?;
//!
//! hub.init().await?;
//! hub.store_offline(serde_json::json!({"vessel": "IMO9321483"}), "mmi").await?;
//! let result = hub.sync().await;
//! println!("Sent {} records", result.records_sent);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod endpoint;
pub mod engine;
pub mod error;
pub mod events;
pub mod monitor;
pub mod orchestrator;
pub mod probe;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::{DatabaseSettings, EndpointSettings, FeatureFlags, HubConfiguration, ModuleConfig};
pub use endpoint::{HttpEndpoint, RemoteEndpoint};
pub use engine::{SyncEngine, SyncPhase};
pub use error::{HubError, HubResult};
pub use events::{HubEventEmitter, NoOpEmitter};
pub use monitor::{
    CacheUsageStatusSource, ConnectivityStatusSource, FixedStatusSource, ModuleHealthMonitor,
    StatusSample, StatusSource,
};
pub use orchestrator::{Orchestrator, OrchestratorBuilder};
pub use probe::{ConnectivityProbe, SendOutcome};
