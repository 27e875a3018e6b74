//! # harbor-db: Local Cache Store
//!
//! Durable, capacity-bounded holding area for buffered writes and for
//! time-to-live cached reads, backed by SQLite through sqlx.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Harbor Data Flow                                 │
//! │                                                                         │
//! │  Orchestrator::store_offline          SyncEngine::run                   │
//! │       │                                    │                            │
//! │       ▼                                    ▼                            │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     harbor-db (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌─────────────────┐   ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories   │   │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │                 │   │  (embedded)  │  │   │
//! │  │   │               │    │ LocalCacheStore │   │              │  │   │
//! │  │   │ SqlitePool    │◄───│ ReadCache       │   │ 001_cache    │  │   │
//! │  │   │ WAL mode      │    │                 │   │ 002_read     │  │   │
//! │  │   └───────────────┘    └─────────────────┘   └──────────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use harbor_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("./harbor.db")).await?;
//! let cache = db.local_cache(5 * 1024 * 1024);
//!
//! let entry = cache.put(serde_json::json!({"x": 1}), "mmi").await?;
//! let pending = cache.get_pending().await?;
//! cache.mark_synchronized(&[entry.id]).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

pub use repository::cache::LocalCacheStore;
pub use repository::read_cache::ReadCache;
