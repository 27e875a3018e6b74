//! # Hub Error Types
//!
//! Error types for probe, delivery, sync and lifecycle operations.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Hub Error Categories                              │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Network       │  │     Sync / Modules      │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Connectivity   │  │  ReentrantSyncRejected  │ │
//! │  │  InvalidUrl     │  │    Failure      │  │  ModuleFault            │ │
//! │  │  ConfigLoad/    │  │  DeliveryFailure│  │  UnknownModule          │ │
//! │  │    SaveFailed   │  │  Timeout        │  │                         │ │
//! │  │                 │  │  Cancelled      │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐                              │
//! │  │    Database     │  │   Internal      │                              │
//! │  │                 │  │                 │                              │
//! │  │  DatabaseError  │  │  Serialization  │                              │
//! │  │                 │  │  Internal       │                              │
//! │  └─────────────────┘  └─────────────────┘                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Capacity eviction is deliberately absent: it is reported as an
//! `EvictionReport` and an `info` log line, not as a failure.

use thiserror::Error;

/// Result type alias for hub operations.
pub type HubResult<T> = Result<T, HubError>;

/// Hub error type covering all probe, delivery and lifecycle failures.
#[derive(Debug, Error)]
pub enum HubError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid hub configuration.
    #[error("Invalid hub configuration: {0}")]
    InvalidConfig(String),

    /// Invalid endpoint URL.
    #[error("Invalid endpoint URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Network Errors
    // =========================================================================
    /// The remote endpoint is unreachable.
    #[error("{0}")]
    ConnectivityFailure(String),

    /// The remote rejected a delivery, or the transport failed mid-request.
    #[error("{message}")]
    DeliveryFailure {
        /// HTTP status, when a response was received.
        status: Option<u16>,
        message: String,
    },

    /// A network call exceeded its time budget.
    #[error("Timed out after {0} ms")]
    Timeout(u64),

    /// A retry backoff was interrupted by shutdown.
    #[error("cancelled")]
    Cancelled,

    // =========================================================================
    // Sync / Module Errors
    // =========================================================================
    /// A sync cycle was requested while another one was running.
    #[error("sync already in progress")]
    ReentrantSyncRejected,

    /// A module reported a fault through `register_error`.
    #[error("Module {module} fault: {message}")]
    ModuleFault { module: String, message: String },

    /// The module key is not tracked by the health monitor.
    #[error("Unknown module: {0}")]
    UnknownModule(String),

    // =========================================================================
    // Storage / Internal Errors
    // =========================================================================
    /// Local cache store operation failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Failed to serialize or deserialize a value.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl HubError {
    /// The canonical offline rejection.
    pub fn offline() -> Self {
        HubError::ConnectivityFailure(harbor_core::NO_CONNECTION.to_string())
    }
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<harbor_db::DbError> for HubError {
    fn from(err: harbor_db::DbError) -> Self {
        HubError::DatabaseError(err.to_string())
    }
}

impl From<harbor_core::ValidationError> for HubError {
    fn from(err: harbor_core::ValidationError) -> Self {
        HubError::InvalidConfig(err.to_string())
    }
}

impl From<serde_json::Error> for HubError {
    fn from(err: serde_json::Error) -> Self {
        HubError::SerializationFailed(err.to_string())
    }
}

impl From<url::ParseError> for HubError {
    fn from(err: url::ParseError) -> Self {
        HubError::InvalidUrl(err.to_string())
    }
}

impl From<std::io::Error> for HubError {
    fn from(err: std::io::Error) -> Self {
        HubError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for HubError {
    fn from(err: toml::de::Error) -> Self {
        HubError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for HubError {
    fn from(err: toml::ser::Error) -> Self {
        HubError::ConfigSaveFailed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_messages() {
        assert_eq!(
            HubError::ReentrantSyncRejected.to_string(),
            harbor_core::SYNC_IN_PROGRESS
        );
        assert_eq!(HubError::offline().to_string(), harbor_core::NO_CONNECTION);
        assert_eq!(HubError::Cancelled.to_string(), "cancelled");
    }
}
