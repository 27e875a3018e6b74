//! # Hub Events
//!
//! Outbound notifications for the dashboard shell.
//!
//! ```text
//! "hub://sync"       - SyncResult after every cycle, rejected ones included
//! "hub://connection" - ConnectionState after every probe that changes it
//! "hub://error"      - { message: "...", retryable: true }
//! ```

use harbor_core::{ConnectionState, SyncResult};

/// Trait for emitting hub events (implemented by the UI integration).
pub trait HubEventEmitter: Send + Sync {
    /// Emits the outcome of a sync cycle.
    fn emit_sync_result(&self, result: &SyncResult);

    /// Emits a connectivity transition.
    fn emit_connection(&self, state: &ConnectionState);

    /// Emits an error event.
    fn emit_error(&self, message: &str, retryable: bool);
}

/// No-op event emitter for testing.
pub struct NoOpEmitter;

impl HubEventEmitter for NoOpEmitter {
    fn emit_sync_result(&self, _result: &SyncResult) {}
    fn emit_connection(&self, _state: &ConnectionState) {}
    fn emit_error(&self, _message: &str, _retryable: bool) {}
}
