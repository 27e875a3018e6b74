//! # Connectivity Probe
//!
//! Measures reachability of the remote endpoint and delivers single entries
//! with exponential backoff.
//!
//! ## Retry Timeline
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  retry_attempts = 4, base = 1s                                          │
//! │                                                                         │
//! │  send ─✗─ 1s ─ send ─✗─ 2s ─ send ─✗─ 4s ─ send ─✗─► failure          │
//! │                                                                         │
//! │  No sleep after the final attempt. A sleeping retry wakes early and    │
//! │  gives up when `cancel_pending_retries()` fires (shutdown).            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use harbor_core::{CacheEntry, ConnectionState};

use crate::config::HubConfiguration;
use crate::endpoint::RemoteEndpoint;
use crate::error::{HubError, HubResult};
use crate::events::{HubEventEmitter, NoOpEmitter};

/// Upper bound for a single backoff delay.
const MAX_BACKOFF: Duration = Duration::from_secs(24 * 60 * 60);

// =============================================================================
// Send Outcome
// =============================================================================

/// Result of `send_with_retry`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendOutcome {
    pub success: bool,
    /// Final error message when every attempt failed.
    pub error: Option<String>,
    /// Number of attempts actually made.
    pub attempts: u32,
}

impl SendOutcome {
    fn delivered(attempts: u32) -> Self {
        SendOutcome {
            success: true,
            error: None,
            attempts,
        }
    }

    fn failed(attempts: u32, error: &HubError) -> Self {
        SendOutcome {
            success: false,
            error: Some(error.to_string()),
            attempts,
        }
    }
}

// =============================================================================
// Connectivity Probe
// =============================================================================

/// Reachability sampler and single-entry sender.
pub struct ConnectivityProbe {
    endpoint: Arc<dyn RemoteEndpoint>,

    /// Last probe result, replaced as a whole.
    state: RwLock<ConnectionState>,

    retry_attempts: u32,
    base_delay: Duration,

    /// Budget for one ping and one delivery.
    request_timeout: Duration,

    /// `true` while retries must give up instead of sleeping.
    cancel_tx: watch::Sender<bool>,

    emitter: Arc<dyn HubEventEmitter>,
}

impl ConnectivityProbe {
    /// Creates a probe using the retry and timeout settings of `config`.
    pub fn new(endpoint: Arc<dyn RemoteEndpoint>, config: &HubConfiguration) -> Self {
        let (cancel_tx, _) = watch::channel(false);

        ConnectivityProbe {
            endpoint,
            state: RwLock::new(ConnectionState::default()),
            retry_attempts: config.retry_attempts.max(1),
            base_delay: config.retry_base_delay(),
            request_timeout: config.connection_timeout(),
            cancel_tx,
            emitter: Arc::new(NoOpEmitter),
        }
    }

    /// Sets the event emitter.
    pub fn with_emitter(mut self, emitter: Arc<dyn HubEventEmitter>) -> Self {
        self.emitter = emitter;
        self
    }

    /// Last stored connection state. Offline until the first probe.
    pub async fn current(&self) -> ConnectionState {
        self.state.read().await.clone()
    }

    /// Probes the endpoint, classifies the link and stores the result.
    pub async fn check_connection(&self) -> ConnectionState {
        let started = Instant::now();
        let outcome = timeout(self.request_timeout, self.endpoint.ping()).await;
        let latency = started.elapsed();
        let now = Utc::now();

        let next = match outcome {
            Ok(Ok(())) => ConnectionState::online(latency, now),
            Ok(Err(e)) => {
                debug!(error = %e, "Probe failed");
                ConnectionState::offline(now)
            }
            Err(_) => {
                debug!(
                    timeout_ms = self.request_timeout.as_millis() as u64,
                    "Probe timed out"
                );
                ConnectionState::offline(now)
            }
        };

        let previous = {
            let mut state = self.state.write().await;
            std::mem::replace(&mut *state, next.clone())
        };

        if previous.connected != next.connected {
            if next.connected {
                info!(
                    quality = %next.quality,
                    latency_ms = ?next.latency_ms,
                    "Remote endpoint reachable"
                );
            } else {
                info!("Remote endpoint unreachable, working offline");
            }
        }

        if previous.connected != next.connected || previous.quality != next.quality {
            self.emitter.emit_connection(&next);
        }

        next
    }

    /// One delivery attempt, bounded by the request timeout.
    pub async fn send(&self, entry: &CacheEntry) -> HubResult<()> {
        match timeout(self.request_timeout, self.endpoint.deliver(entry)).await {
            Ok(result) => result,
            Err(_) => Err(HubError::Timeout(self.request_timeout.as_millis() as u64)),
        }
    }

    /// Delivers `entry`, retrying with exponential backoff.
    ///
    /// After failed attempt `n` the probe waits `base * 2^(n-1)`.
    pub async fn send_with_retry(&self, entry: &CacheEntry) -> SendOutcome {
        let mut backoff = self.create_backoff();
        let mut cancel_rx = self.cancel_tx.subscribe();
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            let error = match self.send(entry).await {
                Ok(()) => return SendOutcome::delivered(attempt),
                Err(e) => e,
            };

            warn!(
                id = %entry.id,
                attempt,
                max_attempts = self.retry_attempts,
                error = %error,
                "Delivery attempt failed"
            );

            if attempt >= self.retry_attempts {
                return SendOutcome::failed(attempt, &error);
            }

            let Some(delay) = backoff.next_backoff() else {
                return SendOutcome::failed(attempt, &error);
            };

            if *cancel_rx.borrow() {
                return SendOutcome::failed(attempt, &HubError::Cancelled);
            }

            debug!(id = %entry.id, delay_ms = delay.as_millis() as u64, "Waiting before retry");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel_rx.wait_for(|cancelled| *cancelled) => {
                    info!(id = %entry.id, attempt, "Retry cancelled");
                    return SendOutcome::failed(attempt, &HubError::Cancelled);
                }
            }
        }
    }

    /// Wakes every sleeping retry; they give up with a cancelled failure.
    pub fn cancel_pending_retries(&self) {
        self.cancel_tx.send_replace(true);
    }

    /// Allows retries to sleep again after `cancel_pending_retries`.
    pub fn rearm(&self) {
        self.cancel_tx.send_replace(false);
    }

    /// Creates the exponential backoff configuration.
    fn create_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.base_delay)
            .with_randomization_factor(0.0)
            .with_multiplier(2.0)
            .with_max_interval(MAX_BACKOFF)
            .with_max_elapsed_time(None)
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use harbor_core::{ConnectionQuality, NewMutation, PersistedRecord};
    use std::sync::Mutex;

    /// Endpoint with scripted latency that records delivery instants.
    struct ScriptedEndpoint {
        ping_delay: Option<Duration>,
        failures_before_success: u32,
        calls: Mutex<Vec<Instant>>,
    }

    impl ScriptedEndpoint {
        fn reachable(latency: Duration) -> Self {
            ScriptedEndpoint {
                ping_delay: Some(latency),
                failures_before_success: 0,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn unreachable() -> Self {
            ScriptedEndpoint {
                ping_delay: None,
                failures_before_success: u32::MAX,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn flaky(failures: u32) -> Self {
            ScriptedEndpoint {
                ping_delay: Some(Duration::ZERO),
                failures_before_success: failures,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl RemoteEndpoint for ScriptedEndpoint {
        async fn ping(&self) -> HubResult<()> {
            match self.ping_delay {
                Some(delay) => {
                    tokio::time::sleep(delay).await;
                    Ok(())
                }
                None => Err(HubError::ConnectivityFailure("connection refused".into())),
            }
        }

        async fn deliver(&self, _entry: &CacheEntry) -> HubResult<()> {
            let mut calls = self.calls.lock().unwrap();
            calls.push(Instant::now());
            if calls.len() as u32 > self.failures_before_success {
                Ok(())
            } else {
                Err(HubError::DeliveryFailure {
                    status: Some(503),
                    message: "HTTP 503".into(),
                })
            }
        }
    }

    fn config(retry_attempts: u32, base_ms: u64) -> HubConfiguration {
        HubConfiguration {
            retry_attempts,
            retry_base_delay_ms: base_ms,
            ..Default::default()
        }
    }

    fn entry() -> CacheEntry {
        let mutation = NewMutation::create("mmi", serde_json::json!({"x": 1}));
        let record = PersistedRecord {
            id: "entry-1".to_string(),
            data: mutation.data,
            timestamp: 0,
            synchronized: false,
            module: mutation.module,
        };
        CacheEntry::try_from(record).unwrap()
    }

    fn gaps(calls: &[Instant]) -> Vec<u128> {
        calls.windows(2).map(|w| (w[1] - w[0]).as_millis()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_doubles_between_attempts() {
        let endpoint = Arc::new(ScriptedEndpoint::unreachable());
        let probe = ConnectivityProbe::new(endpoint.clone(), &config(5, 1000));

        let outcome = probe.send_with_retry(&entry()).await;

        assert!(!outcome.success);
        assert_eq!(outcome.attempts, 5);
        assert_eq!(outcome.error.as_deref(), Some("HTTP 503"));

        let calls = endpoint.calls.lock().unwrap();
        assert_eq!(gaps(&calls), vec![1000, 2000, 4000, 8000]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_sleep_after_final_attempt() {
        let endpoint = Arc::new(ScriptedEndpoint::unreachable());
        let probe = ConnectivityProbe::new(endpoint.clone(), &config(3, 1000));

        let started = Instant::now();
        probe.send_with_retry(&entry()).await;

        assert_eq!(started.elapsed(), Duration::from_millis(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_stops_on_success() {
        let endpoint = Arc::new(ScriptedEndpoint::flaky(2));
        let probe = ConnectivityProbe::new(endpoint.clone(), &config(5, 100));

        let outcome = probe.send_with_retry(&entry()).await;

        assert!(outcome.success);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.error, None);
        assert_eq!(endpoint.calls.lock().unwrap().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_wakes_sleeping_retry() {
        let endpoint = Arc::new(ScriptedEndpoint::unreachable());
        let probe = Arc::new(ConnectivityProbe::new(endpoint.clone(), &config(5, 60_000)));

        let sender = {
            let probe = probe.clone();
            tokio::spawn(async move { probe.send_with_retry(&entry()).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        probe.cancel_pending_retries();

        let outcome = sender.await.unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.error.as_deref(), Some("cancelled"));

        // Once cancelled, retries give up without sleeping until re-armed
        let outcome = probe.send_with_retry(&entry()).await;
        assert_eq!(outcome.attempts, 1);

        probe.rearm();
        let outcome = probe.send_with_retry(&entry()).await;
        assert_eq!(outcome.attempts, 5);
        assert_eq!(outcome.error.as_deref(), Some("HTTP 503"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_classification() {
        let fast = ConnectivityProbe::new(
            Arc::new(ScriptedEndpoint::reachable(Duration::from_millis(50))),
            &config(3, 1000),
        );
        let state = fast.check_connection().await;
        assert!(state.connected);
        assert_eq!(state.quality, ConnectionQuality::Excellent);
        assert_eq!(state.latency_ms, Some(50));

        let slow = ConnectivityProbe::new(
            Arc::new(ScriptedEndpoint::reachable(Duration::from_millis(300))),
            &config(3, 1000),
        );
        assert_eq!(slow.check_connection().await.quality, ConnectionQuality::Fair);

        let down = ConnectivityProbe::new(
            Arc::new(ScriptedEndpoint::unreachable()),
            &config(3, 1000),
        );
        let state = down.check_connection().await;
        assert!(!state.connected);
        assert_eq!(state.quality, ConnectionQuality::Offline);
        assert_eq!(down.current().await, state);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_timeout_is_offline() {
        let mut cfg = config(3, 1000);
        cfg.connection_timeout_ms = 200;
        let probe = ConnectivityProbe::new(
            Arc::new(ScriptedEndpoint::reachable(Duration::from_secs(5))),
            &cfg,
        );

        let state = probe.check_connection().await;
        assert!(!state.connected);
        assert_eq!(state.quality, ConnectionQuality::Offline);
    }

    #[tokio::test]
    async fn test_current_before_first_probe() {
        let probe = ConnectivityProbe::new(
            Arc::new(ScriptedEndpoint::unreachable()),
            &config(3, 1000),
        );
        let state = probe.current().await;
        assert!(!state.connected);
        assert_eq!(state.last_probe_at, None);
    }
}
