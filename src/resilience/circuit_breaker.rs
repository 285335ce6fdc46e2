// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Circuit breaker for calls to external game services.
//!
//! Protects against hammering a service that is already failing. Each
//! breaker is a small state machine:
//! - Closed: requests pass through, consecutive failures are counted
//! - Open: requests fail fast without touching the service
//! - HalfOpen: after the reset timeout, exactly one trial request probes
//!   the service; success closes the circuit, failure reopens it
//!
//! Rejections surface as [`SyncError::CircuitOpen`], which the retry layer
//! treats as non-retryable. The breaker is the only recovery gate.

use crate::error::SyncError;
use parking_lot::Mutex;
use serde::Deserialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Circuit breaker state for metrics and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed = 0,
    HalfOpen = 1,
    Open = 2,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::HalfOpen => write!(f, "half_open"),
            Self::Open => write!(f, "open"),
        }
    }
}

fn default_failure_threshold() -> u32 {
    5
}
fn default_reset_timeout_ms() -> u64 {
    30_000
}
fn default_monitoring_period_ms() -> u64 {
    60_000
}

/// Configuration for a circuit breaker.
#[derive(Debug, Clone, Deserialize)]
pub struct CircuitConfig {
    /// Consecutive failures that trip the circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// How long the circuit stays open before a half-open trial
    #[serde(default = "default_reset_timeout_ms")]
    pub reset_timeout_ms: u64,
    /// Failures further apart than this window do not accumulate
    #[serde(default = "default_monitoring_period_ms")]
    pub monitoring_period_ms: u64,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            reset_timeout_ms: default_reset_timeout_ms(),
            monitoring_period_ms: default_monitoring_period_ms(),
        }
    }
}

impl CircuitConfig {
    /// Fast trip and recovery for tests.
    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            failure_threshold: 2,
            reset_timeout_ms: 50,
            monitoring_period_ms: 60_000,
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure_at: Option<Instant>,
    opened_at: Option<Instant>,
    /// A half-open trial is in flight; concurrent callers are rejected.
    trial_inflight: bool,
}

enum Admit {
    Allowed { trial: bool },
    Rejected,
}

/// A named circuit breaker guarding one external service.
pub struct CircuitBreaker {
    service: String,
    config: CircuitConfig,
    inner: Mutex<Inner>,

    // Metrics
    calls_total: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    rejections: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(service: impl Into<String>, config: CircuitConfig) -> Self {
        Self {
            service: service.into(),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                last_failure_at: None,
                opened_at: None,
                trial_inflight: false,
            }),
            calls_total: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            rejections: AtomicU64::new(0),
        }
    }

    pub fn with_defaults(service: impl Into<String>) -> Self {
        Self::new(service, CircuitConfig::default())
    }

    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Execute an operation through the breaker.
    ///
    /// When open, returns [`SyncError::CircuitOpen`] without invoking the
    /// operation. The half-open trial admits exactly one caller.
    pub async fn call<F, Fut, T>(&self, f: F) -> Result<T, SyncError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, SyncError>>,
    {
        self.calls_total.fetch_add(1, Ordering::Relaxed);

        let trial = match self.admit() {
            Admit::Allowed { trial } => trial,
            Admit::Rejected => {
                self.rejections.fetch_add(1, Ordering::Relaxed);
                crate::metrics::record_circuit_call(&self.service, "rejected");
                return Err(SyncError::CircuitOpen { service: self.service.clone() });
            }
        };

        match f().await {
            Ok(val) => {
                self.successes.fetch_add(1, Ordering::Relaxed);
                self.on_success(trial);
                crate::metrics::record_circuit_call(&self.service, "success");
                Ok(val)
            }
            Err(err) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                self.on_failure(trial);
                crate::metrics::record_circuit_call(&self.service, "failure");
                Err(err)
            }
        }
    }

    fn admit(&self) -> Admit {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => Admit::Allowed { trial: false },
            CircuitState::Open => {
                let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= Duration::from_millis(self.config.reset_timeout_ms) {
                    inner.state = CircuitState::HalfOpen;
                    inner.trial_inflight = true;
                    self.publish_state(CircuitState::HalfOpen);
                    debug!(service = %self.service, "circuit half-open, admitting trial request");
                    Admit::Allowed { trial: true }
                } else {
                    Admit::Rejected
                }
            }
            CircuitState::HalfOpen => {
                if inner.trial_inflight {
                    Admit::Rejected
                } else {
                    inner.trial_inflight = true;
                    Admit::Allowed { trial: true }
                }
            }
        }
    }

    fn on_success(&self, trial: bool) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures = 0;
        inner.last_failure_at = None;
        if trial {
            inner.trial_inflight = false;
            inner.state = CircuitState::Closed;
            inner.opened_at = None;
            self.publish_state(CircuitState::Closed);
            debug!(service = %self.service, "trial succeeded, circuit closed");
        }
    }

    fn on_failure(&self, trial: bool) {
        let mut inner = self.inner.lock();
        if trial {
            inner.trial_inflight = false;
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
            self.publish_state(CircuitState::Open);
            warn!(service = %self.service, "trial failed, circuit reopened");
            return;
        }

        // Stale failures outside the monitoring window do not accumulate.
        let window = Duration::from_millis(self.config.monitoring_period_ms);
        let now = Instant::now();
        if let Some(last) = inner.last_failure_at {
            if now.duration_since(last) > window {
                inner.consecutive_failures = 0;
            }
        }
        inner.consecutive_failures += 1;
        inner.last_failure_at = Some(now);

        if inner.state == CircuitState::Closed
            && inner.consecutive_failures >= self.config.failure_threshold
        {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(now);
            self.publish_state(CircuitState::Open);
            warn!(
                service = %self.service,
                failures = inner.consecutive_failures,
                "failure threshold reached, circuit opened"
            );
        }
    }

    fn publish_state(&self, state: CircuitState) {
        crate::metrics::set_circuit_state(&self.service, state as u8);
    }

    #[must_use]
    pub fn calls_total(&self) -> u64 {
        self.calls_total.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn successes(&self) -> u64 {
        self.successes.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn rejections(&self) -> u64 {
        self.rejections.load(Ordering::Relaxed)
    }
}

/// Registry of per-service circuit breakers, created lazily on first use.
pub struct ServiceCircuits {
    config: CircuitConfig,
    circuits: dashmap::DashMap<String, Arc<CircuitBreaker>>,
}

impl ServiceCircuits {
    pub fn new(config: CircuitConfig) -> Self {
        Self { config, circuits: dashmap::DashMap::new() }
    }

    /// The breaker for `service`, creating it if absent.
    pub fn for_service(&self, service: &str) -> Arc<CircuitBreaker> {
        self.circuits
            .entry(service.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(service, self.config.clone())))
            .clone()
    }

    /// Snapshot of (service, state, rejections) across all breakers.
    pub fn states(&self) -> Vec<(String, CircuitState, u64)> {
        self.circuits
            .iter()
            .map(|e| (e.key().clone(), e.value().state(), e.value().rejections()))
            .collect()
    }
}

impl Default for ServiceCircuits {
    fn default() -> Self {
        Self::new(CircuitConfig::default())
    }
}
