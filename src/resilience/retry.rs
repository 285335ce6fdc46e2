// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry logic with exponential backoff.
//!
//! Retries are gated on the error taxonomy: only kinds in the policy's
//! allow-list are retried, everything else propagates on first failure.
//!
//! # Example
//!
//! ```
//! use gamehub_sync::resilience::RetryPolicy;
//!
//! let policy = RetryPolicy::default();
//! assert_eq!(policy.max_retries, 3);
//!
//! // Startup: fewer attempts, fail fast on bad config
//! let startup = RetryPolicy::startup();
//! assert_eq!(startup.max_retries, 1);
//! ```

use crate::error::{ErrorClass, SyncError};
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

fn default_max_retries() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    200
}
fn default_max_delay_ms() -> u64 {
    10_000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_retryable() -> Vec<ErrorClass> {
    vec![ErrorClass::Network, ErrorClass::ExternalService]
}

/// Configuration for operation retry behavior.
///
/// `max_retries` counts retries, not attempts: an operation runs at most
/// `max_retries + 1` times. Delay before retry `n` (1-based) is
/// `base_delay_ms * backoff_multiplier^(n-1)`, capped at `max_delay_ms`.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Error kinds eligible for retry; all other kinds propagate immediately.
    #[serde(default = "default_retryable")]
    pub retryable: Vec<ErrorClass>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            retryable: default_retryable(),
        }
    }
}

impl RetryPolicy {
    /// Fail-fast policy for startup paths where a bad config should
    /// surface quickly.
    #[must_use]
    pub fn startup() -> Self {
        Self {
            max_retries: 1,
            base_delay_ms: 100,
            max_delay_ms: 500,
            ..Self::default()
        }
    }

    /// Patient policy for background sync work.
    #[must_use]
    pub fn background() -> Self {
        Self {
            max_retries: 5,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            ..Self::default()
        }
    }

    /// Minimal delays for tests.
    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1,
            max_delay_ms: 10,
            ..Self::default()
        }
    }

    /// Delay before retry attempt `n` (1-based), capped at `max_delay_ms`.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
        let millis = (self.base_delay_ms as f64 * exp).min(self.max_delay_ms as f64);
        Duration::from_millis(millis as u64)
    }
}

/// Run `operation`, retrying on retryable failures per `policy`.
///
/// Non-retryable errors propagate immediately without consuming the retry
/// budget. On exhaustion the error from the final attempt is returned.
pub async fn execute_with_retry<F, Fut, T>(
    operation_name: &str,
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T, SyncError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SyncError>>,
{
    let mut attempt: u32 = 0;

    loop {
        match operation().await {
            Ok(val) => {
                if attempt > 0 {
                    info!(
                        operation = operation_name,
                        retries = attempt,
                        "operation succeeded after retries"
                    );
                }
                return Ok(val);
            }
            Err(err) => {
                if !err.is_retryable(&policy.retryable) {
                    return Err(err);
                }

                attempt += 1;
                if attempt > policy.max_retries {
                    warn!(
                        operation = operation_name,
                        attempts = attempt,
                        error = %err,
                        "retry budget exhausted"
                    );
                    return Err(err);
                }

                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    operation = operation_name,
                    attempt,
                    max = policy.max_retries,
                    error = %err,
                    delay_ms = delay.as_millis() as u64,
                    "operation failed, retrying"
                );
                crate::metrics::record_retry(operation_name);
                sleep(delay).await;
            }
        }
    }
}
