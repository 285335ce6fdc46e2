//! Configuration for the sync core.
//!
//! Every section deserializes from partial input; omitted fields take the
//! documented defaults, so an empty `{}` is a valid full configuration.

use crate::cache::invalidation::{default_strategies, InvalidationStrategy};
use crate::resilience::{CircuitConfig, RetryPolicy};
use serde::Deserialize;

fn default_heartbeat_interval_ms() -> u64 {
    30_000
}
fn default_reconnect_delay_ms() -> u64 {
    1000
}
fn default_reconnect_delay_cap_ms() -> u64 {
    30_000
}
fn default_max_reconnect_attempts() -> u32 {
    10
}
fn default_message_timeout_ms() -> u64 {
    10_000
}

/// Streaming connection behavior per game backend.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Base delay for reconnect backoff; doubles per attempt.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_reconnect_delay_cap_ms")]
    pub reconnect_delay_cap_ms: u64,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// Bound on connect handshake and outbound sends.
    #[serde(default = "default_message_timeout_ms")]
    pub message_timeout_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            reconnect_delay_cap_ms: default_reconnect_delay_cap_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            message_timeout_ms: default_message_timeout_ms(),
        }
    }
}

fn default_ttl_secs() -> u64 {
    300
}
fn default_max_memory_bytes() -> usize {
    256 * 1024 * 1024
}
fn default_compression_enabled() -> bool {
    true
}
fn default_compression_threshold_bytes() -> usize {
    1024
}
fn default_key_prefix() -> String {
    "hub".to_string()
}
fn default_sweep_interval_ms() -> u64 {
    30_000
}
fn default_metrics_interval_ms() -> u64 {
    15_000
}

/// Cache layer behavior.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,
    #[serde(default = "default_max_memory_bytes")]
    pub max_memory_bytes: usize,
    #[serde(default = "default_compression_enabled")]
    pub compression_enabled: bool,
    /// Values at or above this size are compressed.
    #[serde(default = "default_compression_threshold_bytes")]
    pub compression_threshold_bytes: usize,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
    #[serde(default = "default_metrics_interval_ms")]
    pub metrics_interval_ms: u64,
    #[serde(default = "default_strategies")]
    pub invalidation_strategies: Vec<InvalidationStrategy>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_ttl_secs(),
            max_memory_bytes: default_max_memory_bytes(),
            compression_enabled: default_compression_enabled(),
            compression_threshold_bytes: default_compression_threshold_bytes(),
            key_prefix: default_key_prefix(),
            sweep_interval_ms: default_sweep_interval_ms(),
            metrics_interval_ms: default_metrics_interval_ms(),
            invalidation_strategies: default_strategies(),
        }
    }
}

fn default_batch_size() -> usize {
    50
}
fn default_batch_interval_ms() -> u64 {
    5000
}
fn default_batch_max_bytes() -> usize {
    1024 * 1024
}
fn default_validation_enabled() -> bool {
    true
}

/// Orchestrator ingestion and validation behavior.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncOptions {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_batch_interval_ms")]
    pub batch_interval_ms: u64,
    #[serde(default = "default_batch_max_bytes")]
    pub batch_max_bytes: usize,
    #[serde(default = "default_validation_enabled")]
    pub validation_enabled: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            batch_interval_ms: default_batch_interval_ms(),
            batch_max_bytes: default_batch_max_bytes(),
            validation_enabled: default_validation_enabled(),
        }
    }
}

fn default_max_subscriptions_per_player() -> usize {
    5
}
fn default_subscription_ttl_ms() -> u64 {
    300_000
}
fn default_flush_interval_ms() -> u64 {
    1000
}
fn default_max_queue_per_player() -> usize {
    100
}

/// Update fan-out behavior.
#[derive(Debug, Clone, Deserialize)]
pub struct FanoutConfig {
    #[serde(default = "default_max_subscriptions_per_player")]
    pub max_subscriptions_per_player: usize,
    /// Subscriptions auto-expire after this long; callers re-subscribe.
    #[serde(default = "default_subscription_ttl_ms")]
    pub subscription_ttl_ms: u64,
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    /// Bounded per-player queue; oldest dropped on overflow.
    #[serde(default = "default_max_queue_per_player")]
    pub max_queue_per_player: usize,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            max_subscriptions_per_player: default_max_subscriptions_per_player(),
            subscription_ttl_ms: default_subscription_ttl_ms(),
            flush_interval_ms: default_flush_interval_ms(),
            max_queue_per_player: default_max_queue_per_player(),
        }
    }
}

fn default_history_capacity() -> usize {
    1000
}

/// Event broker behavior.
#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    /// Bounded event history; oldest dropped past capacity.
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self { history_capacity: default_history_capacity() }
    }
}

/// Top-level configuration aggregating every component section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub circuit: CircuitConfig,
    #[serde(default)]
    pub sync: SyncOptions,
    #[serde(default)]
    pub fanout: FanoutConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_json_is_full_config() {
        let config: SyncConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.connection.heartbeat_interval_ms, 30_000);
        assert_eq!(config.cache.default_ttl_secs, 300);
        assert_eq!(config.sync.batch_size, 50);
        assert_eq!(config.fanout.max_subscriptions_per_player, 5);
        assert_eq!(config.broker.history_capacity, 1000);
        assert!(!config.cache.invalidation_strategies.is_empty());
    }

    #[test]
    fn test_partial_section_overrides() {
        let config: SyncConfig = serde_json::from_str(
            r#"{
                "connection": {"reconnect_delay_ms": 250, "max_reconnect_attempts": 3},
                "cache": {"key_prefix": "test", "compression_enabled": false},
                "sync": {"batch_size": 5}
            }"#,
        )
        .unwrap();

        assert_eq!(config.connection.reconnect_delay_ms, 250);
        assert_eq!(config.connection.max_reconnect_attempts, 3);
        // Untouched fields keep defaults.
        assert_eq!(config.connection.heartbeat_interval_ms, 30_000);
        assert_eq!(config.cache.key_prefix, "test");
        assert!(!config.cache.compression_enabled);
        assert_eq!(config.sync.batch_size, 5);
        assert_eq!(config.sync.batch_interval_ms, 5000);
    }

    #[test]
    fn test_custom_invalidation_strategies() {
        let config: SyncConfig = serde_json::from_str(
            r#"{
                "cache": {
                    "invalidation_strategies": [
                        {"name": "only", "pattern": "{prefix}:x:{id}*", "triggers": ["x_changed"]}
                    ]
                }
            }"#,
        )
        .unwrap();

        assert_eq!(config.cache.invalidation_strategies.len(), 1);
        assert_eq!(config.cache.invalidation_strategies[0].name, "only");
    }
}
