// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for the sync core.
//!
//! Uses the `metrics` crate for backend-agnostic collection. The embedding
//! service chooses the exporter (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `gamehub_sync_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `component`: cache, broker, connection, orchestrator, fanout
//! - `operation`: get, set, delete, publish, flush, ...
//! - `status`: hit, miss, success, error, rejected, dropped

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record a component operation outcome.
pub fn record_operation(component: &str, operation: &str, status: &str) {
    counter!(
        "gamehub_sync_operations_total",
        "component" => component.to_string(),
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record operation latency.
pub fn record_latency(component: &str, operation: &str, duration: Duration) {
    histogram!(
        "gamehub_sync_operation_seconds",
        "component" => component.to_string(),
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record a flushed ingestion batch.
pub fn record_batch(count: usize, bytes: usize) {
    histogram!("gamehub_sync_batch_size").record(count as f64);
    histogram!("gamehub_sync_batch_bytes").record(bytes as f64);
}

/// Record a cache eviction pass.
pub fn record_eviction(count: usize) {
    counter!("gamehub_sync_evictions_total").increment(count as u64);
}

/// Set current cache backing-store memory usage.
pub fn set_cache_memory_bytes(bytes: usize) {
    gauge!("gamehub_sync_cache_memory_bytes").set(bytes as f64);
}

/// Set current cache hit rate (0.0 - 1.0).
pub fn set_cache_hit_rate(rate: f64) {
    gauge!("gamehub_sync_cache_hit_rate").set(rate);
}

/// Record a circuit breaker call outcome (success, failure, rejected).
pub fn record_circuit_call(service: &str, outcome: &str) {
    counter!(
        "gamehub_sync_circuit_calls_total",
        "service" => service.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Set circuit breaker state (0 = closed, 1 = half-open, 2 = open).
pub fn set_circuit_state(service: &str, state: u8) {
    gauge!(
        "gamehub_sync_circuit_state",
        "service" => service.to_string()
    )
    .set(state as f64);
}

/// Record a retry attempt for a named operation.
pub fn record_retry(operation: &str) {
    counter!(
        "gamehub_sync_retries_total",
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Record a published domain event.
pub fn record_event_published(event_type: &str) {
    counter!(
        "gamehub_sync_events_published_total",
        "type" => event_type.to_string()
    )
    .increment(1);
}

/// Record a subscriber callback failure during event dispatch.
pub fn record_delivery_failure(event_type: &str) {
    counter!(
        "gamehub_sync_delivery_failures_total",
        "type" => event_type.to_string()
    )
    .increment(1);
}

/// Record a reconnect attempt for a game connection.
pub fn record_reconnect(game_id: &str) {
    counter!(
        "gamehub_sync_reconnects_total",
        "game" => game_id.to_string()
    )
    .increment(1);
}

/// Record an inbound streaming message that failed to parse and was dropped.
pub fn record_malformed_message(game_id: &str) {
    counter!(
        "gamehub_sync_malformed_messages_total",
        "game" => game_id.to_string()
    )
    .increment(1);
}

/// Set total queued fan-out notifications across all players.
pub fn set_fanout_queue_depth(depth: usize) {
    gauge!("gamehub_sync_fanout_queue_depth").set(depth as f64);
}

/// Record a fan-out notification dropped to queue overflow.
pub fn record_fanout_overflow() {
    counter!("gamehub_sync_fanout_dropped_total").increment(1);
}
