// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Shared cache with TTL, compression, and relationship-aware invalidation.
//!
//! The cache is deliberately forgiving: backing-store failures degrade to
//! misses or no-ops and are never propagated to callers. Consistency is
//! last-write-wins per key; an access-bookkeeping write may lose a race
//! with a concurrent delete, which is acceptable because the reader keeps
//! the value it already fetched.

pub mod compress;
pub mod entry;
pub mod eviction;
pub mod invalidation;
pub mod key;
pub mod store;

pub use entry::{CacheEntry, EntryMeta};
pub use invalidation::{default_strategies, resolve_pattern, InvalidationStrategy};
pub use key::{glob_match, CacheKey};
pub use store::{CacheStore, MemoryStore, StoreError};

use crate::config::CacheConfig;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Aggregate cache health.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheHealth {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Snapshot produced by [`CacheLayer::health`].
#[derive(Debug, Clone)]
pub struct CacheHealthReport {
    pub status: CacheHealth,
    pub ping_latency_ms: f64,
    pub hit_rate: f64,
    pub error_rate: f64,
    pub memory_used: usize,
    pub memory_limit: usize,
}

/// The cache layer over a pluggable backing store.
pub struct CacheLayer {
    store: Arc<dyn CacheStore>,
    config: CacheConfig,

    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
    operations: AtomicU64,
}

impl CacheLayer {
    pub fn new(store: Arc<dyn CacheStore>, config: CacheConfig) -> Self {
        Self {
            store,
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            operations: AtomicU64::new(0),
        }
    }

    /// In-process cache with default config, mainly for tests and demos.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()), CacheConfig::default())
    }

    #[must_use]
    pub fn key_prefix(&self) -> &str {
        &self.config.key_prefix
    }

    /// Look up a key. Misses, expired entries, and backend failures all
    /// return `None`.
    pub async fn get(&self, key: &str) -> Option<Value> {
        let start = Instant::now();
        self.operations.fetch_add(1, Ordering::Relaxed);

        let mut entry = match self.store.get(key).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                self.record_miss(start);
                return None;
            }
            Err(e) => {
                warn!(key, error = %e, "cache read failed, treating as miss");
                self.errors.fetch_add(1, Ordering::Relaxed);
                self.record_miss(start);
                return None;
            }
        };

        let now = crate::epoch_millis();
        if entry.is_expired(now) {
            let _ = self.store.delete(key).await;
            self.record_miss(start);
            return None;
        }

        // Re-persist refreshed access stats with the existing ttl so
        // eviction ranks on real usage. Best-effort.
        entry.touch(now);
        if let Err(e) = self.store.put(entry.clone()).await {
            debug!(key, error = %e, "access bookkeeping write failed");
        }

        let bytes = match compress::decompress(&entry.value) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key, error = %e, "cached payload undecodable, dropping entry");
                self.errors.fetch_add(1, Ordering::Relaxed);
                let _ = self.store.delete(key).await;
                self.record_miss(start);
                return None;
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                crate::metrics::record_operation("cache", "get", "hit");
                crate::metrics::record_latency("cache", "get", start.elapsed());
                Some(value)
            }
            Err(e) => {
                warn!(key, error = %e, "cached payload is not valid JSON, dropping entry");
                self.errors.fetch_add(1, Ordering::Relaxed);
                let _ = self.store.delete(key).await;
                self.record_miss(start);
                None
            }
        }
    }

    fn record_miss(&self, start: Instant) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        crate::metrics::record_operation("cache", "get", "miss");
        crate::metrics::record_latency("cache", "get", start.elapsed());
    }

    /// Store a value under `key`. Values at or above the compression
    /// threshold are compressed when compression is enabled. Backend
    /// failures are swallowed; the cache degrades to a no-op.
    pub async fn set(&self, key: &str, value: &Value, ttl_secs: Option<u64>) {
        self.operations.fetch_add(1, Ordering::Relaxed);
        let ttl = ttl_secs.unwrap_or(self.config.default_ttl_secs);

        let raw = match serde_json::to_vec(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key, error = %e, "value not serializable, skipping cache write");
                self.errors.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        let should_compress = cfg!(feature = "compression")
            && self.config.compression_enabled
            && raw.len() >= self.config.compression_threshold_bytes;
        let (bytes, compressed) = if should_compress {
            match compress::compress(&raw) {
                Ok(c) => (c, true),
                Err(e) => {
                    warn!(key, error = %e, "compression failed, storing uncompressed");
                    (raw, false)
                }
            }
        } else {
            (raw, false)
        };

        if let Err(e) = self.store.put(CacheEntry::new(key, bytes, ttl, compressed)).await {
            warn!(key, error = %e, "cache write failed");
            self.errors.fetch_add(1, Ordering::Relaxed);
            crate::metrics::record_operation("cache", "set", "error");
            return;
        }
        crate::metrics::record_operation("cache", "set", "success");
    }

    /// Remove a key; returns whether it existed.
    pub async fn delete(&self, key: &str) -> bool {
        self.operations.fetch_add(1, Ordering::Relaxed);
        match self.store.delete(key).await {
            Ok(existed) => {
                crate::metrics::record_operation("cache", "delete", "success");
                existed
            }
            Err(e) => {
                warn!(key, error = %e, "cache delete failed");
                self.errors.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Remove every key matching a glob pattern; returns the count removed.
    pub async fn invalidate_pattern(&self, pattern: &str) -> usize {
        self.operations.fetch_add(1, Ordering::Relaxed);
        let keys = match self.store.keys(pattern).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(pattern, error = %e, "pattern scan failed");
                self.errors.fetch_add(1, Ordering::Relaxed);
                return 0;
            }
        };

        let mut removed = 0;
        for key in keys {
            match self.store.delete(&key).await {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(key, error = %e, "invalidation delete failed");
                    self.errors.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        debug!(pattern, removed, "pattern invalidation complete");
        removed
    }

    /// Fire every configured strategy whose trigger set contains `trigger`.
    ///
    /// The configured key prefix is injected into the context automatically.
    /// Strategies are independent; one failing scan does not stop the rest.
    /// A strategy with a `ttl_override` re-bases matched entries' TTL
    /// instead of deleting them. Returns the total entries affected.
    pub async fn invalidate_by_trigger(
        &self,
        trigger: &str,
        context: &HashMap<String, String>,
    ) -> usize {
        let mut ctx = context.clone();
        ctx.entry("prefix".to_string()).or_insert_with(|| self.config.key_prefix.clone());

        let mut removed = 0;
        for strategy in &self.config.invalidation_strategies {
            if !strategy.handles(trigger) {
                continue;
            }
            let pattern = resolve_pattern(&strategy.pattern, &ctx);
            let count = match strategy.ttl_override {
                Some(ttl_secs) => self.refresh_ttl_pattern(&pattern, ttl_secs).await,
                None => self.invalidate_pattern(&pattern).await,
            };
            debug!(
                strategy = %strategy.name,
                trigger,
                pattern = %pattern,
                affected = count,
                "trigger invalidation"
            );
            removed += count;
        }
        removed
    }

    /// Re-base the TTL of every key matching a glob pattern; returns the
    /// count touched. Used by strategies that soften invalidation into a
    /// shortened (or extended) lifetime.
    async fn refresh_ttl_pattern(&self, pattern: &str, ttl_secs: u64) -> usize {
        let keys = match self.store.keys(pattern).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(pattern, error = %e, "ttl refresh scan failed");
                self.errors.fetch_add(1, Ordering::Relaxed);
                return 0;
            }
        };

        let now = crate::epoch_millis();
        let mut touched = 0;
        for key in keys {
            let mut entry = match self.store.get(&key).await {
                Ok(Some(entry)) => entry,
                Ok(None) => continue,
                Err(e) => {
                    warn!(key, error = %e, "ttl refresh read failed");
                    self.errors.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
            };
            entry.ttl_secs = ttl_secs;
            entry.created_at = now;
            if let Err(e) = self.store.put(entry).await {
                warn!(key, error = %e, "ttl refresh write failed");
                self.errors.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            touched += 1;
        }
        touched
    }

    /// Convenience invalidation for common domain entity kinds.
    pub async fn smart_invalidate(
        &self,
        data_type: &str,
        entity_id: &str,
        game_id: Option<&str>,
    ) -> usize {
        let prefix = &self.config.key_prefix;
        let game = game_id.unwrap_or("*");

        let patterns: Vec<String> = match data_type {
            // A player change touches the player's data, assets, and
            // achievements alike.
            "player" => vec![
                format!("{prefix}:player:{game}:{entity_id}*"),
                format!("{prefix}:asset:{game}:{entity_id}*"),
                format!("{prefix}:achievement:{game}:{entity_id}*"),
            ],
            "asset" => vec![format!("{prefix}:asset:{game}:*")],
            "achievement" => vec![format!("{prefix}:achievement:{game}:*")],
            "game" => vec![format!("{prefix}:*:{entity_id}*")],
            _ => vec![format!("{prefix}:*{entity_id}*")],
        };

        let mut removed = 0;
        for pattern in patterns {
            removed += self.invalidate_pattern(&pattern).await;
        }
        removed
    }

    /// Spawn the background sweep and memory-pressure tasks.
    pub fn spawn_maintenance(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let sweep = {
            let cache = Arc::clone(self);
            tokio::spawn(async move {
                let mut tick =
                    tokio::time::interval(Duration::from_millis(cache.config.sweep_interval_ms));
                tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    tick.tick().await;
                    cache.sweep_expired().await;
                }
            })
        };

        let pressure = {
            let cache = Arc::clone(self);
            tokio::spawn(async move {
                let mut tick =
                    tokio::time::interval(Duration::from_millis(cache.config.metrics_interval_ms));
                tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    tick.tick().await;
                    cache.refresh_metrics_and_evict().await;
                }
            })
        };

        vec![sweep, pressure]
    }

    /// Remove entries whose TTL has already lapsed.
    pub async fn sweep_expired(&self) -> usize {
        let metas = match self.store.scan_meta().await {
            Ok(metas) => metas,
            Err(e) => {
                warn!(error = %e, "sweep scan failed");
                return 0;
            }
        };

        let now = crate::epoch_millis();
        let mut removed = 0;
        for meta in metas {
            if meta.is_expired(now) && matches!(self.store.delete(&meta.key).await, Ok(true)) {
                removed += 1;
            }
        }
        if removed > 0 {
            debug!(removed, "expired entries swept");
        }
        removed
    }

    /// Refresh memory/hit-rate gauges and evict the coldest quartile when
    /// over the memory limit.
    pub async fn refresh_metrics_and_evict(&self) -> usize {
        let memory = self.store.memory_used().await.unwrap_or(0);
        crate::metrics::set_cache_memory_bytes(memory);
        crate::metrics::set_cache_hit_rate(self.hit_rate());

        if memory <= self.config.max_memory_bytes {
            return 0;
        }

        let metas = match self.store.scan_meta().await {
            Ok(metas) => metas,
            Err(e) => {
                warn!(error = %e, "eviction scan failed");
                return 0;
            }
        };

        let candidates = eviction::eviction_candidates(&metas);
        let mut evicted = 0;
        for key in &candidates {
            if matches!(self.store.delete(key).await, Ok(true)) {
                evicted += 1;
            }
        }
        if evicted > 0 {
            warn!(evicted, memory, limit = self.config.max_memory_bytes, "memory pressure eviction");
            crate::metrics::record_eviction(evicted);
        }
        evicted
    }

    /// Hit rate over the cache's lifetime; 1.0 when no reads happened yet.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            return 1.0;
        }
        hits as f64 / total as f64
    }

    fn error_rate(&self) -> f64 {
        let errors = self.errors.load(Ordering::Relaxed);
        let ops = self.operations.load(Ordering::Relaxed);
        if ops == 0 {
            return 0.0;
        }
        errors as f64 / ops as f64
    }

    /// Aggregate health from ping latency, hit rate, error rate, and
    /// memory pressure. One violated threshold degrades; two or more, or
    /// an unreachable backend, is unhealthy.
    pub async fn health(&self) -> CacheHealthReport {
        let start = Instant::now();
        let ping_ok = self.store.ping().await.is_ok();
        let ping_latency_ms = start.elapsed().as_secs_f64() * 1000.0;
        let memory_used = self.store.memory_used().await.unwrap_or(0);

        let hit_rate = self.hit_rate();
        let error_rate = self.error_rate();

        if !ping_ok {
            return CacheHealthReport {
                status: CacheHealth::Unhealthy,
                ping_latency_ms,
                hit_rate,
                error_rate,
                memory_used,
                memory_limit: self.config.max_memory_bytes,
            };
        }

        let mut violations = 0;
        if ping_latency_ms > 100.0 {
            violations += 1;
        }
        if hit_rate < 0.5 {
            violations += 1;
        }
        if error_rate > 0.05 {
            violations += 1;
        }
        if memory_used as f64 > self.config.max_memory_bytes as f64 * 0.9 {
            violations += 1;
        }

        let status = match violations {
            0 => CacheHealth::Healthy,
            1 => CacheHealth::Degraded,
            _ => CacheHealth::Unhealthy,
        };

        CacheHealthReport {
            status,
            ping_latency_ms,
            hit_rate,
            error_rate,
            memory_used,
            memory_limit: self.config.max_memory_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cache() -> CacheLayer {
        CacheLayer::in_memory()
    }

    fn small_config() -> CacheConfig {
        CacheConfig { max_memory_bytes: 64, ..CacheConfig::default() }
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let cache = cache();
        cache.set("hub:player:g1:p1", &json!({"level": 3}), Some(60)).await;

        let value = cache.get("hub:player:g1:p1").await.unwrap();
        assert_eq!(value["level"], 3);
    }

    #[tokio::test]
    async fn test_get_miss_returns_none() {
        let cache = cache();
        assert!(cache.get("hub:player:g1:missing").await.is_none());
    }

    #[tokio::test]
    async fn test_zero_ttl_expires_immediately() {
        let cache = cache();
        cache.set("hub:player:g1:p1", &json!(1), Some(0)).await;
        assert!(cache.get("hub:player:g1:p1").await.is_none());
    }

    #[tokio::test]
    async fn test_delete_then_get() {
        let cache = cache();
        cache.set("hub:player:g1:p1", &json!(1), None).await;

        assert!(cache.delete("hub:player:g1:p1").await);
        assert!(cache.get("hub:player:g1:p1").await.is_none());
        assert!(!cache.delete("hub:player:g1:p1").await);
    }

    #[tokio::test]
    async fn test_invalidate_pattern_counts() {
        let cache = cache();
        cache.set("hub:player:g1:p1", &json!(1), None).await;
        cache.set("hub:player:g1:p2", &json!(2), None).await;
        cache.set("hub:asset:g1:p1", &json!(3), None).await;

        let removed = cache.invalidate_pattern("hub:player:g1:*").await;
        assert_eq!(removed, 2);
        assert!(cache.get("hub:asset:g1:p1").await.is_some());
    }

    #[tokio::test]
    async fn test_trigger_invalidation_scoped_to_player() {
        let cache = cache();
        cache.set("hub:player:g1:p1", &json!(1), None).await;
        cache.set("hub:player:g1:p2", &json!(2), None).await;

        let ctx: HashMap<String, String> = [
            ("gameId".to_string(), "g1".to_string()),
            ("playerId".to_string(), "p1".to_string()),
        ]
        .into();
        let removed = cache.invalidate_by_trigger("player_update", &ctx).await;

        assert!(removed >= 1);
        assert!(cache.get("hub:player:g1:p1").await.is_none());
        // Other players untouched.
        assert!(cache.get("hub:player:g1:p2").await.is_some());
    }

    #[tokio::test]
    async fn test_unknown_trigger_removes_nothing() {
        let cache = cache();
        cache.set("hub:player:g1:p1", &json!(1), None).await;

        let removed = cache.invalidate_by_trigger("no_such_trigger", &HashMap::new()).await;
        assert_eq!(removed, 0);
        assert!(cache.get("hub:player:g1:p1").await.is_some());
    }

    #[tokio::test]
    async fn test_ttl_override_rebases_instead_of_deleting() {
        let store = Arc::new(MemoryStore::new());
        let config = CacheConfig {
            invalidation_strategies: vec![InvalidationStrategy {
                name: "player_soft".into(),
                pattern: "{prefix}:player:{gameId}:{playerId}*".into(),
                triggers: vec!["player_update".into()],
                ttl_override: Some(600),
            }],
            ..CacheConfig::default()
        };
        let cache = CacheLayer::new(store.clone(), config);
        cache.set("hub:player:g1:p1", &json!({"level": 3}), Some(30)).await;

        let ctx: HashMap<String, String> = [
            ("gameId".to_string(), "g1".to_string()),
            ("playerId".to_string(), "p1".to_string()),
        ]
        .into();
        let touched = cache.invalidate_by_trigger("player_update", &ctx).await;
        assert_eq!(touched, 1);

        // Entry survives, carrying the strategy's TTL.
        assert!(cache.get("hub:player:g1:p1").await.is_some());
        let entry = store.get("hub:player:g1:p1").await.unwrap().unwrap();
        assert_eq!(entry.ttl_secs, 600);
    }

    #[tokio::test]
    async fn test_smart_invalidate_player_cascades() {
        let cache = cache();
        cache.set("hub:player:g1:p1", &json!(1), None).await;
        cache.set("hub:asset:g1:p1:sword", &json!(2), None).await;
        cache.set("hub:achievement:g1:p1:first", &json!(3), None).await;
        cache.set("hub:player:g1:p2", &json!(4), None).await;

        let removed = cache.smart_invalidate("player", "p1", Some("g1")).await;
        assert_eq!(removed, 3);
        assert!(cache.get("hub:player:g1:p2").await.is_some());
    }

    #[cfg(feature = "compression")]
    #[tokio::test]
    async fn test_large_values_compressed() {
        let store = Arc::new(MemoryStore::new());
        let cache = CacheLayer::new(store.clone(), CacheConfig::default());

        let big = json!({"blob": "x".repeat(4096)});
        cache.set("hub:player:g1:p1", &big, None).await;

        let entry = store.get("hub:player:g1:p1").await.unwrap().unwrap();
        assert!(entry.compressed);
        assert!(entry.size_bytes < 4096);

        // Round-trips transparently.
        assert_eq!(cache.get("hub:player:g1:p1").await.unwrap(), big);
    }

    #[cfg(feature = "compression")]
    #[tokio::test]
    async fn test_small_values_not_compressed() {
        let store = Arc::new(MemoryStore::new());
        let cache = CacheLayer::new(store.clone(), CacheConfig::default());

        cache.set("hub:player:g1:p1", &json!({"level": 1}), None).await;
        let entry = store.get("hub:player:g1:p1").await.unwrap().unwrap();
        assert!(!entry.compressed);
    }

    #[tokio::test]
    async fn test_sweep_removes_expired() {
        let cache = cache();
        cache.set("dead", &json!(1), Some(0)).await;
        cache.set("alive", &json!(2), Some(60)).await;

        let removed = cache.sweep_expired().await;
        assert_eq!(removed, 1);
        assert!(cache.get("alive").await.is_some());
    }

    #[tokio::test]
    async fn test_memory_pressure_evicts_cold_quartile() {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(CacheLayer::new(store.clone(), small_config()));

        for i in 0..8 {
            cache.set(&format!("hub:player:g1:p{i}"), &json!({"n": i}), None).await;
        }
        // Warm everything except p0 and p1 so they rank coldest.
        for i in 2..8 {
            let _ = cache.get(&format!("hub:player:g1:p{i}")).await;
        }

        let evicted = cache.refresh_metrics_and_evict().await;
        assert_eq!(evicted, 2);
        assert!(store.get("hub:player:g1:p0").await.unwrap().is_none());
        assert!(store.get("hub:player:g1:p1").await.unwrap().is_none());
        assert!(store.get("hub:player:g1:p7").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_no_eviction_under_limit() {
        let cache = cache();
        cache.set("hub:player:g1:p1", &json!(1), None).await;
        assert_eq!(cache.refresh_metrics_and_evict().await, 0);
    }

    #[tokio::test]
    async fn test_health_on_fresh_cache() {
        let cache = cache();
        let report = cache.health().await;
        assert_eq!(report.status, CacheHealth::Healthy);
    }

    #[tokio::test]
    async fn test_health_degrades_on_low_hit_rate() {
        let cache = cache();
        for i in 0..10 {
            let _ = cache.get(&format!("missing-{i}")).await;
        }

        let report = cache.health().await;
        assert!(report.hit_rate < 0.5);
        assert_eq!(report.status, CacheHealth::Degraded);
    }
}
