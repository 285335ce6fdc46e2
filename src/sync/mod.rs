// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Multi-game sync orchestration.
//!
//! The orchestrator owns one [`GameAdapter`] per registered game plus an
//! optional streaming connection, and routes everything through the
//! shared cache and event broker. Games are isolated: one backend
//! failing, flapping, or feeding garbage never touches another game's
//! sync loop.
//!
//! Streamed updates are not applied one at a time. They funnel into a
//! single ingest task that batches by count, byte size, and age, then
//! applies each batch as cache invalidation + write-through + event
//! publication.

pub mod adapter;
pub mod validate;

pub use adapter::GameAdapter;
pub use validate::{EnvelopeValidator, PlayerDataValidator};

use crate::batching::{BatchConfig, FlushBatch, FlushReason, HybridBatcher, SizedItem};
use crate::cache::{CacheKey, CacheLayer};
use crate::config::{ConnectionConfig, SyncConfig, SyncOptions};
use crate::connection::{
    ConnectionState, GameConnection, RawUpdate, StreamConnector, StreamMessage,
};
use crate::error::SyncError;
use crate::events::EventBroker;
use crate::fanout::PushControl;
use crate::resilience::{execute_with_retry, RetryPolicy, ServiceCircuits};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

impl SizedItem for RawUpdate {
    fn size_bytes(&self) -> usize {
        let payload = serde_json::to_vec(&self.message).map_or(64, |v| v.len());
        self.game_id.len() + payload
    }
}

/// Point-in-time player state pulled from a game backend.
#[derive(Debug, Clone)]
pub struct PlayerSnapshot {
    pub game_id: String,
    pub player_id: String,
    pub data: Value,
    pub synced_at: u64,
}

/// Per-game sync health, tracked independently per registered game.
#[derive(Debug, Clone)]
pub struct SyncStatus {
    pub game_id: String,
    pub is_connected: bool,
    /// Epoch millis of the last applied sync; never moves backwards.
    pub last_sync_time: u64,
    pub pending_updates: usize,
    pub error_count: u64,
    pub last_error: Option<String>,
}

/// Outcome of a multi-game sync pass: best-effort snapshots plus the
/// per-game errors for the backends that failed.
#[derive(Debug, Default)]
pub struct PlayerSyncReport {
    pub snapshots: Vec<PlayerSnapshot>,
    pub errors: Vec<(String, SyncError)>,
}

struct GameEntry {
    adapter: Arc<dyn GameAdapter>,
    connection: Option<Arc<GameConnection>>,
    status: Mutex<SyncStatus>,
}

/// The sync orchestrator.
pub struct SyncOrchestrator {
    options: SyncOptions,
    connection_config: ConnectionConfig,
    cache: Arc<CacheLayer>,
    broker: Arc<EventBroker>,
    circuits: ServiceCircuits,
    retry: RetryPolicy,
    validator: Arc<dyn PlayerDataValidator>,
    connector: Arc<dyn StreamConnector>,
    games: DashMap<String, Arc<GameEntry>>,
    updates_tx: Mutex<Option<mpsc::Sender<RawUpdate>>>,
    ingest_task: Mutex<Option<JoinHandle<()>>>,
}

impl SyncOrchestrator {
    /// Build the orchestrator and start its ingest task.
    pub fn new(
        config: &SyncConfig,
        cache: Arc<CacheLayer>,
        broker: Arc<EventBroker>,
        connector: Arc<dyn StreamConnector>,
        validator: Arc<dyn PlayerDataValidator>,
    ) -> Arc<Self> {
        let (updates_tx, updates_rx) = mpsc::channel(1024);

        let orchestrator = Arc::new(Self {
            options: config.sync.clone(),
            connection_config: config.connection.clone(),
            cache,
            broker,
            circuits: ServiceCircuits::new(config.circuit.clone()),
            retry: config.retry.clone(),
            validator,
            connector,
            games: DashMap::new(),
            updates_tx: Mutex::new(Some(updates_tx)),
            ingest_task: Mutex::new(None),
        });

        let ingest = Arc::clone(&orchestrator);
        let task = tokio::spawn(async move { ingest.ingest_loop(updates_rx).await });
        *orchestrator.ingest_task.lock() = Some(task);
        orchestrator
    }

    /// Convenience constructor: in-memory cache, fresh broker, envelope
    /// validation.
    pub fn with_defaults(config: &SyncConfig, connector: Arc<dyn StreamConnector>) -> Arc<Self> {
        let cache = Arc::new(CacheLayer::new(
            Arc::new(crate::cache::MemoryStore::new()),
            config.cache.clone(),
        ));
        let broker = Arc::new(EventBroker::new(config.broker.history_capacity));
        Self::new(config, cache, broker, connector, Arc::new(EnvelopeValidator))
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<CacheLayer> {
        &self.cache
    }

    #[must_use]
    pub fn broker(&self) -> &Arc<EventBroker> {
        &self.broker
    }

    /// Sender for raw updates, for integrations that receive pushes
    /// outside the managed streaming connection. `None` after shutdown.
    #[must_use]
    pub fn update_sender(&self) -> Option<mpsc::Sender<RawUpdate>> {
        self.updates_tx.lock().clone()
    }

    /// Register a game and bring its backend online. Idempotent for an
    /// already-registered game. When the adapter exposes a streaming
    /// endpoint, a failed stream connect rolls back the network
    /// connection and the registration.
    #[tracing::instrument(skip(self, adapter), fields(game_id = %adapter.game_id()))]
    pub async fn start_game_sync(&self, adapter: Arc<dyn GameAdapter>) -> Result<(), SyncError> {
        let game_id = adapter.game_id().to_string();
        if self.games.contains_key(&game_id) {
            debug!(game = %game_id, "game already registered");
            return Ok(());
        }

        adapter.connect_to_game_network().await?;

        let connection = match adapter.stream_endpoint() {
            Some(endpoint) => {
                let updates_tx = self.update_sender().ok_or_else(|| {
                    SyncError::BusinessLogic("orchestrator is shut down".to_string())
                })?;
                let conn = Arc::new(GameConnection::new(
                    &game_id,
                    endpoint,
                    self.connection_config.clone(),
                    Arc::clone(&self.connector),
                    updates_tx,
                ));
                if let Err(e) = conn.connect().await {
                    if let Err(d) = adapter.disconnect_from_game_network().await {
                        warn!(game = %game_id, error = %d, "rollback disconnect failed");
                    }
                    return Err(e);
                }
                Some(conn)
            }
            None => None,
        };

        let status = SyncStatus {
            game_id: game_id.clone(),
            is_connected: true,
            last_sync_time: 0,
            pending_updates: 0,
            error_count: 0,
            last_error: None,
        };
        self.games.insert(
            game_id.clone(),
            Arc::new(GameEntry { adapter, connection, status: Mutex::new(status) }),
        );
        info!(game = %game_id, "game sync started");
        Ok(())
    }

    /// Unregister a game and tear down its connections. A no-op for an
    /// unknown game.
    #[tracing::instrument(skip(self))]
    pub async fn stop_game_sync(&self, game_id: &str) -> Result<(), SyncError> {
        let Some((_, entry)) = self.games.remove(game_id) else {
            return Ok(());
        };

        if let Some(conn) = &entry.connection {
            conn.disconnect().await;
        }
        if let Err(e) = entry.adapter.disconnect_from_game_network().await {
            warn!(game = game_id, error = %e, "adapter disconnect failed");
        }
        info!(game = game_id, "game sync stopped");
        Ok(())
    }

    /// Pull one player's state from every registered game concurrently.
    /// One game failing is recorded against that game alone; the rest
    /// still contribute snapshots.
    #[tracing::instrument(skip(self))]
    pub async fn sync_player(&self, player_id: &str) -> PlayerSyncReport {
        let game_ids: Vec<String> = self.games.iter().map(|e| e.key().clone()).collect();

        let pulls = game_ids.into_iter().map(|game_id| async move {
            let result = self.sync_game_player(&game_id, player_id).await;
            (game_id, result)
        });

        let mut report = PlayerSyncReport::default();
        for (game_id, result) in futures_util::future::join_all(pulls).await {
            match result {
                Ok(snapshot) => report.snapshots.push(snapshot),
                Err(e) => report.errors.push((game_id, e)),
            }
        }
        report
    }

    /// Pull one player's current state from one game through retry, the
    /// game's circuit breaker, and validation, then write it through the
    /// cache.
    #[tracing::instrument(skip(self))]
    pub async fn sync_game_player(
        &self,
        game_id: &str,
        player_id: &str,
    ) -> Result<PlayerSnapshot, SyncError> {
        let entry = self
            .games
            .get(game_id)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| {
                SyncError::BusinessLogic(format!("game '{game_id}' is not registered"))
            })?;

        let operation = format!("sync_player:{game_id}");
        let breaker = self.circuits.for_service(game_id);

        let result = execute_with_retry(&operation, &self.retry, || {
            let adapter = Arc::clone(&entry.adapter);
            let breaker = Arc::clone(&breaker);
            let player = player_id.to_string();
            async move { breaker.call(|| adapter.fetch_raw_player_data(&player)).await }
        })
        .await;

        let data = match result {
            Ok(data) => data,
            Err(e) => {
                self.record_game_error(&entry, &e);
                self.broker.publish_sync_failed(game_id, &e).await;
                crate::metrics::record_operation("sync", "player", "error");
                return Err(e);
            }
        };

        if self.options.validation_enabled {
            if let Err(e) = self.validator.validate(game_id, player_id, &data) {
                self.broker
                    .publish_validation_failed(game_id, Some(player_id), &e.to_string())
                    .await;
                self.record_game_error(&entry, &e);
                crate::metrics::record_operation("sync", "player", "rejected");
                return Err(e);
            }
        }

        let key = CacheKey::new(self.cache.key_prefix(), "player", game_id)
            .player(player_id)
            .build();
        self.cache.set(&key, &data, None).await;

        let synced_at = crate::epoch_millis();
        {
            let mut status = entry.status.lock();
            status.last_sync_time = status.last_sync_time.max(synced_at);
        }
        crate::metrics::record_operation("sync", "player", "success");

        Ok(PlayerSnapshot {
            game_id: game_id.to_string(),
            player_id: player_id.to_string(),
            data,
            synced_at,
        })
    }

    /// Current status for one game, with connection state read live.
    #[must_use]
    pub fn game_status(&self, game_id: &str) -> Option<SyncStatus> {
        self.games.get(game_id).map(|entry| {
            let mut status = entry.status.lock().clone();
            status.is_connected = match &entry.connection {
                Some(conn) => conn.state() == ConnectionState::Connected,
                None => true,
            };
            status
        })
    }

    #[must_use]
    pub fn all_statuses(&self) -> Vec<SyncStatus> {
        self.games
            .iter()
            .map(|entry| entry.key().clone())
            .collect::<Vec<_>>()
            .into_iter()
            .filter_map(|game_id| self.game_status(&game_id))
            .collect()
    }

    /// Circuit breaker states per game backend.
    #[must_use]
    pub fn circuit_states(&self) -> Vec<(String, crate::resilience::CircuitState, u64)> {
        self.circuits.states()
    }

    /// Run every registered adapter's health check concurrently.
    pub async fn health_check(&self) -> HashMap<String, Result<(), SyncError>> {
        let adapters: Vec<(String, Arc<dyn GameAdapter>)> = self
            .games
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(&e.value().adapter)))
            .collect();

        let checks = adapters.into_iter().map(|(game_id, adapter)| async move {
            let result = adapter.health_check().await;
            (game_id, result)
        });
        futures_util::future::join_all(checks).await.into_iter().collect()
    }

    /// Stop all games, drain the ingest queue, and wait for the final
    /// flush.
    pub async fn shutdown(&self) {
        let game_ids: Vec<String> = self.games.iter().map(|e| e.key().clone()).collect();
        for game_id in game_ids {
            if let Err(e) = self.stop_game_sync(&game_id).await {
                warn!(game = %game_id, error = %e, "stop during shutdown failed");
            }
        }

        // Closing the channel makes the ingest loop flush and exit.
        drop(self.updates_tx.lock().take());
        let task = self.ingest_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "ingest task join failed");
            }
        }
        info!("orchestrator shut down");
    }

    fn record_game_error(&self, entry: &GameEntry, error: &SyncError) {
        let mut status = entry.status.lock();
        status.error_count += 1;
        status.last_error = Some(error.to_string());
    }

    async fn ingest_loop(self: Arc<Self>, mut updates_rx: mpsc::Receiver<RawUpdate>) {
        let mut batcher: HybridBatcher<RawUpdate> = HybridBatcher::new(BatchConfig {
            flush_count: self.options.batch_size,
            flush_bytes: self.options.batch_max_bytes,
            flush_ms: self.options.batch_interval_ms,
        });

        let tick_ms = (self.options.batch_interval_ms / 2).max(10);
        let mut tick = tokio::time::interval(Duration::from_millis(tick_ms));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                update = updates_rx.recv() => match update {
                    Some(update) => {
                        if let Some(entry) = self.games.get(&update.game_id) {
                            entry.status.lock().pending_updates += 1;
                        }
                        batcher.push(update);
                        if let Some(batch) = batcher.take_if_ready() {
                            self.flush_batch(batch).await;
                        }
                    }
                    None => {
                        if let Some(batch) = batcher.force_flush(FlushReason::Shutdown) {
                            self.flush_batch(batch).await;
                        }
                        return;
                    }
                },
                _ = tick.tick() => {
                    if let Some(batch) = batcher.take_if_ready() {
                        self.flush_batch(batch).await;
                    }
                }
            }
        }
    }

    async fn flush_batch(&self, batch: FlushBatch<RawUpdate>) {
        let count = batch.items.len();
        crate::metrics::record_batch(count, batch.total_bytes);
        debug!(
            updates = count,
            bytes = batch.total_bytes,
            reason = %batch.reason,
            "applying update batch"
        );

        let mut per_game: HashMap<String, usize> = HashMap::new();
        for update in batch.items {
            *per_game.entry(update.game_id.clone()).or_insert(0) += 1;
            self.apply_update(update).await;
        }

        for (game_id, applied) in per_game {
            if let Some(entry) = self.games.get(&game_id) {
                let mut status = entry.status.lock();
                status.pending_updates = status.pending_updates.saturating_sub(applied);
                status.last_sync_time = status.last_sync_time.max(crate::epoch_millis());
            }
            self.broker.publish_sync_completed(&game_id, applied).await;
        }
    }

    /// Apply one streamed update: invalidate dependents, write through,
    /// publish the domain event.
    async fn apply_update(&self, update: RawUpdate) {
        let game_id = update.game_id;
        let prefix = self.cache.key_prefix().to_string();

        let (trigger, data_type, player_id, data) = match update.message {
            StreamMessage::PlayerUpdate { player_id, data, .. } => {
                ("player_update", "player", player_id, data)
            }
            StreamMessage::AssetChange { player_id, data, .. } => {
                ("asset_change", "asset", player_id, data)
            }
            StreamMessage::AchievementEarned { player_id, data, .. } => {
                ("achievement_earned", "achievement", player_id, data)
            }
            // Control frames are filtered at the connection layer.
            StreamMessage::Heartbeat { .. } | StreamMessage::Error { .. } => return,
        };

        let context = HashMap::from([
            ("gameId".to_string(), game_id.clone()),
            ("playerId".to_string(), player_id.clone()),
        ]);
        self.cache.invalidate_by_trigger(trigger, &context).await;

        let key = CacheKey::new(&prefix, data_type, &game_id).player(&player_id).build();
        self.cache.set(&key, &data, None).await;

        match trigger {
            "player_update" => {
                self.broker.publish_player_update(&game_id, &player_id, data).await;
            }
            "asset_change" => {
                self.broker.publish_asset_transfer(&game_id, &player_id, data).await;
            }
            _ => {
                self.broker.publish_achievement_earned(&game_id, &player_id, data).await;
            }
        }
    }
}

/// The orchestrator is the fan-out's upstream push switch: enabling a
/// player subscribes them on every connected stream, disabling
/// unsubscribes. Per-game failures are logged and skipped.
#[async_trait]
impl PushControl for SyncOrchestrator {
    async fn enable_push(&self, player_id: &str) -> Result<(), SyncError> {
        for conn in self.stream_connections() {
            if conn.state() != ConnectionState::Connected {
                continue;
            }
            if let Err(e) = conn.subscribe_to_player(player_id).await {
                warn!(game = conn.game_id(), player = player_id, error = %e, "push enable failed");
            }
        }
        Ok(())
    }

    async fn disable_push(&self, player_id: &str) -> Result<(), SyncError> {
        for conn in self.stream_connections() {
            if conn.state() != ConnectionState::Connected {
                continue;
            }
            if let Err(e) = conn.unsubscribe_from_player(player_id).await {
                warn!(game = conn.game_id(), player = player_id, error = %e, "push disable failed");
            }
        }
        Ok(())
    }
}

impl SyncOrchestrator {
    // Snapshot outside the map guard; subscribe sends then run unlocked.
    fn stream_connections(&self) -> Vec<Arc<GameConnection>> {
        self.games.iter().filter_map(|e| e.value().connection.clone()).collect()
    }
}
