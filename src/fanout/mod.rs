// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-player batched update fan-out.
//!
//! External subscribers register per player and receive queued updates in
//! batches on a fixed flush interval. The fan-out layer is the single
//! authority over upstream push mode: a player's first subscription turns
//! real-time updates on, removal of the last one turns them off, so idle
//! players cost nothing upstream.
//!
//! Subscriptions auto-expire after a configurable TTL and must be
//! re-registered, which bounds the damage of leaked callbacks.

use crate::config::FanoutConfig;
use crate::error::SyncError;
use crate::events::{DomainEvent, EventBroker, EventFilter, EventHandler, EventType};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

/// Destination for a player's batched updates.
#[async_trait]
pub trait UpdateSink: Send + Sync {
    async fn deliver(&self, player_id: &str, updates: &[DomainEvent]) -> Result<(), SyncError>;
}

/// Upstream switch for per-player real-time updates.
#[async_trait]
pub trait PushControl: Send + Sync {
    async fn enable_push(&self, player_id: &str) -> Result<(), SyncError>;
    async fn disable_push(&self, player_id: &str) -> Result<(), SyncError>;
}

struct FanoutSubscription {
    id: Uuid,
    sink: Arc<dyn UpdateSink>,
    /// Event types this subscriber wants; `None` means all.
    event_types: Option<HashSet<EventType>>,
    created_at: u64,
}

#[derive(Default)]
struct PlayerChannel {
    subscriptions: Vec<FanoutSubscription>,
    queue: VecDeque<DomainEvent>,
}

/// The update fan-out manager.
pub struct UpdateFanout {
    config: FanoutConfig,
    push: Arc<dyn PushControl>,
    players: DashMap<String, PlayerChannel>,
    flush_task: Mutex<Option<JoinHandle<()>>>,
}

impl UpdateFanout {
    pub fn new(config: FanoutConfig, push: Arc<dyn PushControl>) -> Self {
        Self { config, push, players: DashMap::new(), flush_task: Mutex::new(None) }
    }

    /// Register a sink for one player's updates, optionally narrowed to
    /// specific event types. The first subscription for a player enables
    /// upstream push. Fails with a business-logic error at the per-player
    /// cap.
    pub async fn subscribe(
        &self,
        player_id: &str,
        sink: Arc<dyn UpdateSink>,
        event_types: Option<HashSet<EventType>>,
    ) -> Result<Uuid, SyncError> {
        let was_empty = {
            let channel = self.players.entry(player_id.to_string()).or_default();
            if channel.subscriptions.len() >= self.config.max_subscriptions_per_player {
                return Err(SyncError::BusinessLogic(format!(
                    "subscription limit exceeded for player '{player_id}'"
                )));
            }
            channel.subscriptions.is_empty()
        };

        if was_empty {
            self.push.enable_push(player_id).await?;
        }

        let id = Uuid::new_v4();
        let mut channel = self.players.entry(player_id.to_string()).or_default();
        if channel.subscriptions.len() >= self.config.max_subscriptions_per_player {
            return Err(SyncError::BusinessLogic(format!(
                "subscription limit exceeded for player '{player_id}'"
            )));
        }
        channel.subscriptions.push(FanoutSubscription {
            id,
            sink,
            event_types,
            created_at: crate::epoch_millis(),
        });
        debug!(player = player_id, subscription = %id, "fanout subscription added");
        Ok(id)
    }

    /// Remove one subscription. Idempotent. Removing a player's last
    /// subscription disables upstream push for them.
    pub async fn unsubscribe(&self, player_id: &str, id: Uuid) -> bool {
        let (removed, now_empty) = match self.players.get_mut(player_id) {
            Some(mut channel) => {
                let before = channel.subscriptions.len();
                channel.subscriptions.retain(|s| s.id != id);
                let removed = channel.subscriptions.len() != before;
                (removed, removed && channel.subscriptions.is_empty())
            }
            None => (false, false),
        };

        if now_empty {
            if let Err(e) = self.push.disable_push(player_id).await {
                warn!(player = player_id, error = %e, "disable push failed");
            }
            self.players.remove_if(player_id, |_, ch| ch.subscriptions.is_empty());
        }
        removed
    }

    #[must_use]
    pub fn subscription_count(&self, player_id: &str) -> usize {
        self.players.get(player_id).map_or(0, |ch| ch.subscriptions.len())
    }

    /// Queue an update for a player. Players without subscribers queue
    /// nothing; a full queue drops its oldest entry.
    pub fn enqueue(&self, player_id: &str, event: DomainEvent) {
        if let Some(mut channel) = self.players.get_mut(player_id) {
            if channel.subscriptions.is_empty() {
                return;
            }
            if channel.queue.len() >= self.config.max_queue_per_player {
                channel.queue.pop_front();
                crate::metrics::record_fanout_overflow();
            }
            channel.queue.push_back(event);
        }
    }

    /// Subscribe the fan-out to player-scoped broker events.
    pub fn attach_to_broker(self: &Arc<Self>, broker: &EventBroker, priority: i32) -> Uuid {
        let filter = EventFilter::for_types([
            EventType::PlayerUpdate,
            EventType::AssetTransfer,
            EventType::AchievementEarned,
        ]);
        broker.subscribe(filter, priority, Arc::new(BrokerBridge { fanout: Arc::clone(self) }))
    }

    /// Start the periodic flush task.
    pub fn spawn_flush(self: &Arc<Self>) {
        let fanout = Arc::clone(self);
        let task = tokio::spawn(async move {
            let mut tick =
                tokio::time::interval(Duration::from_millis(fanout.config.flush_interval_ms));
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tick.tick().await;
                fanout.flush_once().await;
            }
        });
        if let Some(old) = self.flush_task.lock().replace(task) {
            old.abort();
        }
    }

    pub fn stop(&self) {
        if let Some(task) = self.flush_task.lock().take() {
            task.abort();
        }
    }

    /// One flush pass: expire stale subscriptions, deliver queued
    /// updates, and release push mode for players left without
    /// subscribers.
    pub async fn flush_once(&self) {
        let now = crate::epoch_millis();
        let ttl = self.config.subscription_ttl_ms;

        type Delivery = (Arc<dyn UpdateSink>, Option<HashSet<EventType>>);
        let mut deliveries: Vec<(String, Vec<DomainEvent>, Vec<Delivery>)> = Vec::new();
        let mut released: Vec<String> = Vec::new();
        let mut queued_total = 0usize;

        for mut entry in self.players.iter_mut() {
            let player = entry.key().clone();
            let channel = entry.value_mut();

            let before = channel.subscriptions.len();
            channel.subscriptions.retain(|s| now.saturating_sub(s.created_at) < ttl);
            if channel.subscriptions.len() != before {
                debug!(
                    player = %player,
                    expired = before - channel.subscriptions.len(),
                    "fanout subscriptions expired"
                );
            }

            if channel.subscriptions.is_empty() {
                if before > 0 {
                    released.push(player);
                }
                channel.queue.clear();
                continue;
            }

            if channel.queue.is_empty() {
                continue;
            }
            let events: Vec<DomainEvent> = channel.queue.drain(..).collect();
            let sinks: Vec<Delivery> = channel
                .subscriptions
                .iter()
                .map(|s| (Arc::clone(&s.sink), s.event_types.clone()))
                .collect();
            deliveries.push((player, events, sinks));
        }

        for entry in self.players.iter() {
            queued_total += entry.value().queue.len();
        }
        crate::metrics::set_fanout_queue_depth(queued_total);

        for (player, events, sinks) in deliveries {
            for (sink, event_types) in sinks {
                let batch: Vec<DomainEvent> = events
                    .iter()
                    .filter(|e| event_types.as_ref().map_or(true, |t| t.contains(&e.event_type)))
                    .cloned()
                    .collect();
                if batch.is_empty() {
                    continue;
                }
                if let Err(e) = sink.deliver(&player, &batch).await {
                    warn!(player = %player, error = %e, "fanout delivery failed");
                    crate::metrics::record_operation("fanout", "deliver", "error");
                } else {
                    crate::metrics::record_operation("fanout", "deliver", "success");
                }
            }
        }

        for player in released {
            if let Err(e) = self.push.disable_push(&player).await {
                warn!(player = %player, error = %e, "disable push failed");
            }
            self.players.remove_if(&player, |_, ch| ch.subscriptions.is_empty());
        }
    }
}

struct BrokerBridge {
    fanout: Arc<UpdateFanout>,
}

#[async_trait]
impl EventHandler for BrokerBridge {
    async fn handle(&self, event: &DomainEvent) -> Result<(), SyncError> {
        if let Some(player) = &event.player_id {
            self.fanout.enqueue(player, event.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RecordingPush {
        enabled: Mutex<Vec<String>>,
        disabled: Mutex<Vec<String>>,
    }

    impl RecordingPush {
        fn new() -> Arc<Self> {
            Arc::new(Self { enabled: Mutex::new(Vec::new()), disabled: Mutex::new(Vec::new()) })
        }
    }

    #[async_trait]
    impl PushControl for RecordingPush {
        async fn enable_push(&self, player_id: &str) -> Result<(), SyncError> {
            self.enabled.lock().push(player_id.to_string());
            Ok(())
        }

        async fn disable_push(&self, player_id: &str) -> Result<(), SyncError> {
            self.disabled.lock().push(player_id.to_string());
            Ok(())
        }
    }

    struct CollectingSink {
        batches: Mutex<Vec<(String, Vec<DomainEvent>)>>,
        failures: AtomicUsize,
    }

    impl CollectingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self { batches: Mutex::new(Vec::new()), failures: AtomicUsize::new(0) })
        }

        fn delivered(&self) -> Vec<(String, Vec<DomainEvent>)> {
            self.batches.lock().clone()
        }
    }

    #[async_trait]
    impl UpdateSink for CollectingSink {
        async fn deliver(&self, player_id: &str, updates: &[DomainEvent]) -> Result<(), SyncError> {
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(SyncError::Network("sink unreachable".into()));
            }
            self.batches.lock().push((player_id.to_string(), updates.to_vec()));
            Ok(())
        }
    }

    fn test_config() -> FanoutConfig {
        FanoutConfig {
            max_subscriptions_per_player: 2,
            subscription_ttl_ms: 60_000,
            flush_interval_ms: 10,
            max_queue_per_player: 3,
        }
    }

    fn player_event(player: &str, n: u64) -> DomainEvent {
        let mut e = DomainEvent::new(
            EventType::PlayerUpdate,
            "g1",
            Some(player.to_string()),
            json!({"n": n}),
            "test",
        );
        e.id = n;
        e
    }

    #[tokio::test]
    async fn test_first_subscription_enables_push() {
        let push = RecordingPush::new();
        let fanout = UpdateFanout::new(test_config(), push.clone());

        fanout.subscribe("p1", CollectingSink::new(), None).await.unwrap();
        assert_eq!(*push.enabled.lock(), vec!["p1"]);

        fanout.subscribe("p1", CollectingSink::new(), None).await.unwrap();
        // Second subscription does not re-enable.
        assert_eq!(push.enabled.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_subscription_cap_enforced() {
        let fanout = UpdateFanout::new(test_config(), RecordingPush::new());

        fanout.subscribe("p1", CollectingSink::new(), None).await.unwrap();
        fanout.subscribe("p1", CollectingSink::new(), None).await.unwrap();

        let result = fanout.subscribe("p1", CollectingSink::new(), None).await;
        assert!(matches!(result, Err(SyncError::BusinessLogic(_))));
        assert_eq!(fanout.subscription_count("p1"), 2);
    }

    #[tokio::test]
    async fn test_last_unsubscribe_disables_push() {
        let push = RecordingPush::new();
        let fanout = UpdateFanout::new(test_config(), push.clone());

        let a = fanout.subscribe("p1", CollectingSink::new(), None).await.unwrap();
        let b = fanout.subscribe("p1", CollectingSink::new(), None).await.unwrap();

        assert!(fanout.unsubscribe("p1", a).await);
        assert!(push.disabled.lock().is_empty());

        assert!(fanout.unsubscribe("p1", b).await);
        assert_eq!(*push.disabled.lock(), vec!["p1"]);

        // Idempotent.
        assert!(!fanout.unsubscribe("p1", b).await);
        assert_eq!(push.disabled.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_flush_delivers_queued_batch() {
        let fanout = UpdateFanout::new(test_config(), RecordingPush::new());
        let sink = CollectingSink::new();
        fanout.subscribe("p1", sink.clone(), None).await.unwrap();

        fanout.enqueue("p1", player_event("p1", 1));
        fanout.enqueue("p1", player_event("p1", 2));
        fanout.flush_once().await;

        let delivered = sink.delivered();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].0, "p1");
        assert_eq!(delivered[0].1.len(), 2);

        // Queue drained; nothing redelivered.
        fanout.flush_once().await;
        assert_eq!(sink.delivered().len(), 1);
    }

    #[tokio::test]
    async fn test_queue_overflow_drops_oldest() {
        let fanout = UpdateFanout::new(test_config(), RecordingPush::new());
        let sink = CollectingSink::new();
        fanout.subscribe("p1", sink.clone(), None).await.unwrap();

        for n in 1..=5 {
            fanout.enqueue("p1", player_event("p1", n));
        }
        fanout.flush_once().await;

        let delivered = sink.delivered();
        let ids: Vec<u64> = delivered[0].1.iter().map(|e| e.id).collect();
        // Capacity 3: events 1 and 2 were dropped.
        assert_eq!(ids, vec![3, 4, 5]);
    }

    #[tokio::test]
    async fn test_no_subscribers_means_no_queueing() {
        let fanout = UpdateFanout::new(test_config(), RecordingPush::new());
        fanout.enqueue("ghost", player_event("ghost", 1));
        assert!(fanout.players.get("ghost").is_none());
    }

    #[tokio::test]
    async fn test_expired_subscription_removed_and_push_released() {
        let push = RecordingPush::new();
        let config = FanoutConfig { subscription_ttl_ms: 0, ..test_config() };
        let fanout = UpdateFanout::new(config, push.clone());

        fanout.subscribe("p1", CollectingSink::new(), None).await.unwrap();
        fanout.flush_once().await;

        assert_eq!(fanout.subscription_count("p1"), 0);
        assert_eq!(*push.disabled.lock(), vec!["p1"]);
    }

    #[tokio::test]
    async fn test_event_type_filter() {
        let fanout = UpdateFanout::new(test_config(), RecordingPush::new());
        let sink = CollectingSink::new();
        fanout
            .subscribe("p1", sink.clone(), Some([EventType::AssetTransfer].into()))
            .await
            .unwrap();

        fanout.enqueue("p1", player_event("p1", 1));
        let mut asset = player_event("p1", 2);
        asset.event_type = EventType::AssetTransfer;
        fanout.enqueue("p1", asset);
        fanout.flush_once().await;

        let delivered = sink.delivered();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].1.len(), 1);
        assert_eq!(delivered[0].1[0].event_type, EventType::AssetTransfer);
    }

    #[tokio::test]
    async fn test_delivery_failure_isolated() {
        let fanout = UpdateFanout::new(test_config(), RecordingPush::new());
        let broken = CollectingSink::new();
        broken.failures.store(1, Ordering::SeqCst);
        let healthy = CollectingSink::new();

        fanout.subscribe("p1", broken.clone(), None).await.unwrap();
        fanout.subscribe("p1", healthy.clone(), None).await.unwrap();

        fanout.enqueue("p1", player_event("p1", 1));
        fanout.flush_once().await;

        assert!(broken.delivered().is_empty());
        assert_eq!(healthy.delivered().len(), 1);
    }

    #[tokio::test]
    async fn test_broker_bridge_routes_player_events() {
        let fanout = Arc::new(UpdateFanout::new(test_config(), RecordingPush::new()));
        let broker = EventBroker::default();
        fanout.attach_to_broker(&broker, 0);

        let sink = CollectingSink::new();
        fanout.subscribe("p1", sink.clone(), None).await.unwrap();

        broker.publish_player_update("g1", "p1", json!({"hp": 9})).await;
        // Event for another player is ignored by p1's channel.
        broker.publish_player_update("g1", "p2", json!({"hp": 1})).await;
        fanout.flush_once().await;

        let delivered = sink.delivered();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].1.len(), 1);
        assert_eq!(delivered[0].1[0].player_id.as_deref(), Some("p1"));
    }
}
