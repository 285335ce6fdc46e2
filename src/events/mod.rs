// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Priority pub/sub hub for domain events.
//!
//! Dispatch is priority-grouped: higher-priority subscribers are awaited
//! to completion before lower groups run, and within a group every
//! matching handler runs even when siblings fail. A `publish` call does
//! not return until all handlers in all groups have been awaited.
//!
//! Handler failures never propagate to the publisher; they are counted
//! and reported on a broadcast side channel.

pub mod types;

pub use types::{DeliveryFailure, DomainEvent, EventFilter, EventType};

use crate::error::SyncError;
use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::future::join_all;
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

/// Arbitrary per-event predicate, evaluated synchronously at publish time.
pub type EventPredicate = Box<dyn Fn(&DomainEvent) -> bool + Send + Sync>;

/// Subscriber callback interface.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &DomainEvent) -> Result<(), SyncError>;
}

struct Subscription {
    id: Uuid,
    filter: EventFilter,
    predicate: Option<EventPredicate>,
    priority: i32,
    active: bool,
    created_at: u64,
    handler: Arc<dyn EventHandler>,
}

/// Public view of a registered subscription.
#[derive(Debug, Clone)]
pub struct SubscriptionInfo {
    pub id: Uuid,
    pub priority: i32,
    pub active: bool,
    pub created_at: u64,
}

/// The event broker.
pub struct EventBroker {
    next_id: AtomicU64,
    history_capacity: usize,
    history: RwLock<VecDeque<DomainEvent>>,
    subscriptions: RwLock<Vec<Subscription>>,
    counts_by_type: DashMap<EventType, u64>,
    counts_by_game: DashMap<String, u64>,
    failures_tx: broadcast::Sender<DeliveryFailure>,
}

impl EventBroker {
    #[must_use]
    pub fn new(history_capacity: usize) -> Self {
        let (failures_tx, _) = broadcast::channel(256);
        Self {
            next_id: AtomicU64::new(1),
            history_capacity,
            history: RwLock::new(VecDeque::with_capacity(history_capacity)),
            subscriptions: RwLock::new(Vec::new()),
            counts_by_type: DashMap::new(),
            counts_by_game: DashMap::new(),
            failures_tx,
        }
    }

    /// Register a handler for events matching `filter`. Higher priority
    /// groups dispatch first. Returns the subscription id.
    pub fn subscribe(
        &self,
        filter: EventFilter,
        priority: i32,
        handler: Arc<dyn EventHandler>,
    ) -> Uuid {
        self.subscribe_with_predicate(filter, None, priority, handler)
    }

    pub fn subscribe_with_predicate(
        &self,
        filter: EventFilter,
        predicate: Option<EventPredicate>,
        priority: i32,
        handler: Arc<dyn EventHandler>,
    ) -> Uuid {
        let id = Uuid::new_v4();
        self.subscriptions.write().push(Subscription {
            id,
            filter,
            predicate,
            priority,
            active: true,
            created_at: crate::epoch_millis(),
            handler,
        });
        debug!(subscription = %id, priority, "subscription registered");
        id
    }

    /// Remove a subscription. Idempotent; a removed subscription is never
    /// resurrected.
    pub fn unsubscribe(&self, id: Uuid) -> bool {
        let mut subs = self.subscriptions.write();
        let before = subs.len();
        subs.retain(|s| s.id != id);
        before != subs.len()
    }

    /// Pause or resume a subscription without removing it.
    pub fn set_active(&self, id: Uuid, active: bool) -> bool {
        let mut subs = self.subscriptions.write();
        match subs.iter_mut().find(|s| s.id == id) {
            Some(sub) => {
                sub.active = active;
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    #[must_use]
    pub fn subscriptions(&self) -> Vec<SubscriptionInfo> {
        self.subscriptions
            .read()
            .iter()
            .map(|s| SubscriptionInfo {
                id: s.id,
                priority: s.priority,
                active: s.active,
                created_at: s.created_at,
            })
            .collect()
    }

    /// Receiver for subscriber delivery failures.
    #[must_use]
    pub fn failures(&self) -> broadcast::Receiver<DeliveryFailure> {
        self.failures_tx.subscribe()
    }

    /// Publish an event: assigns id and timestamp, records it in history,
    /// and dispatches to matching subscribers by priority group. Returns
    /// the assigned id after every handler has been awaited.
    pub async fn publish(&self, mut event: DomainEvent) -> u64 {
        event.id = self.next_id.fetch_add(1, Ordering::SeqCst);
        event.timestamp = crate::epoch_millis();

        {
            let mut history = self.history.write();
            if history.len() >= self.history_capacity {
                history.pop_front();
            }
            history.push_back(event.clone());
        }

        *self.counts_by_type.entry(event.event_type).or_insert(0) += 1;
        *self.counts_by_game.entry(event.game_id.clone()).or_insert(0) += 1;
        crate::metrics::record_event_published(&event.event_type.to_string());

        // Collect matches under the lock, then dispatch without it so
        // handlers can subscribe or unsubscribe reentrantly.
        let mut matches: Vec<(Uuid, i32, Arc<dyn EventHandler>)> = {
            let subs = self.subscriptions.read();
            subs.iter()
                .filter(|s| s.active && s.filter.matches(&event))
                .filter(|s| s.predicate.as_ref().map_or(true, |p| p(&event)))
                .map(|s| (s.id, s.priority, Arc::clone(&s.handler)))
                .collect()
        };
        matches.sort_by_key(|(_, priority, _)| std::cmp::Reverse(*priority));

        let mut i = 0;
        while i < matches.len() {
            let priority = matches[i].1;
            let mut group_end = i;
            while group_end < matches.len() && matches[group_end].1 == priority {
                group_end += 1;
            }

            let results = join_all(
                matches[i..group_end]
                    .iter()
                    .map(|(id, _, handler)| {
                        let id = *id;
                        let event = &event;
                        async move { (id, handler.handle(event).await) }
                    }),
            )
            .await;

            for (sub_id, result) in results {
                if let Err(err) = result {
                    warn!(
                        subscription = %sub_id,
                        event_id = event.id,
                        event_type = %event.event_type,
                        error = %err,
                        "subscriber failed, isolated"
                    );
                    crate::metrics::record_delivery_failure(&event.event_type.to_string());
                    let _ = self.failures_tx.send(DeliveryFailure {
                        subscription_id: sub_id,
                        event_id: event.id,
                        event_type: event.event_type,
                        error: err.to_string(),
                    });
                }
            }
            i = group_end;
        }

        event.id
    }

    /// Newest-first slice of retained events, optionally filtered. No
    /// side effects.
    #[must_use]
    pub fn event_history(
        &self,
        limit: Option<usize>,
        type_filter: Option<EventType>,
        game_filter: Option<&str>,
    ) -> Vec<DomainEvent> {
        let history = self.history.read();
        let iter = history
            .iter()
            .rev()
            .filter(|e| type_filter.map_or(true, |t| e.event_type == t))
            .filter(|e| game_filter.map_or(true, |g| e.game_id == g))
            .cloned();
        match limit {
            Some(n) => iter.take(n).collect(),
            None => iter.collect(),
        }
    }

    #[must_use]
    pub fn count_for_type(&self, event_type: EventType) -> u64 {
        self.counts_by_type.get(&event_type).map(|c| *c).unwrap_or(0)
    }

    #[must_use]
    pub fn count_for_game(&self, game_id: &str) -> u64 {
        self.counts_by_game.get(game_id).map(|c| *c).unwrap_or(0)
    }

    // Convenience publishers fixing source and shape per event kind.

    pub async fn publish_player_update(
        &self,
        game_id: &str,
        player_id: &str,
        payload: Value,
    ) -> u64 {
        self.publish(DomainEvent::new(
            EventType::PlayerUpdate,
            game_id,
            Some(player_id.to_string()),
            payload,
            "orchestrator",
        ))
        .await
    }

    pub async fn publish_asset_transfer(
        &self,
        game_id: &str,
        player_id: &str,
        payload: Value,
    ) -> u64 {
        self.publish(DomainEvent::new(
            EventType::AssetTransfer,
            game_id,
            Some(player_id.to_string()),
            payload,
            "orchestrator",
        ))
        .await
    }

    pub async fn publish_achievement_earned(
        &self,
        game_id: &str,
        player_id: &str,
        payload: Value,
    ) -> u64 {
        self.publish(DomainEvent::new(
            EventType::AchievementEarned,
            game_id,
            Some(player_id.to_string()),
            payload,
            "orchestrator",
        ))
        .await
    }

    pub async fn publish_sync_completed(&self, game_id: &str, updates: usize) -> u64 {
        self.publish(DomainEvent::new(
            EventType::SyncCompleted,
            game_id,
            None,
            json!({ "updates": updates }),
            "orchestrator",
        ))
        .await
    }

    pub async fn publish_sync_failed(&self, game_id: &str, error: &SyncError) -> u64 {
        self.publish(DomainEvent::new(
            EventType::SyncFailed,
            game_id,
            None,
            json!({ "error": error.to_string(), "class": error.class().to_string() }),
            "orchestrator",
        ))
        .await
    }

    pub async fn publish_validation_failed(
        &self,
        game_id: &str,
        player_id: Option<&str>,
        reason: &str,
    ) -> u64 {
        self.publish(DomainEvent::new(
            EventType::ValidationFailed,
            game_id,
            player_id.map(String::from),
            json!({ "reason": reason }),
            "validator",
        ))
        .await
    }
}

impl Default for EventBroker {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;

    struct Recorder {
        seen: Mutex<Vec<u64>>,
    }

    impl Recorder {
        fn new() -> Arc<Self> {
            Arc::new(Self { seen: Mutex::new(Vec::new()) })
        }
    }

    #[async_trait]
    impl EventHandler for Recorder {
        async fn handle(&self, event: &DomainEvent) -> Result<(), SyncError> {
            self.seen.lock().push(event.id);
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl EventHandler for Failing {
        async fn handle(&self, _event: &DomainEvent) -> Result<(), SyncError> {
            Err(SyncError::ExternalService("subscriber broke".into()))
        }
    }

    /// Records dispatch order into a shared log for priority tests.
    struct Ordered {
        tag: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl EventHandler for Ordered {
        async fn handle(&self, _event: &DomainEvent) -> Result<(), SyncError> {
            self.log.lock().push(self.tag);
            Ok(())
        }
    }

    fn player_event(game: &str, player: &str) -> DomainEvent {
        DomainEvent::new(
            EventType::PlayerUpdate,
            game,
            Some(player.to_string()),
            serde_json::json!({"hp": 10}),
            "test",
        )
    }

    #[tokio::test]
    async fn test_ids_monotonic_timestamps_nondecreasing() {
        let broker = EventBroker::default();
        let id1 = broker.publish(player_event("g1", "p1")).await;
        let id2 = broker.publish(player_event("g1", "p2")).await;
        assert!(id1 < id2);

        let history = broker.event_history(None, None, None);
        assert_eq!(history.len(), 2);
        // Newest first.
        assert!(history[0].id > history[1].id);
        assert!(history[0].timestamp >= history[1].timestamp);
    }

    #[tokio::test]
    async fn test_matching_subscriber_invoked() {
        let broker = EventBroker::default();
        let recorder = Recorder::new();
        broker.subscribe(EventFilter::for_types([EventType::PlayerUpdate]), 0, recorder.clone());

        let id = broker.publish(player_event("g1", "p1")).await;
        assert_eq!(*recorder.seen.lock(), vec![id]);
    }

    #[tokio::test]
    async fn test_nonmatching_subscriber_skipped() {
        let broker = EventBroker::default();
        let recorder = Recorder::new();
        broker.subscribe(EventFilter::for_types([EventType::AssetTransfer]), 0, recorder.clone());

        broker.publish(player_event("g1", "p1")).await;
        assert!(recorder.seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_unsubscribe_before_publish_means_zero_invocations() {
        let broker = EventBroker::default();
        let recorder = Recorder::new();
        let id = broker.subscribe(EventFilter::default(), 0, recorder.clone());

        assert!(broker.unsubscribe(id));
        assert!(!broker.unsubscribe(id));

        broker.publish(player_event("g1", "p1")).await;
        assert!(recorder.seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_inactive_subscription_skipped() {
        let broker = EventBroker::default();
        let recorder = Recorder::new();
        let id = broker.subscribe(EventFilter::default(), 0, recorder.clone());

        broker.set_active(id, false);
        broker.publish(player_event("g1", "p1")).await;
        assert!(recorder.seen.lock().is_empty());

        broker.set_active(id, true);
        broker.publish(player_event("g1", "p1")).await;
        assert_eq!(recorder.seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_priority_groups_high_to_low() {
        let broker = EventBroker::default();
        let log = Arc::new(Mutex::new(Vec::new()));

        broker.subscribe(
            EventFilter::default(),
            1,
            Arc::new(Ordered { tag: "low", log: log.clone() }),
        );
        broker.subscribe(
            EventFilter::default(),
            10,
            Arc::new(Ordered { tag: "high", log: log.clone() }),
        );
        broker.subscribe(
            EventFilter::default(),
            5,
            Arc::new(Ordered { tag: "mid", log: log.clone() }),
        );

        broker.publish(player_event("g1", "p1")).await;
        assert_eq!(*log.lock(), vec!["high", "mid", "low"]);
    }

    #[tokio::test]
    async fn test_failure_isolated_and_reported() {
        let broker = EventBroker::default();
        let mut failures = broker.failures();

        let recorder = Recorder::new();
        broker.subscribe(EventFilter::default(), 0, Arc::new(Failing));
        broker.subscribe(EventFilter::default(), 0, recorder.clone());

        let id = broker.publish(player_event("g1", "p1")).await;

        // The healthy sibling still ran.
        assert_eq!(*recorder.seen.lock(), vec![id]);

        let failure = failures.try_recv().unwrap();
        assert_eq!(failure.event_id, id);
        assert_eq!(failure.event_type, EventType::PlayerUpdate);
        assert!(failure.error.contains("subscriber broke"));
    }

    #[tokio::test]
    async fn test_predicate_filters() {
        let broker = EventBroker::default();
        let recorder = Recorder::new();
        broker.subscribe_with_predicate(
            EventFilter::default(),
            Some(Box::new(|e: &DomainEvent| e.payload["hp"].as_u64() == Some(10))),
            0,
            recorder.clone(),
        );

        broker.publish(player_event("g1", "p1")).await;
        let mut low_hp = player_event("g1", "p2");
        low_hp.payload = serde_json::json!({"hp": 1});
        broker.publish(low_hp).await;

        assert_eq!(recorder.seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_history_bounded_oldest_dropped() {
        let broker = EventBroker::new(3);
        for i in 0..5 {
            broker.publish(player_event("g1", &format!("p{i}"))).await;
        }

        let history = broker.event_history(None, None, None);
        assert_eq!(history.len(), 3);
        // Ids 3, 4, 5 survive; 1 and 2 were evicted.
        assert_eq!(history.iter().map(|e| e.id).collect::<Vec<_>>(), vec![5, 4, 3]);
    }

    #[tokio::test]
    async fn test_history_filters_and_limit() {
        let broker = EventBroker::default();
        broker.publish(player_event("g1", "p1")).await;
        broker.publish(player_event("g2", "p2")).await;
        broker.publish_sync_completed("g1", 3).await;

        let g1 = broker.event_history(None, None, Some("g1"));
        assert_eq!(g1.len(), 2);

        let syncs = broker.event_history(None, Some(EventType::SyncCompleted), None);
        assert_eq!(syncs.len(), 1);

        let limited = broker.event_history(Some(1), None, None);
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].event_type, EventType::SyncCompleted);
    }

    #[tokio::test]
    async fn test_counters_by_type_and_game() {
        let broker = EventBroker::default();
        broker.publish(player_event("g1", "p1")).await;
        broker.publish(player_event("g1", "p2")).await;
        broker.publish_sync_failed("g2", &SyncError::Network("down".into())).await;

        assert_eq!(broker.count_for_type(EventType::PlayerUpdate), 2);
        assert_eq!(broker.count_for_type(EventType::SyncFailed), 1);
        assert_eq!(broker.count_for_game("g1"), 2);
        assert_eq!(broker.count_for_game("g2"), 1);
    }

    #[tokio::test]
    async fn test_publish_awaits_all_handlers() {
        let broker = EventBroker::default();
        let done = Arc::new(AtomicUsize::new(0));

        struct Slow(Arc<AtomicUsize>);

        #[async_trait]
        impl EventHandler for Slow {
            async fn handle(&self, _event: &DomainEvent) -> Result<(), SyncError> {
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }

        broker.subscribe(EventFilter::default(), 2, Arc::new(Slow(done.clone())));
        broker.subscribe(EventFilter::default(), 1, Arc::new(Slow(done.clone())));

        broker.publish(player_event("g1", "p1")).await;
        // publish returned only after both slow handlers completed.
        assert_eq!(done.load(Ordering::SeqCst), 2);
    }
}
