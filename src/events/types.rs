// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Domain event kinds carried by the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    PlayerUpdate,
    AssetTransfer,
    AchievementEarned,
    SyncCompleted,
    SyncFailed,
    ValidationFailed,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PlayerUpdate => write!(f, "player_update"),
            Self::AssetTransfer => write!(f, "asset_transfer"),
            Self::AchievementEarned => write!(f, "achievement_earned"),
            Self::SyncCompleted => write!(f, "sync_completed"),
            Self::SyncFailed => write!(f, "sync_failed"),
            Self::ValidationFailed => write!(f, "validation_failed"),
        }
    }
}

/// A typed, immutable record of something that happened.
///
/// `id` and `timestamp` are assigned by the broker at publish time; `id`
/// is strictly monotonic per broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent {
    pub id: u64,
    pub event_type: EventType,
    pub game_id: String,
    pub player_id: Option<String>,
    pub payload: Value,
    pub source: String,
    pub timestamp: u64,
    pub metadata: Option<HashMap<String, String>>,
}

impl DomainEvent {
    /// Event shell with id and timestamp left for the broker to assign.
    pub fn new(
        event_type: EventType,
        game_id: impl Into<String>,
        player_id: Option<String>,
        payload: Value,
        source: impl Into<String>,
    ) -> Self {
        Self {
            id: 0,
            event_type,
            game_id: game_id.into(),
            player_id,
            payload,
            source: source.into(),
            timestamp: 0,
            metadata: None,
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: HashMap<String, String>) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Declarative subscription filter. All present clauses must match.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Event types to receive; empty means all types.
    pub event_types: HashSet<EventType>,
    pub game_ids: Option<HashSet<String>>,
    pub player_ids: Option<HashSet<String>>,
}

impl EventFilter {
    #[must_use]
    pub fn for_types(types: impl IntoIterator<Item = EventType>) -> Self {
        Self { event_types: types.into_iter().collect(), ..Self::default() }
    }

    #[must_use]
    pub fn games(mut self, games: impl IntoIterator<Item = String>) -> Self {
        self.game_ids = Some(games.into_iter().collect());
        self
    }

    #[must_use]
    pub fn players(mut self, players: impl IntoIterator<Item = String>) -> Self {
        self.player_ids = Some(players.into_iter().collect());
        self
    }

    #[must_use]
    pub fn matches(&self, event: &DomainEvent) -> bool {
        if !self.event_types.is_empty() && !self.event_types.contains(&event.event_type) {
            return false;
        }
        if let Some(games) = &self.game_ids {
            if !games.contains(&event.game_id) {
                return false;
            }
        }
        if let Some(players) = &self.player_ids {
            match &event.player_id {
                Some(p) if players.contains(p) => {}
                _ => return false,
            }
        }
        true
    }
}

/// A subscriber callback failure, reported on the broker's side channel.
#[derive(Debug, Clone)]
pub struct DeliveryFailure {
    pub subscription_id: Uuid,
    pub event_id: u64,
    pub event_type: EventType,
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(event_type: EventType, game: &str, player: Option<&str>) -> DomainEvent {
        DomainEvent::new(event_type, game, player.map(String::from), json!({}), "test")
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        let filter = EventFilter::default();
        assert!(filter.matches(&event(EventType::PlayerUpdate, "g1", None)));
        assert!(filter.matches(&event(EventType::SyncFailed, "g2", Some("p1"))));
    }

    #[test]
    fn test_type_filter() {
        let filter = EventFilter::for_types([EventType::PlayerUpdate]);
        assert!(filter.matches(&event(EventType::PlayerUpdate, "g1", None)));
        assert!(!filter.matches(&event(EventType::AssetTransfer, "g1", None)));
    }

    #[test]
    fn test_game_filter() {
        let filter = EventFilter::default().games(["g1".to_string()]);
        assert!(filter.matches(&event(EventType::PlayerUpdate, "g1", None)));
        assert!(!filter.matches(&event(EventType::PlayerUpdate, "g2", None)));
    }

    #[test]
    fn test_player_filter_requires_player() {
        let filter = EventFilter::default().players(["p1".to_string()]);
        assert!(filter.matches(&event(EventType::PlayerUpdate, "g1", Some("p1"))));
        assert!(!filter.matches(&event(EventType::PlayerUpdate, "g1", Some("p2"))));
        // Events without a player never match a player-scoped filter.
        assert!(!filter.matches(&event(EventType::PlayerUpdate, "g1", None)));
    }

    #[test]
    fn test_all_clauses_must_match() {
        let filter = EventFilter::for_types([EventType::AssetTransfer])
            .games(["g1".to_string()])
            .players(["p1".to_string()]);

        assert!(filter.matches(&event(EventType::AssetTransfer, "g1", Some("p1"))));
        assert!(!filter.matches(&event(EventType::AssetTransfer, "g2", Some("p1"))));
        assert!(!filter.matches(&event(EventType::PlayerUpdate, "g1", Some("p1"))));
    }

    #[test]
    fn test_event_type_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&EventType::AchievementEarned).unwrap(),
            "\"achievement_earned\""
        );
    }
}
