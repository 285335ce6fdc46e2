// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Wire envelopes for the game streaming protocol.
//!
//! Inbound messages are tagged JSON objects. Malformed payloads are
//! dropped at the boundary with a log line and a metric; they never
//! propagate inward as errors.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// Inbound streaming message from a game backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StreamMessage {
    #[serde(rename = "PLAYER_UPDATE", rename_all = "camelCase")]
    PlayerUpdate {
        player_id: String,
        data: Value,
        #[serde(default)]
        timestamp: Option<u64>,
    },

    #[serde(rename = "ASSET_CHANGE", rename_all = "camelCase")]
    AssetChange {
        player_id: String,
        data: Value,
        #[serde(default)]
        timestamp: Option<u64>,
    },

    #[serde(rename = "ACHIEVEMENT_EARNED", rename_all = "camelCase")]
    AchievementEarned {
        player_id: String,
        data: Value,
        #[serde(default)]
        timestamp: Option<u64>,
    },

    #[serde(rename = "HEARTBEAT", rename_all = "camelCase")]
    Heartbeat {
        #[serde(default)]
        timestamp: Option<u64>,
    },

    #[serde(rename = "ERROR", rename_all = "camelCase")]
    Error {
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        code: Option<u16>,
    },
}

impl StreamMessage {
    /// The player this message concerns, when it carries one.
    #[must_use]
    pub fn player_id(&self) -> Option<&str> {
        match self {
            Self::PlayerUpdate { player_id, .. }
            | Self::AssetChange { player_id, .. }
            | Self::AchievementEarned { player_id, .. } => Some(player_id),
            Self::Heartbeat { .. } | Self::Error { .. } => None,
        }
    }
}

/// Parse an inbound frame; malformed input is logged and discarded.
#[must_use]
pub fn parse_message(game_id: &str, text: &str) -> Option<StreamMessage> {
    match serde_json::from_str(text) {
        Ok(msg) => Some(msg),
        Err(e) => {
            warn!(game = game_id, error = %e, "malformed stream message dropped");
            crate::metrics::record_malformed_message(game_id);
            None
        }
    }
}

/// Outbound message to a game backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "SUBSCRIBE_PLAYER", rename_all = "camelCase")]
    SubscribePlayer { player_id: String },

    #[serde(rename = "UNSUBSCRIBE_PLAYER", rename_all = "camelCase")]
    UnsubscribePlayer { player_id: String },

    #[serde(rename = "HEARTBEAT", rename_all = "camelCase")]
    Heartbeat { timestamp: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_player_update() {
        let msg = parse_message(
            "g1",
            r#"{"type":"PLAYER_UPDATE","playerId":"p1","data":{"level":2},"timestamp":123}"#,
        )
        .unwrap();

        match msg {
            StreamMessage::PlayerUpdate { player_id, data, timestamp } => {
                assert_eq!(player_id, "p1");
                assert_eq!(data["level"], 2);
                assert_eq!(timestamp, Some(123));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_parse_heartbeat_without_timestamp() {
        let msg = parse_message("g1", r#"{"type":"HEARTBEAT"}"#).unwrap();
        assert!(matches!(msg, StreamMessage::Heartbeat { timestamp: None }));
    }

    #[test]
    fn test_parse_error_message() {
        let msg = parse_message("g1", r#"{"type":"ERROR","message":"rate limited","code":429}"#)
            .unwrap();
        match msg {
            StreamMessage::Error { message, code } => {
                assert_eq!(message.as_deref(), Some("rate limited"));
                assert_eq!(code, Some(429));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_malformed_messages_dropped() {
        assert!(parse_message("g1", "not json").is_none());
        assert!(parse_message("g1", r#"{"type":"UNKNOWN_KIND"}"#).is_none());
        assert!(parse_message("g1", r#"{"type":"PLAYER_UPDATE"}"#).is_none());
        assert!(parse_message("g1", "{}").is_none());
    }

    #[test]
    fn test_client_message_wire_shape() {
        let text =
            serde_json::to_string(&ClientMessage::SubscribePlayer { player_id: "p1".into() })
                .unwrap();
        assert_eq!(text, r#"{"type":"SUBSCRIBE_PLAYER","playerId":"p1"}"#);
    }

    #[test]
    fn test_player_id_accessor() {
        let msg = parse_message(
            "g1",
            r#"{"type":"ASSET_CHANGE","playerId":"p9","data":{"asset":"sword"}}"#,
        )
        .unwrap();
        assert_eq!(msg.player_id(), Some("p9"));

        let hb = parse_message("g1", r#"{"type":"HEARTBEAT"}"#).unwrap();
        assert_eq!(hb.player_id(), None);
    }
}
