// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Boundary validation for raw adapter payloads.
//!
//! Invalid data never enters the cache or the event broker; it becomes a
//! `DataIntegrity` error at this seam.

use crate::error::SyncError;
use serde_json::Value;

/// Pluggable validation for raw player data.
pub trait PlayerDataValidator: Send + Sync {
    fn validate(&self, game_id: &str, player_id: &str, data: &Value) -> Result<(), SyncError>;
}

/// Default validator: payloads must be non-empty JSON objects, and a
/// `playerId` field, when present, must agree with the player being
/// synced.
#[derive(Debug, Default, Clone)]
pub struct EnvelopeValidator;

impl PlayerDataValidator for EnvelopeValidator {
    fn validate(&self, game_id: &str, player_id: &str, data: &Value) -> Result<(), SyncError> {
        let obj = data.as_object().ok_or_else(|| {
            SyncError::DataIntegrity(format!(
                "player data from '{game_id}' is not a JSON object"
            ))
        })?;

        if obj.is_empty() {
            return Err(SyncError::DataIntegrity(format!(
                "player data from '{game_id}' is empty"
            )));
        }

        if let Some(claimed) = obj.get("playerId").and_then(Value::as_str) {
            if claimed != player_id {
                return Err(SyncError::DataIntegrity(format!(
                    "player data from '{game_id}' claims player '{claimed}', expected '{player_id}'"
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_accepts_plain_object() {
        let v = EnvelopeValidator;
        assert!(v.validate("g1", "p1", &json!({"level": 3})).is_ok());
    }

    #[test]
    fn test_accepts_matching_player_id() {
        let v = EnvelopeValidator;
        assert!(v.validate("g1", "p1", &json!({"playerId": "p1", "level": 3})).is_ok());
    }

    #[test]
    fn test_rejects_non_object() {
        let v = EnvelopeValidator;
        assert!(matches!(
            v.validate("g1", "p1", &json!([1, 2, 3])),
            Err(SyncError::DataIntegrity(_))
        ));
        assert!(v.validate("g1", "p1", &json!("just a string")).is_err());
        assert!(v.validate("g1", "p1", &json!(null)).is_err());
    }

    #[test]
    fn test_rejects_empty_object() {
        let v = EnvelopeValidator;
        assert!(v.validate("g1", "p1", &json!({})).is_err());
    }

    #[test]
    fn test_rejects_mismatched_player_id() {
        let v = EnvelopeValidator;
        let err = v.validate("g1", "p1", &json!({"playerId": "p2"})).unwrap_err();
        assert!(matches!(err, SyncError::DataIntegrity(_)));
        assert!(err.to_string().contains("p2"));
    }
}
