// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Trigger-driven cache invalidation strategies.
//!
//! A strategy maps a set of trigger names to a key-pattern template with
//! `{placeholder}` tokens. When a trigger fires, tokens are substituted
//! from the trigger context and the resolved glob is invalidated.

use serde::Deserialize;
use std::collections::HashMap;

/// A static invalidation rule, read-only at runtime.
#[derive(Debug, Clone, Deserialize)]
pub struct InvalidationStrategy {
    pub name: String,
    /// Key-pattern template, e.g. `{prefix}:player:{gameId}:{playerId}*`
    pub pattern: String,
    pub triggers: Vec<String>,
    /// When set, matching entries get this TTL re-based from now instead
    /// of being deleted when the strategy fires.
    #[serde(default)]
    pub ttl_override: Option<u64>,
}

impl InvalidationStrategy {
    #[must_use]
    pub fn handles(&self, trigger: &str) -> bool {
        self.triggers.iter().any(|t| t == trigger)
    }
}

/// Substitute `{token}` placeholders in `template` from `context`.
///
/// Single left-to-right pass: substituted values are emitted verbatim and
/// never re-scanned, so a context value that happens to contain `{...}`
/// cannot trigger a second substitution. Unresolved tokens become `*`.
#[must_use]
pub fn resolve_pattern(template: &str, context: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                let token = &after[..close];
                match context.get(token) {
                    Some(value) => out.push_str(value),
                    None => out.push('*'),
                }
                rest = &after[close + 1..];
            }
            None => {
                // Unterminated brace, emit literally.
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Built-in strategies covering the common domain relationships.
#[must_use]
pub fn default_strategies() -> Vec<InvalidationStrategy> {
    vec![
        InvalidationStrategy {
            name: "player_data".into(),
            pattern: "{prefix}:player:{gameId}:{playerId}*".into(),
            triggers: vec!["player_update".into(), "player_login".into(), "player_logout".into()],
            ttl_override: None,
        },
        InvalidationStrategy {
            name: "player_assets".into(),
            pattern: "{prefix}:asset:{gameId}:{playerId}*".into(),
            triggers: vec!["asset_change".into(), "asset_transfer".into(), "player_update".into()],
            ttl_override: None,
        },
        InvalidationStrategy {
            name: "player_achievements".into(),
            pattern: "{prefix}:achievement:{gameId}:{playerId}*".into(),
            triggers: vec!["achievement_earned".into()],
            ttl_override: None,
        },
        InvalidationStrategy {
            name: "game_wide".into(),
            pattern: "{prefix}:*:{gameId}*".into(),
            triggers: vec!["game_maintenance".into(), "game_reset".into()],
            ttl_override: None,
        },
    ]
}
