// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cache key grammar and glob matching.
//!
//! Keys follow a fixed segment order so that pattern invalidation can
//! target whole families of entries:
//!
//! ```text
//! {prefix}:{type}:{gameId}[:{playerId}][:{assetId}][:{achievementId}][:{param=val&...}]
//! ```
//!
//! Query params are sorted by name so logically identical keys are
//! byte-identical.

use std::collections::BTreeMap;

/// Builder for keys in the cache key grammar.
#[derive(Debug, Clone)]
pub struct CacheKey {
    prefix: String,
    data_type: String,
    game_id: String,
    player_id: Option<String>,
    asset_id: Option<String>,
    achievement_id: Option<String>,
    params: BTreeMap<String, String>,
}

impl CacheKey {
    pub fn new(
        prefix: impl Into<String>,
        data_type: impl Into<String>,
        game_id: impl Into<String>,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            data_type: data_type.into(),
            game_id: game_id.into(),
            player_id: None,
            asset_id: None,
            achievement_id: None,
            params: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn player(mut self, player_id: impl Into<String>) -> Self {
        self.player_id = Some(player_id.into());
        self
    }

    #[must_use]
    pub fn asset(mut self, asset_id: impl Into<String>) -> Self {
        self.asset_id = Some(asset_id.into());
        self
    }

    #[must_use]
    pub fn achievement(mut self, achievement_id: impl Into<String>) -> Self {
        self.achievement_id = Some(achievement_id.into());
        self
    }

    #[must_use]
    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn build(&self) -> String {
        let mut key = format!("{}:{}:{}", self.prefix, self.data_type, self.game_id);
        if let Some(p) = &self.player_id {
            key.push(':');
            key.push_str(p);
        }
        if let Some(a) = &self.asset_id {
            key.push(':');
            key.push_str(a);
        }
        if let Some(a) = &self.achievement_id {
            key.push(':');
            key.push_str(a);
        }
        if !self.params.is_empty() {
            key.push(':');
            let mut first = true;
            for (name, value) in &self.params {
                if !first {
                    key.push('&');
                }
                key.push_str(name);
                key.push('=');
                key.push_str(value);
                first = false;
            }
        }
        key
    }
}

/// Match `key` against a glob `pattern` where `*` matches any run of
/// characters (including none). No other metacharacters.
#[must_use]
pub fn glob_match(pattern: &str, key: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let k: Vec<char> = key.chars().collect();

    let (mut pi, mut ki) = (0usize, 0usize);
    // Backtrack position for the most recent '*'.
    let (mut star, mut mark) = (None::<usize>, 0usize);

    while ki < k.len() {
        if pi < p.len() && (p[pi] == k[ki]) {
            pi += 1;
            ki += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some(pi);
            mark = ki;
            pi += 1;
        } else if let Some(s) = star {
            // Let the last '*' absorb one more character.
            pi = s + 1;
            mark += 1;
            ki = mark;
        } else {
            return false;
        }
    }

    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}
