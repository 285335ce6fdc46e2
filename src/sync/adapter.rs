// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use crate::error::SyncError;
use async_trait::async_trait;
use serde_json::Value;

/// Per-game integration boundary.
///
/// Adapters wrap one external game backend. Their output is untrusted
/// and must pass validation before entering the core.
#[async_trait]
pub trait GameAdapter: Send + Sync {
    /// Stable identifier for this game.
    fn game_id(&self) -> &str;

    /// Pull the current raw state for one player.
    async fn fetch_raw_player_data(&self, player_id: &str) -> Result<Value, SyncError>;

    async fn connect_to_game_network(&self) -> Result<(), SyncError>;

    async fn disconnect_from_game_network(&self) -> Result<(), SyncError>;

    async fn health_check(&self) -> Result<(), SyncError>;

    /// Streaming endpoint for push updates, when the game supports one.
    fn stream_endpoint(&self) -> Option<String> {
        None
    }
}
