//! # GameHub Sync
//!
//! A real-time synchronization core for multi-game player data.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Game Backends                           │
//! │  • One GameAdapter per external game                       │
//! │  • Optional streaming connection with auto-reconnect       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                   (RawUpdate ingest channel)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Sync Orchestrator                        │
//! │  • Per-game isolation: one failing game never stalls        │
//! │    another                                                  │
//! │  • Hybrid batching by count, bytes, and age                 │
//! │  • Retry + per-game circuit breaker on pulls                │
//! │  • Validation gate before anything enters the core          │
//! └─────────────────────────────────────────────────────────────┘
//!                │                            │
//!                ▼                            ▼
//! ┌──────────────────────────┐  ┌──────────────────────────────┐
//! │       Cache Layer        │  │        Event Broker          │
//! │  • TTL + trigger-driven  │  │  • Priority-group dispatch   │
//! │    invalidation          │  │  • Failure isolation         │
//! │  • Quartile eviction     │  │  • Bounded history           │
//! │  • Transparent zstd      │  └──────────────────────────────┘
//! └──────────────────────────┘                │
//!                                             ▼
//!                              ┌──────────────────────────────┐
//!                              │        Update Fan-out        │
//!                              │  • Per-player batched push   │
//!                              │  • TTL'd subscriptions       │
//!                              │  • Lazy upstream push mode   │
//!                              └──────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use gamehub_sync::{SyncConfig, SyncOrchestrator, WsConnector};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config: SyncConfig = serde_json::from_str("{}").unwrap();
//!     let orchestrator = SyncOrchestrator::with_defaults(&config, Arc::new(WsConnector));
//!
//!     // Register adapters, then pull players on demand:
//!     // orchestrator.start_game_sync(my_adapter).await?;
//!     // let report = orchestrator.sync_player("player_1").await;
//!
//!     orchestrator.shutdown().await;
//! }
//! ```
//!
//! ## Modules
//!
//! - [`sync`]: The [`SyncOrchestrator`] coordinating all components
//! - [`connection`]: Streaming clients with heartbeat and backoff reconnect
//! - [`cache`]: TTL cache with strategy-driven invalidation and eviction
//! - [`events`]: Priority pub/sub broker for domain events
//! - [`fanout`]: Per-player batched update delivery
//! - [`batching`]: Hybrid batcher for ingest flushes
//! - [`resilience`]: Circuit breakers and retry policies
//! - [`error`]: Error taxonomy shared by every component

pub mod batching;
pub mod cache;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod fanout;
pub mod metrics;
pub mod resilience;
pub mod sync;

pub use cache::{CacheKey, CacheLayer, CacheStore, MemoryStore};
pub use config::{
    BrokerConfig, CacheConfig, ConnectionConfig, FanoutConfig, SyncConfig, SyncOptions,
};
pub use connection::{
    ConnectionState, GameConnection, RawUpdate, StreamConnector, StreamMessage, WsConnector,
};
pub use error::{ErrorClass, SyncError};
pub use events::{DomainEvent, EventBroker, EventFilter, EventHandler, EventType};
pub use fanout::{PushControl, UpdateFanout, UpdateSink};
pub use resilience::{CircuitBreaker, CircuitConfig, CircuitState, RetryPolicy};
pub use sync::{
    EnvelopeValidator, GameAdapter, PlayerDataValidator, PlayerSnapshot, PlayerSyncReport,
    SyncOrchestrator, SyncStatus,
};

/// Milliseconds since the Unix epoch.
pub(crate) fn epoch_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
