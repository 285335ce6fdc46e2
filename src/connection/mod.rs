// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Streaming connection client, one per external game backend.
//!
//! Exactly one physical session exists per game at a time. The state
//! machine (Disconnected, Connecting, Connected, Reconnecting) is driven
//! by a supervisor task that owns the reconnect policy: an unclean close
//! schedules attempt N after `min(base * 2^(N-1), cap)`, a clean close or
//! an exhausted attempt budget parks the connection Disconnected. On a
//! successful reconnect the attempt counter resets and every tracked
//! player subscription is reissued.

pub mod protocol;
pub mod transport;

pub use protocol::{parse_message, ClientMessage, StreamMessage};
pub use transport::{StreamConnector, StreamEvent, StreamSink, StreamSource, WsConnector};

use crate::config::ConnectionConfig;
use crate::error::SyncError;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Reconnecting => write!(f, "reconnecting"),
        }
    }
}

/// A parsed inbound message tagged with its origin game, handed to the
/// orchestrator for batching.
#[derive(Debug, Clone)]
pub struct RawUpdate {
    pub game_id: String,
    pub message: StreamMessage,
}

#[derive(Default)]
struct Tasks {
    supervisor: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
    heartbeat: Option<JoinHandle<()>>,
}

/// Streaming client for one game backend.
pub struct GameConnection {
    game_id: String,
    endpoint: String,
    config: ConnectionConfig,
    connector: Arc<dyn StreamConnector>,
    updates_tx: mpsc::Sender<RawUpdate>,
    state_tx: watch::Sender<ConnectionState>,
    subscriptions: Mutex<HashSet<String>>,
    attempts: AtomicU32,
    sink: AsyncMutex<Option<Box<dyn StreamSink>>>,
    tasks: Mutex<Tasks>,
}

impl GameConnection {
    pub fn new(
        game_id: impl Into<String>,
        endpoint: impl Into<String>,
        config: ConnectionConfig,
        connector: Arc<dyn StreamConnector>,
        updates_tx: mpsc::Sender<RawUpdate>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            game_id: game_id.into(),
            endpoint: endpoint.into(),
            config,
            connector,
            updates_tx,
            state_tx,
            subscriptions: Mutex::new(HashSet::new()),
            attempts: AtomicU32::new(0),
            sink: AsyncMutex::new(None),
            tasks: Mutex::new(Tasks::default()),
        }
    }

    #[must_use]
    pub fn game_id(&self) -> &str {
        &self.game_id
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Watch state transitions.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    #[must_use]
    pub fn subscribed_players(&self) -> HashSet<String> {
        self.subscriptions.lock().clone()
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!(game = %self.game_id, from = %previous, to = %state, "connection state");
        }
    }

    /// Establish the streaming session, bounded by `message_timeout_ms`.
    /// Starts the heartbeat and the reconnect supervisor as side effects.
    /// A no-op when already connected.
    #[tracing::instrument(skip(self), fields(game_id = %self.game_id, endpoint = %self.endpoint))]
    pub async fn connect(self: &Arc<Self>) -> Result<(), SyncError> {
        if self.state() == ConnectionState::Connected {
            return Ok(());
        }
        self.set_state(ConnectionState::Connecting);

        let (closed_tx, closed_rx) = mpsc::channel::<bool>(4);
        match self.open_session(closed_tx.clone()).await {
            Ok(()) => {
                self.attempts.store(0, Ordering::SeqCst);
                let conn = Arc::clone(self);
                let supervisor =
                    tokio::spawn(async move { conn.supervise(closed_tx, closed_rx).await });
                if let Some(old) = self.tasks.lock().supervisor.replace(supervisor) {
                    old.abort();
                }
                self.set_state(ConnectionState::Connected);
                info!(game = %self.game_id, endpoint = %self.endpoint, "connected");
                Ok(())
            }
            Err(e) => {
                self.set_state(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    /// Tear everything down: supervisor, reader, heartbeat, and the
    /// session itself. Cancellation is unconditional on every exit path.
    pub async fn disconnect(&self) {
        {
            let mut tasks = self.tasks.lock();
            for task in [tasks.supervisor.take(), tasks.reader.take(), tasks.heartbeat.take()]
                .into_iter()
                .flatten()
            {
                task.abort();
            }
        }
        if let Some(mut sink) = self.sink.lock().await.take() {
            let _ = sink.close().await;
        }
        self.attempts.store(0, Ordering::SeqCst);
        self.set_state(ConnectionState::Disconnected);
        info!(game = %self.game_id, "disconnected");
    }

    /// Track a player and tell the backend to stream their updates.
    /// Idempotent; requires an active connection.
    pub async fn subscribe_to_player(&self, player_id: &str) -> Result<(), SyncError> {
        if self.state() != ConnectionState::Connected {
            return Err(SyncError::NotConnected(self.game_id.clone()));
        }
        if !self.subscriptions.lock().insert(player_id.to_string()) {
            return Ok(());
        }
        self.send_message(&ClientMessage::SubscribePlayer { player_id: player_id.to_string() })
            .await
    }

    /// Stop tracking a player. Idempotent; requires an active connection.
    pub async fn unsubscribe_from_player(&self, player_id: &str) -> Result<(), SyncError> {
        if self.state() != ConnectionState::Connected {
            return Err(SyncError::NotConnected(self.game_id.clone()));
        }
        if !self.subscriptions.lock().remove(player_id) {
            return Ok(());
        }
        self.send_message(&ClientMessage::UnsubscribePlayer { player_id: player_id.to_string() })
            .await
    }

    async fn send_message(&self, message: &ClientMessage) -> Result<(), SyncError> {
        let text = serde_json::to_string(message)
            .map_err(|e| SyncError::DataIntegrity(format!("unserializable message: {e}")))?;
        let mut guard = self.sink.lock().await;
        let sink = guard.as_mut().ok_or_else(|| SyncError::NotConnected(self.game_id.clone()))?;
        timeout(Duration::from_millis(self.config.message_timeout_ms), sink.send_text(text))
            .await
            .map_err(|_| SyncError::Network(format!("send to '{}' timed out", self.game_id)))?
    }

    /// Open the transport and (re)start the reader and heartbeat tasks.
    async fn open_session(self: &Arc<Self>, closed_tx: mpsc::Sender<bool>) -> Result<(), SyncError> {
        let deadline = Duration::from_millis(self.config.message_timeout_ms);
        let (sink, source) = timeout(deadline, self.connector.open(&self.endpoint))
            .await
            .map_err(|_| SyncError::Network(format!("connect to '{}' timed out", self.endpoint)))??;
        *self.sink.lock().await = Some(sink);

        let reader = {
            let conn = Arc::clone(self);
            tokio::spawn(async move { conn.read_loop(source, closed_tx).await })
        };
        let heartbeat = {
            let conn = Arc::clone(self);
            tokio::spawn(async move { conn.heartbeat_loop().await })
        };

        let mut tasks = self.tasks.lock();
        if let Some(old) = tasks.reader.replace(reader) {
            old.abort();
        }
        if let Some(old) = tasks.heartbeat.replace(heartbeat) {
            old.abort();
        }
        Ok(())
    }

    async fn read_loop(self: Arc<Self>, mut source: Box<dyn StreamSource>, closed_tx: mpsc::Sender<bool>) {
        loop {
            match source.next_event().await {
                Some(StreamEvent::Text(text)) => {
                    let Some(message) = parse_message(&self.game_id, &text) else {
                        continue;
                    };
                    match &message {
                        StreamMessage::Heartbeat { .. } => {
                            debug!(game = %self.game_id, "heartbeat from backend");
                        }
                        StreamMessage::Error { message, code } => {
                            warn!(
                                game = %self.game_id,
                                message = message.as_deref().unwrap_or("unspecified"),
                                code = code.unwrap_or(0),
                                "error frame from backend"
                            );
                        }
                        _ => {
                            let update =
                                RawUpdate { game_id: self.game_id.clone(), message };
                            if self.updates_tx.send(update).await.is_err() {
                                // Orchestrator gone; nothing left to feed.
                                return;
                            }
                        }
                    }
                }
                Some(StreamEvent::Closed { clean }) => {
                    let _ = closed_tx.send(clean).await;
                    return;
                }
                None => {
                    let _ = closed_tx.send(false).await;
                    return;
                }
            }
        }
    }

    async fn heartbeat_loop(self: Arc<Self>) {
        let mut tick =
            tokio::time::interval(Duration::from_millis(self.config.heartbeat_interval_ms));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tick.tick().await;
        loop {
            tick.tick().await;
            let message = ClientMessage::Heartbeat { timestamp: crate::epoch_millis() };
            if let Err(e) = self.send_message(&message).await {
                warn!(game = %self.game_id, error = %e, "heartbeat send failed");
            }
        }
    }

    /// Reconnect policy loop. Lives from first connect to final
    /// disconnect; each unclean close runs one backoff sequence.
    async fn supervise(
        self: Arc<Self>,
        closed_tx: mpsc::Sender<bool>,
        mut closed_rx: mpsc::Receiver<bool>,
    ) {
        while let Some(clean) = closed_rx.recv().await {
            self.abort_session_tasks().await;
            if clean {
                info!(game = %self.game_id, "stream closed cleanly");
                self.set_state(ConnectionState::Disconnected);
                return;
            }

            warn!(game = %self.game_id, "stream closed unexpectedly");
            self.set_state(ConnectionState::Reconnecting);
            if !self.reconnect(&closed_tx).await {
                self.set_state(ConnectionState::Disconnected);
                return;
            }
        }
    }

    async fn abort_session_tasks(&self) {
        {
            let mut tasks = self.tasks.lock();
            if let Some(h) = tasks.heartbeat.take() {
                h.abort();
            }
        }
        self.sink.lock().await.take();
    }

    /// Backoff sequence; true once reconnected, false when the attempt
    /// budget is exhausted.
    async fn reconnect(self: &Arc<Self>, closed_tx: &mpsc::Sender<bool>) -> bool {
        loop {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt > self.config.max_reconnect_attempts {
                warn!(game = %self.game_id, "reconnect attempts exhausted");
                return false;
            }

            let delay = self.backoff_delay(attempt);
            debug!(
                game = %self.game_id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "reconnect scheduled"
            );
            crate::metrics::record_reconnect(&self.game_id);
            tokio::time::sleep(delay).await;

            match self.open_session(closed_tx.clone()).await {
                Ok(()) => {
                    self.attempts.store(0, Ordering::SeqCst);
                    self.reissue_subscriptions().await;
                    self.set_state(ConnectionState::Connected);
                    info!(game = %self.game_id, attempt, "reconnected");
                    return true;
                }
                Err(e) => {
                    warn!(game = %self.game_id, attempt, error = %e, "reconnect attempt failed");
                }
            }
        }
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = 2u64.saturating_pow(attempt.saturating_sub(1));
        let ms = self
            .config
            .reconnect_delay_ms
            .saturating_mul(exp)
            .min(self.config.reconnect_delay_cap_ms);
        Duration::from_millis(ms)
    }

    async fn reissue_subscriptions(&self) {
        let players = self.subscribed_players();
        for player_id in players {
            let message = ClientMessage::SubscribePlayer { player_id: player_id.clone() };
            if let Err(e) = self.send_message(&message).await {
                warn!(game = %self.game_id, player = %player_id, error = %e, "resubscribe failed");
            }
        }
    }
}
