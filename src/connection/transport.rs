// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Streaming transport abstraction.
//!
//! The connection client never touches sockets directly; it drives a
//! [`StreamConnector`] that yields a write half and a read half per
//! session. Production uses the WebSocket implementation; tests inject
//! scripted transports.

use crate::error::SyncError;
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// An event observed on the read half of a session.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Text(String),
    /// The peer closed the stream. `clean` distinguishes a deliberate
    /// close from a dropped connection; only unclean closes reconnect.
    Closed {
        clean: bool,
    },
}

/// Write half of a streaming session.
#[async_trait]
pub trait StreamSink: Send {
    async fn send_text(&mut self, text: String) -> Result<(), SyncError>;
    async fn close(&mut self) -> Result<(), SyncError>;
}

/// Read half of a streaming session. `None` means the stream is
/// exhausted with no close frame observed.
#[async_trait]
pub trait StreamSource: Send {
    async fn next_event(&mut self) -> Option<StreamEvent>;
}

/// Opens sessions against a game backend endpoint.
#[async_trait]
pub trait StreamConnector: Send + Sync {
    async fn open(
        &self,
        endpoint: &str,
    ) -> Result<(Box<dyn StreamSink>, Box<dyn StreamSource>), SyncError>;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct WsSink {
    sink: SplitSink<WsStream, Message>,
}

pub struct WsSource {
    stream: SplitStream<WsStream>,
}

#[async_trait]
impl StreamSink for WsSink {
    async fn send_text(&mut self, text: String) -> Result<(), SyncError> {
        self.sink
            .send(Message::Text(text))
            .await
            .map_err(|e| SyncError::Network(format!("websocket send failed: {e}")))
    }

    async fn close(&mut self) -> Result<(), SyncError> {
        self.sink
            .close()
            .await
            .map_err(|e| SyncError::Network(format!("websocket close failed: {e}")))
    }
}

#[async_trait]
impl StreamSource for WsSource {
    async fn next_event(&mut self) -> Option<StreamEvent> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Some(StreamEvent::Text(text)),
                Some(Ok(Message::Close(frame))) => {
                    let clean = frame.map_or(false, |f| f.code == CloseCode::Normal);
                    return Some(StreamEvent::Closed { clean });
                }
                // Control and binary frames carry nothing for us.
                Some(Ok(_)) => continue,
                Some(Err(_)) => return Some(StreamEvent::Closed { clean: false }),
                None => return None,
            }
        }
    }
}

/// WebSocket connector over `tokio-tungstenite`.
#[derive(Debug, Default, Clone)]
pub struct WsConnector;

#[async_trait]
impl StreamConnector for WsConnector {
    async fn open(
        &self,
        endpoint: &str,
    ) -> Result<(Box<dyn StreamSink>, Box<dyn StreamSource>), SyncError> {
        let (ws, _response) = connect_async(endpoint)
            .await
            .map_err(|e| SyncError::Network(format!("websocket connect failed: {e}")))?;
        let (sink, stream) = ws.split();
        Ok((Box::new(WsSink { sink }), Box::new(WsSource { stream })))
    }
}
