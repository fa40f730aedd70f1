//! Client side of a session, independent of the WebSocket framework carrying it.

use super::error::SessionError;
use super::protocol::ServerMessage;
use async_trait::async_trait;
use tracing::error;

/// One WebSocket data frame in either direction.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientFrame {
    Binary(Vec<u8>),
    Text(String),
}

#[async_trait]
pub trait ClientSource: Send {
    /// Next data frame, or `None` once the client has disconnected.
    async fn recv(&mut self) -> Option<ClientFrame>;
}

#[async_trait]
pub trait ClientSink: Send {
    async fn send(&mut self, frame: ClientFrame) -> Result<(), SessionError>;

    /// Close the connection. Safe to call on an already closed client.
    async fn close(&mut self);
}

pub struct ClientConnection {
    pub source: Box<dyn ClientSource>,
    pub sink: Box<dyn ClientSink>,
}

impl ClientConnection {
    pub fn new(source: impl ClientSource + 'static, sink: impl ClientSink + 'static) -> Self {
        Self {
            source: Box::new(source),
            sink: Box::new(sink),
        }
    }
}

/// Serialize and send one JSON message.
pub async fn send_message(
    sink: &mut (dyn ClientSink + '_),
    message: &ServerMessage,
) -> Result<(), SessionError> {
    match serde_json::to_string(message) {
        Ok(json) => sink.send(ClientFrame::Text(json)).await,
        Err(e) => {
            // Only reachable with a broken Serialize impl; the session carries on
            error!("Failed to serialize client message: {}", e);
            Ok(())
        }
    }
}
