//! JSON messages exchanged with the client over the WebSocket text channel.

use super::error::SessionError;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusState {
    Ready,
}

/// Text messages the bridge sends to the client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Status { state: StatusState, message: String },
    Transcript { text: String },
    TurnComplete,
    Error { message: String },
}

impl ServerMessage {
    pub fn ready(persona: &str) -> Self {
        ServerMessage::Status {
            state: StatusState::Ready,
            message: format!("Connected to {}", persona),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }
}

/// Control requests the client can send.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientControl {
    /// `{"type":"end_session"}`
    EndSession,
    /// Well-formed JSON the bridge doesn't act on
    Unrecognized(Value),
}

impl ClientControl {
    pub fn parse(text: &str) -> Result<Self, SessionError> {
        let value: Value = serde_json::from_str(text)?;
        if value.get("type").and_then(Value::as_str) == Some("end_session") {
            Ok(ClientControl::EndSession)
        } else {
            Ok(ClientControl::Unrecognized(value))
        }
    }
}
