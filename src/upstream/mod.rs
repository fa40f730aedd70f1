//! # Upstream Speech Service
//!
//! The session talks to the conversational speech service only through the
//! traits in this module. The production implementation lives in `gemini`;
//! tests drive sessions with an in-memory fake.
//!
//! ## Shape of a connection:
//! - **UpstreamConnector**: opens one bidirectional session with a system instruction and a voice
//! - **UpstreamSink**: the write half (realtime audio and text turns)
//! - **UpstreamSource**: the read half, yielding `ResponseEvent`s one at a time
//!
//! The two halves are split so the sender and receiver tasks can each own one
//! without locking against each other.

pub mod gemini;

use crate::audio::AudioChunk;
use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use std::time::Duration;
use thiserror::Error;

pub use gemini::GeminiLiveConnector;

/// Parameters fixed for the lifetime of one upstream session.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Prebuilt voice name the service should speak with
    pub voice: String,

    /// Persona prompt for the model
    pub system_instruction: String,
}

/// Something the bridge sends to the service.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamInput {
    /// Realtime microphone audio
    Audio(AudioChunk),

    /// A text user turn; `end_of_turn` asks the model to respond now
    Text { text: String, end_of_turn: bool },
}

/// One response unit from the service. Any combination of fields may be set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResponseEvent {
    pub audio: Option<Vec<u8>>,
    pub text: Option<String>,
    pub turn_complete: bool,
}

impl ResponseEvent {
    pub fn audio(data: impl Into<Vec<u8>>) -> Self {
        Self {
            audio: Some(data.into()),
            ..Self::default()
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn turn_complete() -> Self {
        Self {
            turn_complete: true,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.audio.is_none() && self.text.is_none() && !self.turn_complete
    }
}

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("invalid JSON from upstream: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid base64 audio payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("setup handshake failed: {0}")]
    Handshake(String),

    #[error("upstream connection closed")]
    Closed,

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// Write half of an upstream session.
#[async_trait]
pub trait UpstreamSink: Send {
    async fn send(&mut self, input: UpstreamInput) -> Result<(), UpstreamError>;

    /// Close the session. Called at most once per session.
    async fn close(&mut self) -> Result<(), UpstreamError>;
}

/// Read half of an upstream session.
#[async_trait]
pub trait UpstreamSource: Send {
    /// Next event from the service. `Ok(None)` means the service closed the stream.
    async fn next_event(&mut self) -> Result<Option<ResponseEvent>, UpstreamError>;

    /// Events of the current turn, ending after the event that carries `turn_complete`.
    ///
    /// A stream that ends without a `turn_complete` event means the service went
    /// away mid-turn (or between turns).
    fn receive(&mut self) -> BoxStream<'_, Result<ResponseEvent, UpstreamError>> {
        turn_stream(self)
    }
}

fn turn_stream<S>(source: &mut S) -> BoxStream<'_, Result<ResponseEvent, UpstreamError>>
where
    S: UpstreamSource + ?Sized,
{
    stream::unfold(Some(source), |source| async move {
        let source = source?;
        match source.next_event().await {
            Ok(Some(event)) => {
                let done = event.turn_complete;
                Some((Ok(event), if done { None } else { Some(source) }))
            }
            Ok(None) => None,
            Err(e) => Some((Err(e), None)),
        }
    })
    .boxed()
}

/// Both halves of an open upstream session.
pub struct UpstreamConnection {
    pub sink: Box<dyn UpstreamSink>,
    pub source: Box<dyn UpstreamSource>,
}

/// Opens upstream sessions. One connector is shared by every client session.
#[async_trait]
pub trait UpstreamConnector: Send + Sync {
    async fn connect(&self, options: &ConnectOptions) -> Result<UpstreamConnection, UpstreamError>;
}
