//! # Session Tasks
//!
//! The five tasks a session runs once the upstream connection is active:
//!
//! ```text
//! client ──► inbound ──[bounded]──► upstream_sender ──► upstream
//! upstream ──► upstream_receiver ──[unbounded]──► outbound ──► client
//!                                   greeting ──► upstream (once)
//! ```
//!
//! ## Backpressure:
//! The bounded audio channel is the only place the client side waits on the
//! upstream side. When the service stops accepting audio, the sender blocks,
//! the channel fills, and the inbound task stops reading from the client.
//! The event channel is unbounded so reading from the service never waits on
//! the client.
//!
//! Each task returns how it stopped; the orchestrator turns that into the
//! session outcome. None of them know about cancellation: the orchestrator
//! drops them when the session is cancelled.

use super::client::{send_message, ClientFrame, ClientSink, ClientSource};
use super::error::{SessionError, Task};
use super::event::{classify, UpstreamEvent};
use super::protocol::{ClientControl, ServerMessage};
use crate::audio::{AudioChunk, PcmFormat, TurnBuffer};
use crate::upstream::{UpstreamError, UpstreamInput, UpstreamSink, UpstreamSource};
use futures_util::StreamExt;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, trace};

/// How a task stopped without failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    /// Ran to its natural end (input exhausted, greeting sent)
    Completed,
    /// The client asked to end the session
    EndRequested,
    /// Stopped because the rest of the session is stopping
    Cancelled,
}

pub type TaskResult = Result<Exit, SessionError>;

/// Upstream write half shared by the sender and the greeting.
pub type SharedUpstreamSink = Mutex<Box<dyn UpstreamSink>>;

/// Live counters for one session, updated by the pumps.
#[derive(Debug, Default)]
pub struct SessionStats {
    audio_chunks_in: AtomicU64,
    audio_bytes_in: AtomicU64,
    audio_bytes_out: AtomicU64,
    transcripts: AtomicU64,
    turns_delivered: AtomicU64,
}

/// Point-in-time copy of `SessionStats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionCounters {
    pub audio_chunks_in: u64,
    pub audio_bytes_in: u64,
    pub audio_bytes_out: u64,
    pub transcripts: u64,
    pub turns_delivered: u64,
}

impl SessionStats {
    fn record_audio_in(&self, bytes: usize) {
        self.audio_chunks_in.fetch_add(1, Ordering::Relaxed);
        self.audio_bytes_in.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    fn record_audio_out(&self, bytes: usize) {
        self.audio_bytes_out.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    fn record_transcript(&self) {
        self.transcripts.fetch_add(1, Ordering::Relaxed);
    }

    fn record_turn(&self) {
        self.turns_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SessionCounters {
        SessionCounters {
            audio_chunks_in: self.audio_chunks_in.load(Ordering::Relaxed),
            audio_bytes_in: self.audio_bytes_in.load(Ordering::Relaxed),
            audio_bytes_out: self.audio_bytes_out.load(Ordering::Relaxed),
            transcripts: self.transcripts.load(Ordering::Relaxed),
            turns_delivered: self.turns_delivered.load(Ordering::Relaxed),
        }
    }
}

/// Wait, then send the synthetic first user turn so the model speaks first.
pub async fn greeting(sink: &SharedUpstreamSink, delay: Duration, prompt: &str) -> TaskResult {
    tokio::time::sleep(delay).await;

    let input = UpstreamInput::Text {
        text: prompt.to_string(),
        end_of_turn: true,
    };
    sink.lock()
        .await
        .send(input)
        .await
        .map_err(|e| SessionError::pump(Task::Greeting, e))?;

    info!("Greeting trigger sent");
    Ok(Exit::Completed)
}

/// Client frames → bounded audio channel. Text frames are control messages.
pub async fn inbound(
    source: &mut dyn ClientSource,
    audio_tx: mpsc::Sender<AudioChunk>,
    stats: &SessionStats,
) -> TaskResult {
    loop {
        let Some(frame) = source.recv().await else {
            info!("Client disconnected");
            return Err(SessionError::ClientDisconnected);
        };

        match frame {
            ClientFrame::Binary(data) => {
                trace!("Client audio chunk: {} bytes", data.len());
                stats.record_audio_in(data.len());
                let chunk = AudioChunk::new(data, PcmFormat::CLIENT_INPUT);
                // Waits while the channel is full
                if audio_tx.send(chunk).await.is_err() {
                    return Ok(Exit::Cancelled);
                }
            }
            ClientFrame::Text(text) => match ClientControl::parse(&text) {
                Ok(ClientControl::EndSession) => {
                    info!("Client requested end of session");
                    return Ok(Exit::EndRequested);
                }
                Ok(ClientControl::Unrecognized(value)) => {
                    debug!("Ignoring unrecognized control message: {}", value);
                }
                Err(e) => debug!("{}", e),
            },
        }
    }
}

/// Bounded audio channel → upstream realtime input.
pub async fn upstream_sender(
    mut audio_rx: mpsc::Receiver<AudioChunk>,
    sink: &SharedUpstreamSink,
) -> TaskResult {
    while let Some(chunk) = audio_rx.recv().await {
        sink.lock()
            .await
            .send(UpstreamInput::Audio(chunk))
            .await
            .map_err(|e| SessionError::pump(Task::UpstreamSender, e))?;
    }
    Ok(Exit::Completed)
}

/// Upstream turns → unbounded event channel, one tagged event per response part.
pub async fn upstream_receiver(
    source: &mut dyn UpstreamSource,
    event_tx: mpsc::UnboundedSender<UpstreamEvent>,
) -> TaskResult {
    loop {
        let mut turn = source.receive();
        let mut completed = false;

        while let Some(event) = turn.next().await {
            let event = event.map_err(|e| SessionError::pump(Task::UpstreamReceiver, e))?;
            completed |= event.turn_complete;
            for tagged in classify(event) {
                if event_tx.send(tagged).is_err() {
                    return Ok(Exit::Cancelled);
                }
            }
        }

        if !completed {
            return Err(SessionError::pump(Task::UpstreamReceiver, UpstreamError::Closed));
        }
        debug!("Upstream turn finished");
    }
}

/// Event channel → client. Audio is held until its turn completes, then sent as one WAV.
pub async fn outbound(
    event_rx: &mut mpsc::UnboundedReceiver<UpstreamEvent>,
    sink: &mut dyn ClientSink,
    stats: &SessionStats,
) -> TaskResult {
    let mut buffer = TurnBuffer::new(PcmFormat::UPSTREAM_OUTPUT);

    while let Some(event) = event_rx.recv().await {
        match event {
            UpstreamEvent::Audio(data) => buffer.append(&data),
            UpstreamEvent::Text(text) => {
                stats.record_transcript();
                send_message(sink, &ServerMessage::Transcript { text }).await?;
            }
            UpstreamEvent::TurnComplete => {
                let seconds = buffer.duration_seconds();
                if let Some(wav) = buffer.flush() {
                    debug!("Sending turn audio: {} bytes ({:.2}s)", wav.len(), seconds);
                    stats.record_audio_out(wav.len());
                    sink.send(ClientFrame::Binary(wav)).await?;
                }
                send_message(sink, &ServerMessage::TurnComplete).await?;
                stats.record_turn();
            }
        }
    }
    Ok(Exit::Completed)
}
