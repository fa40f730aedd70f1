//! In-memory client and upstream used by the session tests.

use super::client::{ClientConnection, ClientFrame, ClientSink, ClientSource};
use super::error::SessionError;
use crate::upstream::{
    ConnectOptions, ResponseEvent, UpstreamConnection, UpstreamConnector, UpstreamError,
    UpstreamInput, UpstreamSink, UpstreamSource,
};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};

const WAIT: Duration = Duration::from_secs(2);

struct FakeClientSource {
    frames: mpsc::UnboundedReceiver<ClientFrame>,
    reads: Arc<AtomicUsize>,
}

#[async_trait]
impl ClientSource for FakeClientSource {
    async fn recv(&mut self) -> Option<ClientFrame> {
        let frame = self.frames.recv().await?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        Some(frame)
    }
}

struct FakeClientSink {
    out: mpsc::UnboundedSender<ClientFrame>,
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl ClientSink for FakeClientSink {
    async fn send(&mut self, frame: ClientFrame) -> Result<(), SessionError> {
        self.out.send(frame).map_err(|_| SessionError::ClientDisconnected)
    }

    async fn close(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Test side of a fake client connection.
pub struct FakeClient {
    frames: Option<mpsc::UnboundedSender<ClientFrame>>,
    out: mpsc::UnboundedReceiver<ClientFrame>,
    pub reads: Arc<AtomicUsize>,
    pub closes: Arc<AtomicUsize>,
}

pub fn fake_client() -> (ClientConnection, FakeClient) {
    let (frames_tx, frames_rx) = mpsc::unbounded_channel();
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let reads = Arc::new(AtomicUsize::new(0));
    let closes = Arc::new(AtomicUsize::new(0));

    let connection = ClientConnection::new(
        FakeClientSource {
            frames: frames_rx,
            reads: reads.clone(),
        },
        FakeClientSink {
            out: out_tx,
            closes: closes.clone(),
        },
    );
    let client = FakeClient {
        frames: Some(frames_tx),
        out: out_rx,
        reads,
        closes,
    };
    (connection, client)
}

impl FakeClient {
    pub fn send_audio(&self, data: Vec<u8>) {
        self.send(ClientFrame::Binary(data));
    }

    pub fn send_text(&self, text: &str) {
        self.send(ClientFrame::Text(text.to_string()));
    }

    fn send(&self, frame: ClientFrame) {
        if let Some(frames) = &self.frames {
            frames.send(frame).unwrap();
        }
    }

    pub fn end_session(&self) {
        self.send_text(r#"{"type":"end_session"}"#);
    }

    pub fn disconnect(&mut self) {
        self.frames = None;
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub async fn next_frame(&mut self) -> ClientFrame {
        tokio::time::timeout(WAIT, self.out.recv())
            .await
            .expect("timed out waiting for a client frame")
            .expect("session dropped the client sink")
    }

    pub async fn next_json(&mut self) -> Value {
        match self.next_frame().await {
            ClientFrame::Text(text) => serde_json::from_str(&text).unwrap(),
            ClientFrame::Binary(data) => panic!("expected text, got {} binary bytes", data.len()),
        }
    }

    pub async fn next_binary(&mut self) -> Vec<u8> {
        match self.next_frame().await {
            ClientFrame::Binary(data) => data,
            ClientFrame::Text(text) => panic!("expected binary, got {}", text),
        }
    }

    /// Everything sent so far, without waiting.
    pub fn drain(&mut self) -> Vec<ClientFrame> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.out.try_recv() {
            frames.push(frame);
        }
        frames
    }
}

struct FakeUpstreamSink {
    sent: mpsc::UnboundedSender<UpstreamInput>,
    audio_gate: Option<Arc<Semaphore>>,
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl UpstreamSink for FakeUpstreamSink {
    async fn send(&mut self, input: UpstreamInput) -> Result<(), UpstreamError> {
        if let (UpstreamInput::Audio(_), Some(gate)) = (&input, &self.audio_gate) {
            gate.acquire().await.map_err(|_| UpstreamError::Closed)?.forget();
        }
        self.sent.send(input).map_err(|_| UpstreamError::Closed)
    }

    async fn close(&mut self) -> Result<(), UpstreamError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct FakeUpstreamSource {
    events: mpsc::UnboundedReceiver<Result<ResponseEvent, UpstreamError>>,
}

#[async_trait]
impl UpstreamSource for FakeUpstreamSource {
    async fn next_event(&mut self) -> Result<Option<ResponseEvent>, UpstreamError> {
        match self.events.recv().await {
            Some(Ok(event)) => Ok(Some(event)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectBehavior {
    Accept,
    Reject,
    Hang,
}

/// Upstream fake. Events pushed through `FakeUpstream` come out of the session's source.
pub struct FakeConnector {
    behavior: ConnectBehavior,
    halves: Mutex<Option<(FakeUpstreamSink, FakeUpstreamSource)>>,
    pub connects: Arc<AtomicUsize>,
}

#[async_trait]
impl UpstreamConnector for FakeConnector {
    async fn connect(&self, _options: &ConnectOptions) -> Result<UpstreamConnection, UpstreamError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            ConnectBehavior::Reject => {
                return Err(UpstreamError::Handshake("rejected by test".to_string()))
            }
            ConnectBehavior::Hang => std::future::pending::<()>().await,
            ConnectBehavior::Accept => {}
        }

        let (sink, source) = self
            .halves
            .lock()
            .unwrap()
            .take()
            .ok_or(UpstreamError::Handshake("already connected".to_string()))?;
        Ok(UpstreamConnection {
            sink: Box::new(sink),
            source: Box::new(source),
        })
    }
}

/// Test side of the fake upstream.
pub struct FakeUpstream {
    events: Option<mpsc::UnboundedSender<Result<ResponseEvent, UpstreamError>>>,
    sent: mpsc::UnboundedReceiver<UpstreamInput>,
    pub audio_gate: Arc<Semaphore>,
    pub closes: Arc<AtomicUsize>,
}

/// An upstream fake; with `gated`, audio sends wait for permits on `audio_gate`.
pub fn fake_upstream(behavior: ConnectBehavior, gated: bool) -> (FakeConnector, FakeUpstream) {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (sent_tx, sent_rx) = mpsc::unbounded_channel();
    let audio_gate = Arc::new(Semaphore::new(0));
    let closes = Arc::new(AtomicUsize::new(0));

    let sink = FakeUpstreamSink {
        sent: sent_tx,
        audio_gate: gated.then(|| audio_gate.clone()),
        closes: closes.clone(),
    };
    let source = FakeUpstreamSource { events: events_rx };

    let connector = FakeConnector {
        behavior,
        halves: Mutex::new(Some((sink, source))),
        connects: Arc::new(AtomicUsize::new(0)),
    };
    let upstream = FakeUpstream {
        events: Some(events_tx),
        sent: sent_rx,
        audio_gate,
        closes,
    };
    (connector, upstream)
}

impl FakeUpstream {
    pub fn respond(&self, event: ResponseEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(Ok(event));
        }
    }

    pub fn fail(&self, error: UpstreamError) {
        if let Some(events) = &self.events {
            let _ = events.send(Err(error));
        }
    }

    /// The service hangs up: the source reports end of stream.
    pub fn hang_up(&mut self) {
        self.events = None;
    }

    pub async fn next_input(&mut self) -> UpstreamInput {
        tokio::time::timeout(WAIT, self.sent.recv())
            .await
            .expect("timed out waiting for upstream input")
            .expect("session dropped the upstream sink")
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

/// Poll `condition` until it holds or two seconds pass.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
