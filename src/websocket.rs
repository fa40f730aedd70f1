//! # WebSocket Voice Endpoint
//!
//! Clients connect to `/ws`; each connection becomes one voice session.
//!
//! ## WebSocket Protocol:
//! - **Client → Server (binary)**: PCM audio, 16-bit little-endian, 16kHz, mono
//! - **Client → Server (text)**: JSON control messages (`{"type":"end_session"}`)
//! - **Server → Client (binary)**: one WAV file per model turn (24kHz, mono, 16-bit)
//! - **Server → Client (text)**: `status`, `transcript`, `turn_complete` and `error` messages
//!
//! ## Split socket:
//! `actix_ws::handle` gives back a read half (`MessageStream`) and a write
//! handle (`actix_ws::Session`). Three tasks share the connection:
//! - `read_client` pulls frames off the socket and hands data frames to the
//!   session through a capacity-1 channel. While that channel is full it stops
//!   reading, so a slow upstream pushes back all the way to the client's TCP window.
//! - `heartbeat` pings the client and hangs up on clients that went silent.
//! - The voice session itself, writing through `BridgeSink`.
//!
//! Writes never wait on reads, so transcripts and turn audio keep flowing to
//! the client while its own audio is being held back.

use crate::error::{AppError, AppResult};
use crate::session::{
    CancelSignal, ClientConnection, ClientFrame, ClientSink, ClientSource, SessionError,
    SessionSettings, VoiceSession,
};
use crate::state::AppState;
use actix_web::{rt, web, HttpRequest, HttpResponse};
use actix_ws::{CloseCode, Message, MessageStream};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// How often the server pings the client
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// How long a client may stay silent (no pong, no data) before being dropped
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// When the client was last heard from.
///
/// Time spent with reads held back by a full session queue doesn't count as
/// silence: the server isn't listening then.
struct Liveness {
    last_seen: Mutex<Instant>,
    held_back: AtomicBool,
}

impl Liveness {
    fn new() -> Self {
        Self {
            last_seen: Mutex::new(Instant::now()),
            held_back: AtomicBool::new(false),
        }
    }

    fn touch(&self) {
        *self.last_seen.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    fn hold(&self) {
        self.held_back.store(true, Ordering::SeqCst);
    }

    fn release(&self) {
        self.held_back.store(false, Ordering::SeqCst);
        self.touch();
    }

    fn expired(&self, timeout: Duration) -> bool {
        if self.held_back.load(Ordering::SeqCst) {
            return false;
        }
        self.last_seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
            > timeout
    }
}

/// Read frames off the socket until the client leaves or the connection is hung up.
///
/// Dropping `frames` on the way out is what the session sees as a client disconnect.
async fn read_client(
    mut messages: MessageStream,
    mut socket: actix_ws::Session,
    frames: mpsc::Sender<ClientFrame>,
    liveness: Arc<Liveness>,
    hung_up: Arc<CancelSignal>,
) {
    loop {
        let message = tokio::select! {
            biased;
            _ = hung_up.cancelled() => break,
            message = messages.recv() => message,
        };
        let Some(message) = message else {
            info!("WebSocket stream ended");
            break;
        };
        liveness.touch();

        let frame = match message {
            Ok(Message::Binary(data)) => ClientFrame::Binary(data.to_vec()),
            Ok(Message::Text(text)) => ClientFrame::Text(text.to_string()),
            Ok(Message::Ping(data)) => {
                if socket.pong(&data).await.is_err() {
                    break;
                }
                continue;
            }
            Ok(Message::Pong(_)) | Ok(Message::Nop) => continue,
            Ok(Message::Close(reason)) => {
                info!("WebSocket closed by client: {:?}", reason);
                break;
            }
            Ok(Message::Continuation(_)) => {
                warn!("Received unexpected continuation frame");
                continue;
            }
            Err(err) => {
                error!("WebSocket protocol error: {}", err);
                break;
            }
        };

        // Blocks while the session isn't taking input; the socket isn't read meanwhile
        liveness.hold();
        let delivered = tokio::select! {
            biased;
            _ = hung_up.cancelled() => false,
            sent = frames.send(frame) => sent.is_ok(),
        };
        liveness.release();
        if !delivered {
            debug!("Session no longer reading client frames");
            break;
        }
    }
}

async fn heartbeat(mut socket: actix_ws::Session, liveness: Arc<Liveness>, hung_up: Arc<CancelSignal>) {
    let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
    // The first tick fires immediately
    interval.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = hung_up.cancelled() => break,
            _ = interval.tick() => {}
        }
        if liveness.expired(CLIENT_TIMEOUT) {
            warn!("WebSocket heartbeat timeout, closing connection");
            hung_up.cancel();
            break;
        }
        if socket.ping(b"").await.is_err() {
            break;
        }
    }
}

struct BridgeSource {
    frames: mpsc::Receiver<ClientFrame>,
}

#[async_trait]
impl ClientSource for BridgeSource {
    async fn recv(&mut self) -> Option<ClientFrame> {
        self.frames.recv().await
    }
}

struct BridgeSink {
    /// `None` once closed
    socket: Option<actix_ws::Session>,
}

#[async_trait]
impl ClientSink for BridgeSink {
    async fn send(&mut self, frame: ClientFrame) -> Result<(), SessionError> {
        let socket = self.socket.as_mut().ok_or(SessionError::ClientDisconnected)?;
        let sent = match frame {
            ClientFrame::Text(text) => socket.text(text).await,
            ClientFrame::Binary(data) => socket.binary(data).await,
        };
        sent.map_err(|_| SessionError::ClientDisconnected)
    }

    async fn close(&mut self) {
        if let Some(socket) = self.socket.take() {
            if socket.close(Some(CloseCode::Normal.into())).await.is_err() {
                debug!("WebSocket already closed");
            }
        }
    }
}

/// WebSocket endpoint handler.
///
/// ## HTTP to WebSocket Upgrade:
/// Reserves a session slot, then upgrades the connection. The slot is released
/// by the session when it ends, or right here if the upgrade fails.
///
/// ## Errors:
/// - 503 when `max_concurrent_sessions` sessions are already running
/// - 400 when the request isn't a valid WebSocket handshake
pub async fn voice_websocket(
    req: HttpRequest,
    body: web::Payload,
    state: web::Data<AppState>,
) -> AppResult<HttpResponse> {
    info!(
        "New WebSocket connection request from: {:?}",
        req.connection_info().peer_addr()
    );

    if !state.try_open_session() {
        warn!("Rejecting WebSocket connection: session limit reached");
        return Err(AppError::ServiceUnavailable(format!(
            "Session limit of {} reached",
            state.config.server.max_concurrent_sessions
        )));
    }

    let (response, socket, messages) = match actix_ws::handle(&req, body) {
        Ok(parts) => parts,
        Err(e) => {
            state.abandon_session();
            return Err(e.into());
        }
    };
    info!("WebSocket connection started");

    let (frames_tx, frames_rx) = mpsc::channel(1);
    let liveness = Arc::new(Liveness::new());
    let hung_up = Arc::new(CancelSignal::new());

    rt::spawn(read_client(
        messages,
        socket.clone(),
        frames_tx,
        liveness.clone(),
        hung_up.clone(),
    ));
    rt::spawn(heartbeat(socket.clone(), liveness, hung_up.clone()));

    let client = ClientConnection::new(
        BridgeSource { frames: frames_rx },
        BridgeSink {
            socket: Some(socket),
        },
    );
    let state = state.clone();
    rt::spawn(async move {
        let mut session = VoiceSession::new(SessionSettings::from_config(&state.config));
        let report = session.run(client, state.connector.as_ref()).await;
        hung_up.cancel();
        info!(
            "WebSocket session {} finished ({:?}, state {:?})",
            session.id(),
            report.end,
            session.state()
        );
        state.record_session(&report);
    });

    Ok(response)
}
