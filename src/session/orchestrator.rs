//! # Session Orchestrator
//!
//! Owns one client connection for its whole life and bridges it to one
//! upstream speech session.
//!
//! ## Lifecycle:
//! ```text
//! connecting ──► ready ──► active ──► closed
//!      └──────── connect failed ──────►┘
//! ```
//!
//! ## Structured concurrency:
//! The five tasks are plain futures polled together by one `tokio::join!`
//! inside `run`, each wrapped in a `select!` against a shared `CancelSignal`.
//! No task is spawned, so none can outlive the session and every borrow
//! (client halves, upstream halves, stats) is an ordinary `&`/`&mut`.
//! The first pump to stop for any reason cancels the others.

use super::cancel::CancelSignal;
use super::client::{send_message, ClientConnection, ClientSink};
use super::error::{SessionError, Task};
use super::protocol::ServerMessage;
use super::pumps::{self, Exit, SessionCounters, SessionStats, SharedUpstreamSink, TaskResult};
use crate::config::AppConfig;
use crate::upstream::{ConnectOptions, UpstreamConnector, UpstreamError, UpstreamSink};
use serde::Serialize;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Per-session behaviour, resolved from the application config.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub persona: String,
    pub system_instruction: String,
    pub voice: String,
    pub greeting_prompt: String,
    pub greeting_delay: Duration,
    pub inbound_queue_capacity: usize,
    pub connect_timeout: Duration,
}

impl SessionSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            persona: config.session.persona.clone(),
            system_instruction: config.session.system_instruction.clone(),
            voice: config.upstream.voice.clone(),
            greeting_prompt: config.session.greeting_prompt.clone(),
            greeting_delay: config.session.greeting_delay(),
            inbound_queue_capacity: config.session.inbound_queue_capacity.max(1),
            connect_timeout: config.upstream.connect_timeout(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Connecting,
    Ready,
    Active,
    Closed,
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEnd {
    /// The client sent `end_session`
    EndRequested,
    /// The client went away
    ClientDisconnected,
    /// The upstream session could not be opened
    ConnectFailed,
    /// A pump failed and took the session down
    Failed,
}

/// Everything the session learned, handed back when `run` returns.
#[derive(Debug)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub end: SessionEnd,
    pub errors: Vec<SessionError>,
    pub counters: SessionCounters,
    pub duration: Duration,
}

pub struct VoiceSession {
    id: Uuid,
    settings: SessionSettings,
    state: SessionState,
}

impl VoiceSession {
    pub fn new(settings: SessionSettings) -> Self {
        Self {
            id: Uuid::new_v4(),
            settings,
            state: SessionState::Connecting,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Bridge `client` to a fresh upstream session until either side ends it.
    ///
    /// Never fails: every outcome, including connect failure, is in the report.
    pub async fn run(
        &mut self,
        client: ClientConnection,
        connector: &dyn UpstreamConnector,
    ) -> SessionReport {
        let span = info_span!("session", session_id = %self.id);
        self.run_inner(client, connector).instrument(span).await
    }

    async fn run_inner(
        &mut self,
        client: ClientConnection,
        connector: &dyn UpstreamConnector,
    ) -> SessionReport {
        let started = Instant::now();
        let stats = SessionStats::default();
        let ClientConnection {
            source: mut client_source,
            sink: mut client_sink,
        } = client;

        if self.state != SessionState::Connecting {
            warn!("Session already ran, refusing to reuse it");
            client_sink.close().await;
            return self.report(SessionEnd::ClientDisconnected, Vec::new(), &stats, started);
        }

        // connecting
        info!("Opening upstream session (voice {})", self.settings.voice);
        let options = ConnectOptions {
            voice: self.settings.voice.clone(),
            system_instruction: self.settings.system_instruction.clone(),
        };
        let timeout = self.settings.connect_timeout;
        let connected = match tokio::time::timeout(timeout, connector.connect(&options)).await {
            Ok(result) => result,
            Err(_) => Err(UpstreamError::Timeout(timeout)),
        };
        let upstream = match connected {
            Ok(upstream) => upstream,
            Err(e) => {
                error!("Upstream connection failed: {}", e);
                let _ = send_message(client_sink.as_mut(), &ServerMessage::error(e.to_string())).await;
                self.teardown(None, client_sink.as_mut()).await;
                let errors = vec![SessionError::Connect(e)];
                return self.report(SessionEnd::ConnectFailed, errors, &stats, started);
            }
        };

        // ready
        self.state = SessionState::Ready;
        let mut upstream_source = upstream.source;
        let upstream_sink: SharedUpstreamSink = Mutex::new(upstream.sink);
        let ready = ServerMessage::ready(&self.settings.persona);
        if let Err(e) = send_message(client_sink.as_mut(), &ready).await {
            warn!("Client went away before the session started");
            let mut upstream_sink = upstream_sink.into_inner();
            self.teardown(Some(&mut upstream_sink), client_sink.as_mut()).await;
            return self.report(SessionEnd::ClientDisconnected, vec![e], &stats, started);
        }

        // active
        self.state = SessionState::Active;
        info!("Session active");
        let cancel = CancelSignal::new();
        let (audio_tx, audio_rx) = mpsc::channel(self.settings.inbound_queue_capacity);
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();

        let (greeting, inbound, sender, receiver, outbound) = tokio::join!(
            supervise(
                Task::Greeting,
                &cancel,
                pumps::greeting(
                    &upstream_sink,
                    self.settings.greeting_delay,
                    &self.settings.greeting_prompt,
                ),
            ),
            supervise(
                Task::Inbound,
                &cancel,
                pumps::inbound(client_source.as_mut(), audio_tx, &stats),
            ),
            supervise(
                Task::UpstreamSender,
                &cancel,
                pumps::upstream_sender(audio_rx, &upstream_sink),
            ),
            supervise(
                Task::UpstreamReceiver,
                &cancel,
                pumps::upstream_receiver(upstream_source.as_mut(), event_tx),
            ),
            supervise(
                Task::Outbound,
                &cancel,
                pumps::outbound(&mut event_rx, client_sink.as_mut(), &stats),
            ),
        );

        let (end, errors) = settle([greeting, inbound, sender, receiver, outbound]);
        // Client input is no longer read from here on
        drop(client_source);

        if end == SessionEnd::Failed {
            let message = errors
                .iter()
                .find(|e| e.is_pump_failure())
                .map(|e| e.to_string())
                .unwrap_or_default();
            // The client may already be gone
            let _ = send_message(client_sink.as_mut(), &ServerMessage::error(message)).await;
        }

        let mut upstream_sink = upstream_sink.into_inner();
        self.teardown(Some(&mut upstream_sink), client_sink.as_mut()).await;

        let report = self.report(end, errors, &stats, started);
        info!(
            "Session closed: {:?} after {:.1}s ({} turns delivered)",
            report.end,
            report.duration.as_secs_f64(),
            report.counters.turns_delivered
        );
        report
    }

    /// Close both sides once. Later calls do nothing.
    async fn teardown(
        &mut self,
        upstream: Option<&mut Box<dyn UpstreamSink>>,
        client: &mut dyn ClientSink,
    ) {
        if self.state == SessionState::Closed {
            return;
        }
        if let Some(upstream) = upstream {
            if let Err(e) = upstream.close().await {
                warn!("Error closing upstream session: {}", e);
            }
        }
        client.close().await;
        self.state = SessionState::Closed;
        debug!("Session resources released");
    }

    fn report(
        &self,
        end: SessionEnd,
        errors: Vec<SessionError>,
        stats: &SessionStats,
        started: Instant,
    ) -> SessionReport {
        SessionReport {
            session_id: self.id,
            end,
            errors,
            counters: stats.snapshot(),
            duration: started.elapsed(),
        }
    }
}

/// Run one task until it finishes or the session is cancelled.
///
/// Any pump stopping cancels the session. The greeting is fire-and-forget and never does.
async fn supervise<F>(task: Task, cancel: &CancelSignal, work: F) -> (Task, TaskResult)
where
    F: Future<Output = TaskResult>,
{
    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => Ok(Exit::Cancelled),
        result = work => result,
    };

    match &result {
        Ok(exit) => debug!("{} task stopped: {:?}", task, exit),
        Err(SessionError::ClientDisconnected) => debug!("{} task stopped: client gone", task),
        Err(e) => warn!("{} task failed: {}", task, e),
    }
    if task != Task::Greeting {
        cancel.cancel();
    }
    (task, result)
}

/// Fold task outcomes into the session end reason.
///
/// A pump failure outranks an end request, which outranks a disconnect.
/// A failed greeting is recorded but doesn't fail the session by itself.
fn settle(outcomes: [(Task, TaskResult); 5]) -> (SessionEnd, Vec<SessionError>) {
    let mut end_requested = false;
    let mut pump_failed = false;
    let mut errors = Vec::new();

    for (task, result) in outcomes {
        match result {
            Ok(Exit::EndRequested) => end_requested = true,
            Ok(_) => {}
            Err(e) => {
                pump_failed |= e.is_pump_failure() && task != Task::Greeting;
                errors.push(e);
            }
        }
    }

    let end = if pump_failed {
        SessionEnd::Failed
    } else if end_requested {
        SessionEnd::EndRequested
    } else {
        SessionEnd::ClientDisconnected
    };
    (end, errors)
}
