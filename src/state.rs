//! # Application State Management
//!
//! This module manages state shared by every HTTP handler and every running
//! voice session: the configuration, the upstream connector, and session metrics.
//!
//! ## Key Rust Concepts:
//!
//! ### Arc (Atomically Reference Counted)
//! - **Purpose**: Allows many handlers and sessions to share ownership of the same data
//! - **Why needed**: actix-web runs one App per worker thread, each with its own clone of the state
//!
//! ### RwLock (Reader-Writer Lock)
//! - **Purpose**: Many readers OR one writer at a time
//! - **Why needed**: Health checks read metrics while sessions open and close
//!
//! ### Trait objects (Arc<dyn UpstreamConnector>)
//! - **Purpose**: The WebSocket handler doesn't care which speech service it talks to
//! - **Why needed**: Production uses Gemini Live, tests can plug in anything else
//!
//! ## Lock poisoning:
//! A panic while holding the metrics lock can't leave the counters in a state worth
//! refusing to read, so poisoned locks are recovered with `PoisonError::into_inner`.

use crate::config::AppConfig;
use crate::session::{SessionEnd, SessionReport};
use crate::upstream::UpstreamConnector;
use serde::Serialize;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

/// The main application state that's shared across all HTTP request handlers.
///
/// ## Fields:
/// - `config`: immutable after startup, so a plain `Arc` is enough
/// - `connector`: opens one upstream session per client session
/// - `metrics`: session counters, updated as sessions open and close
/// - `start_time`: when the server started (for uptime)
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub connector: Arc<dyn UpstreamConnector>,
    pub metrics: Arc<RwLock<SessionMetrics>>,
    pub start_time: Instant,
}

/// Session metrics collected since server start.
///
/// ## Why these metrics matter:
/// - **active**: current concurrent sessions (checked against the configured limit)
/// - **failed / connect_failures**: upstream health at a glance
/// - **turns_delivered**: how much the service is actually being used
/// - **audio_bytes_in / audio_bytes_out**: traffic in each direction
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct SessionMetrics {
    /// Sessions currently running
    pub active: u32,

    /// Sessions started since server start
    pub total: u64,

    /// Sessions ended by a pump failure
    pub failed: u64,

    /// Sessions that never got an upstream connection
    pub connect_failures: u64,

    /// Sessions the client ended with `end_session`
    pub ended_by_client: u64,

    /// Model turns delivered to clients
    pub turns_delivered: u64,

    /// Client audio forwarded upstream (raw PCM bytes)
    pub audio_bytes_in: u64,

    /// Audio delivered to clients (WAV bytes)
    pub audio_bytes_out: u64,
}

impl AppState {
    /// Create a new AppState with the given configuration and upstream connector.
    pub fn new(config: AppConfig, connector: Arc<dyn UpstreamConnector>) -> Self {
        Self {
            config: Arc::new(config),
            connector,
            metrics: Arc::new(RwLock::new(SessionMetrics::default())),
            start_time: Instant::now(),
        }
    }

    /// Reserve a session slot.
    ///
    /// ## Returns:
    /// - `true` if the session may start (the active count now includes it)
    /// - `false` if `max_concurrent_sessions` sessions are already running
    ///
    /// The check and the increment happen under one write lock, so two upgrades
    /// racing for the last slot can't both win.
    pub fn try_open_session(&self) -> bool {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        if metrics.active as usize >= self.config.server.max_concurrent_sessions {
            return false;
        }
        metrics.active += 1;
        metrics.total += 1;
        true
    }

    /// Give back a slot reserved by `try_open_session` for a session that never ran.
    pub fn abandon_session(&self) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        metrics.active = metrics.active.saturating_sub(1);
        metrics.total = metrics.total.saturating_sub(1);
    }

    /// Fold a finished session into the metrics and release its slot.
    pub fn record_session(&self, report: &SessionReport) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        metrics.active = metrics.active.saturating_sub(1);

        match report.end {
            SessionEnd::Failed => metrics.failed += 1,
            SessionEnd::ConnectFailed => metrics.connect_failures += 1,
            SessionEnd::EndRequested => metrics.ended_by_client += 1,
            SessionEnd::ClientDisconnected => {}
        }

        metrics.turns_delivered += report.counters.turns_delivered;
        metrics.audio_bytes_in += report.counters.audio_bytes_in;
        metrics.audio_bytes_out += report.counters.audio_bytes_out;
    }

    /// Get a snapshot of current metrics (cloned so the lock isn't held while serializing).
    pub fn get_metrics_snapshot(&self) -> SessionMetrics {
        self.metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Get server uptime in seconds.
    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
