//! # Voice Bridge - Main Application Entry Point
//!
//! This is the main entry point for the voice-bridge web server.
//! It relays a child's microphone audio from a WebSocket client to a
//! conversational speech model, and plays the model's spoken replies back
//! as one WAV file per turn.
//!
//! ## Key Rust Concepts Used:
//! - **async/await**: Every session is a set of cooperating futures
//! - **modules**: Code is organized into separate modules (mod statements)
//! - **Result<T, E>**: Startup errors are reported instead of panicking
//! - **Arc & trait objects**: The upstream connector is shared by all sessions
//!
//! ## Application Architecture:
//! - **config**: Handles application configuration (TOML file + environment variables)
//! - **state**: Shared application state and session metrics
//! - **health**: Liveness and health endpoints
//! - **websocket**: The `/ws` endpoint, one voice session per connection
//! - **session**: Session lifecycle and the tasks moving audio in both directions
//! - **upstream**: The speech service client (Gemini Live)
//! - **audio**: PCM formats, per-turn buffering and the WAV encoder
//! - **error**: HTTP error responses

// Module declarations - These tell Rust about our other source files
mod audio;       // PCM formats, turn buffer, WAV encoding (audio/ directory)
mod config;      // Configuration management (config.rs)
mod error;       // HTTP error types (error.rs)
mod health;      // Health check endpoints (health.rs)
mod session;     // Voice session orchestration (session/ directory)
mod state;       // Application state management (state.rs)
mod upstream;    // Speech service client (upstream/ directory)
mod websocket;   // WebSocket endpoint (websocket.rs)

// External crate imports - These are dependencies from Cargo.toml
use actix_cors::Cors;  // Cross-Origin Resource Sharing support
use actix_web::{web, App, HttpServer};  // Web framework
use anyhow::Result;    // Better error handling with context
use crate::config::AppConfig; // Our custom configuration struct
use state::AppState;   // Our custom application state
use std::sync::Arc;
use tracing::{error, info};  // Structured logging
use tracing_actix_web::TracingLogger;  // Per-request spans
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};  // Logging setup
use upstream::GeminiLiveConnector;

/// The main application entry point.
///
/// ## What this function does:
/// 1. **Loads configuration** from `.env`, config.toml and environment variables
/// 2. **Sets up logging** (verbose when `DEBUG` is set)
/// 3. **Creates shared application state** with the Gemini Live connector
/// 4. **Configures the HTTP server** with CORS, request tracing and routes
/// 5. **Handles graceful shutdown** on SIGINT/SIGTERM
#[actix_web::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file (if it exists)
    dotenv::dotenv().ok();

    // Configuration comes first: the DEBUG flag decides the log level
    let config = AppConfig::load()?;
    init_tracing(config.debug)?;
    config.validate()?;

    info!("Starting voice-bridge v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Configuration loaded: {}:{} (model {}, voice {})",
        config.server.host, config.server.port, config.upstream.model, config.upstream.voice
    );

    let connector = Arc::new(GeminiLiveConnector::new(&config.upstream));
    let app_state = AppState::new(config.clone(), connector);
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        // Configure CORS to allow browser clients from anywhere
        let cors = Cors::default()
            .allow_any_origin()    // Allow requests from any domain
            .allow_any_method()    // Allow GET, POST, etc.
            .allow_any_header()    // Allow any HTTP headers
            .max_age(3600);        // Cache CORS settings for 1 hour

        App::new()
            // Share our application state with all request handlers
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(TracingLogger::default())
            .route("/", web::get().to(health::root))
            .route("/health", web::get().to(health::health_check))
            .route("/ws", web::get().to(websocket::voice_websocket))
    })
    .disable_signals()  // Shutdown is handled below
    .bind(&bind_addr)?
    .run();

    // Get a handle to control the server and spawn it in a separate task
    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    // Wait for either the server to finish OR a shutdown signal
    tokio::select! {
        result = server_task => {
            match result {
                Ok(server_result) => {
                    if let Err(e) = server_result {
                        error!("Server error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Server task error: {}", e);
                }
            }
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;  // Gracefully stop the server
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Initialize the tracing (logging) system for the application.
///
/// ## Environment Variables:
/// - `RUST_LOG`: Controls what gets logged (e.g., "debug", "voice_bridge=trace")
/// - If not set, defaults to "voice_bridge=info,actix_web=info" (or debug for
///   this crate when `DEBUG` is enabled)
fn init_tracing(debug: bool) -> Result<()> {
    let default_filter = if debug {
        "voice_bridge=debug,actix_web=info"
    } else {
        "voice_bridge=info,actix_web=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

/// Resolve when the process receives SIGINT (Ctrl+C) or SIGTERM.
#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            error!("Failed to install SIGTERM handler: {}", e);
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM"),
        _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Received Ctrl+C");
}
