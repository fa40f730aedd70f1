//! # Configuration Management
//!
//! This module handles loading and managing application configuration from multiple sources:
//! - Default values (built into the code)
//! - TOML configuration file (config.toml, optional)
//! - Environment variables with the APP_ prefix (APP_SERVER__PORT, APP_SESSION__GREETING_DELAY_MS, ...)
//! - The plain deployment variables the service has always been run with
//!   (GEMINI_API_KEY, VOICE_MODEL, HOST, PORT, DEBUG)
//!
//! ## Key Rust Concepts Used:
//! - **Serde**: The same structs are serialized into the loader as defaults and deserialized back out
//! - **Builder pattern**: Each source is layered on top of the previous one
//! - **Result<T, E>**: Loading and validation fail loudly at startup instead of mid-session
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Deployment variables (GEMINI_API_KEY, VOICE_MODEL, HOST, PORT, DEBUG)
//! 2. APP_-prefixed environment variables
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)

use anyhow::Result;
use config::builder::DefaultState;
use config::ConfigBuilder;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Plain environment variables and the config keys they override.
const ENV_ALIASES: &[(&str, &str)] = &[
    ("GEMINI_API_KEY", "upstream.api_key"),
    ("VOICE_MODEL", "upstream.voice"),
    ("HOST", "server.host"),
    ("PORT", "server.port"),
    ("DEBUG", "debug"),
];

const DEFAULT_SYSTEM_INSTRUCTION: &str = "\
You are Gogo Wisdom, a warm, patient grandmother and reading tutor talking to a child on a phone call.
Greet the child warmly when the call starts and ask what they would like to read today.
Listen while the child reads aloud. When they struggle with a word, gently help them sound it out.
Celebrate every small success, never criticize, and keep your replies short so the child can keep reading.
Be patient with pauses and hesitations.";

const DEFAULT_GREETING_PROMPT: &str = "The child just picked up the phone. Greet them warmly!";

/// Main application configuration that contains all settings.
///
/// ## Why separate config structs:
/// Breaking configuration into logical groups (server, upstream, session)
/// mirrors the three collaborators a voice session talks to: the HTTP
/// listener, the speech service, and the per-connection behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub session: SessionConfig,

    /// Verbose logging (debug level for this crate)
    pub debug: bool,
}

/// Server-specific configuration settings.
///
/// ## Fields:
/// - `host`: IP address to bind to ("0.0.0.0" so devices on the network can reach it)
/// - `port`: TCP port number to listen on
/// - `max_concurrent_sessions`: voice sessions allowed at once; further upgrades get a 503
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_concurrent_sessions: usize,
}

/// Upstream speech service settings.
///
/// ## Fields:
/// - `api_key`: credential appended to the streaming URL
/// - `model`: fully qualified model name sent in the setup message
/// - `voice`: prebuilt voice the service speaks with
/// - `endpoint`: WebSocket base URL of the service
/// - `api_version`: API version segment of the streaming method path
/// - `connect_timeout_ms`: upper bound on the connect + setup handshake
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub api_key: String,
    pub model: String,
    pub voice: String,
    pub endpoint: String,
    pub api_version: String,
    pub connect_timeout_ms: u64,
}

/// Per-session behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Name used in the "ready" status sent to the client
    pub persona: String,

    /// System instruction given to the upstream model when the session opens
    pub system_instruction: String,

    /// Synthetic first user turn that makes the model speak first
    pub greeting_prompt: String,

    /// Delay between the session becoming active and the greeting trigger
    pub greeting_delay_ms: u64,

    /// Capacity of the client → upstream audio queue (the backpressure point)
    pub inbound_queue_capacity: usize,
}

/// Provides default configuration values.
///
/// ## Why defaults matter:
/// Default values ensure the application can start with nothing but an API
/// key in the environment. They also document reasonable starting values.
impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),   // Reachable from devices on the LAN
                port: 8000,
                max_concurrent_sessions: 32,
            },
            upstream: UpstreamConfig {
                api_key: String::new(),         // Must come from the environment
                model: "models/gemini-2.5-flash-native-audio-preview-09-2025".to_string(),
                voice: "Aoede".to_string(),     // Warm, expressive prebuilt voice
                endpoint: "wss://generativelanguage.googleapis.com/ws".to_string(),
                api_version: "v1beta".to_string(),
                connect_timeout_ms: 15_000,
            },
            session: SessionConfig {
                persona: "Gogo Wisdom".to_string(),
                system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
                greeting_prompt: DEFAULT_GREETING_PROMPT.to_string(),
                greeting_delay_ms: 1_000,       // Let the upstream connection settle first
                inbound_queue_capacity: 5,
            },
            debug: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Configuration Loading Process:
    /// 1. Start with built-in defaults
    /// 2. Override with values from config.toml (if it exists)
    /// 3. Override with environment variables prefixed with APP_ (`__` separates nesting levels)
    /// 4. Override with the plain deployment variables listed in `ENV_ALIASES`
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__MAX_CONCURRENT_SESSIONS=8`
    /// - `APP_SESSION__GREETING_DELAY_MS=500`
    /// - `GEMINI_API_KEY=...`: Credential for the speech service
    /// - `PORT=3000`: Special case for deployment platforms
    pub fn load() -> Result<Self> {
        let builder = Self::defaults_builder()?
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );
        let builder = apply_env_aliases(builder, |name| env::var(name).ok())?;

        let config = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// A loader pre-seeded with the values from the `Default` impl.
    fn defaults_builder() -> Result<ConfigBuilder<DefaultState>> {
        Ok(config::Config::builder().add_source(config::Config::try_from(&AppConfig::default())?))
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - Server port is not 0
    /// - An API key is present (every session would fail its upstream handshake otherwise)
    /// - At least one concurrent session is allowed
    /// - The inbound audio queue can hold at least one chunk
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.upstream.api_key.trim().is_empty() {
            return Err(anyhow::anyhow!(
                "No upstream API key configured (set GEMINI_API_KEY)"
            ));
        }

        if self.server.max_concurrent_sessions == 0 {
            return Err(anyhow::anyhow!("Max concurrent sessions must be greater than 0"));
        }

        if self.session.inbound_queue_capacity == 0 {
            return Err(anyhow::anyhow!("Inbound queue capacity must be greater than 0"));
        }

        Ok(())
    }
}

impl UpstreamConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl SessionConfig {
    pub fn greeting_delay(&self) -> Duration {
        Duration::from_millis(self.greeting_delay_ms)
    }
}

/// Layer the plain deployment variables on top of everything else.
///
/// `lookup` is injected so tests don't have to mutate the process environment.
fn apply_env_aliases(
    mut builder: ConfigBuilder<DefaultState>,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<ConfigBuilder<DefaultState>> {
    for (var, key) in ENV_ALIASES {
        if let Some(value) = lookup(var) {
            builder = builder.set_override(*key, value)?;
        }
    }
    Ok(builder)
}
