use crate::upstream::UpstreamError;
use std::fmt;
use thiserror::Error;

/// The five tasks a session runs concurrently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Task {
    Greeting,
    Inbound,
    UpstreamSender,
    UpstreamReceiver,
    Outbound,
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Task::Greeting => "greeting",
            Task::Inbound => "inbound",
            Task::UpstreamSender => "upstream_sender",
            Task::UpstreamReceiver => "upstream_receiver",
            Task::Outbound => "outbound",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    /// The upstream session could not be established. Fatal for the session.
    #[error("failed to connect to upstream: {0}")]
    Connect(#[source] UpstreamError),

    /// A client text frame was not valid JSON. Logged and ignored.
    #[error("malformed control message: {0}")]
    MalformedControlMessage(#[from] serde_json::Error),

    /// A pump hit an upstream error and the session is being torn down.
    #[error("{pump} task failed: {source}")]
    PumpFailure {
        pump: Task,
        #[source]
        source: UpstreamError,
    },

    /// The client went away (socket closed or send failed).
    #[error("client disconnected")]
    ClientDisconnected,
}

impl SessionError {
    pub fn pump(pump: Task, source: UpstreamError) -> Self {
        SessionError::PumpFailure { pump, source }
    }

    pub fn is_pump_failure(&self) -> bool {
        matches!(self, SessionError::PumpFailure { .. })
    }
}
