//! # Voice Sessions
//!
//! A session bridges one client connection to one upstream speech session.
//!
//! ## Module Organization:
//! - **client**: framework-independent view of the client WebSocket
//! - **protocol**: JSON messages exchanged with the client
//! - **event**: tagged events flowing from the upstream side to the client side
//! - **pumps**: the tasks moving data in each direction
//! - **cancel**: the stop signal shared by the tasks of one session
//! - **orchestrator**: lifecycle, supervision and cleanup
//!
//! The transport layer (see `websocket`) only has to provide a `ClientConnection`;
//! everything else about a session lives here.

pub mod cancel;
pub mod client;
pub mod error;
pub mod event;
pub mod orchestrator;
pub mod protocol;
pub mod pumps;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{ClientConnection, ClientFrame, ClientSink, ClientSource};
pub use cancel::CancelSignal;
pub use error::SessionError;
pub use orchestrator::{SessionEnd, SessionReport, SessionSettings, VoiceSession};
