//! Connection state of a chat adapter.
//!
//! ```text
//! Disconnected -> Connecting -> Joining -> Active
//!                     ^                      |
//!                     +---- transport lost --+
//! ```
//!
//! Any state moves to `Disconnected` on teardown or room switch.

use std::time::Duration;

use opinion_shared::constants::DEFAULT_SERVER_URL;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    /// No transport, and none will be opened.
    Disconnected,
    /// Opening (or re-opening) the transport.
    Connecting,
    /// Transport open, `join-room` sent, waiting for history.
    Joining,
    /// History received; new messages are appended.
    Active,
}

impl AdapterState {
    /// Whether a `send` would reach the relay.
    pub fn can_send(&self) -> bool {
        matches!(self, Self::Joining | Self::Active)
    }
}

/// Adapter settings.
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    /// WebSocket URL of the relay, e.g. `ws://127.0.0.1:3000/ws`.
    pub server_url: String,

    /// First reconnect delay after the transport drops.
    pub initial_backoff: Duration,

    /// Upper bound for the doubling reconnect delay.
    pub max_backoff: Duration,
}

impl AdapterConfig {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            ..Self::default()
        }
    }
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(10),
        }
    }
}
