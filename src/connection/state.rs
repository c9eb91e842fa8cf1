use serde::Serialize;
use std::fmt;

/// Lifecycle of the live channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No channel
    Idle,

    /// Handshake in flight
    Connecting,

    /// Handshake done, resync triggered, events are dispatched
    Open,

    /// Channel closed while still wanted; a reconnect is pending
    Reconnecting,

    /// Retry budget exhausted; only an explicit `connect` recovers
    Abandoned,
}

impl ConnectionState {
    /// States in which a fresh `connect` for the same session is a no-op
    pub fn is_live(&self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Open)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Abandoned => "abandoned",
        };
        f.write_str(name)
    }
}

/// Observable view of the manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub session_id: Option<String>,
    pub retries: u32,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self {
            state: ConnectionState::Idle,
            session_id: None,
            retries: 0,
        }
    }
}
