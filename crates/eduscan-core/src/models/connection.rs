//! Connection lifecycle state

use serde::{Deserialize, Serialize};

/// State of the real-time connection to the scanning service
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No connection
    #[default]
    Disconnected,
    /// Handshake in progress
    Connecting,
    /// Handshake accepted, messages may be sent
    Connected,
    /// Connection died from a transport error; always followed by `Disconnected`
    Error,
}

impl ConnectionState {
    /// True only in the `Connected` state
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// True while a connection is open or being opened
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connected | ConnectionState::Connecting
        )
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Error => "error",
        };
        f.write_str(s)
    }
}
