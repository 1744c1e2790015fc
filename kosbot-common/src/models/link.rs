use serde::{Deserialize, Serialize};

/// Lifecycle of the device socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    /// Connected, with bytes still queued behind a full socket buffer.
    Draining,
}

impl LinkState {
    pub fn is_connected(&self) -> bool {
        matches!(self, LinkState::Connected | LinkState::Draining)
    }
}

/// Snapshot of the device link. Only valid at the instant it was read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkStatus {
    pub state: LinkState,
    pub connected: bool,
    pub remote_host: Option<String>,
    pub remote_port: Option<u16>,
    pub last_error: Option<String>,
}

impl Default for LinkStatus {
    fn default() -> Self {
        Self {
            state: LinkState::Disconnected,
            connected: false,
            remote_host: None,
            remote_port: None,
            last_error: None,
        }
    }
}

/// Result of an accepted device write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteOutcome {
    /// Every byte was handed to the socket.
    Flushed,
    /// Some bytes are queued and will go out once the socket drains.
    Buffered,
}
