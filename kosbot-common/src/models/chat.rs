use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::traits::platform_traits::ConnectionStatus;

/// Role flags carried by a single chat message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRoles {
    pub moderator: bool,
    pub subscriber: bool,
    /// Sender owns the channel the message was posted in.
    pub broadcaster: bool,
}

/// A chat line as handed to the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessageEvent {
    /// Channel with its leading `#`, e.g. `#somestreamer`.
    pub channel: String,
    /// Lowercase login name of the sender.
    pub username: String,
    pub display_name: Option<String>,
    pub text: String,
    pub roles: ChatRoles,
}

/// Entry in the bridge's recent-command history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub username: String,
    pub command: String,
    pub channel: String,
}

/// Point-in-time view of the chat side of the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatStatus {
    pub enabled: bool,
    pub connected: bool,
    pub connection: ConnectionStatus,
    pub channels: Vec<String>,
    pub username: String,
    pub command_prefix: String,
    pub allowed_users: Vec<String>,
    pub history_count: usize,
    pub custom_command_count: usize,
}
