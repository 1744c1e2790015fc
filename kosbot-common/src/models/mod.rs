pub mod chat;
pub mod command;
pub mod config;
pub mod link;

pub use chat::{ChatMessageEvent, ChatRoles, ChatStatus, HistoryEntry};
pub use command::{CommandDefinition, CommandTable, CommandUsage, NewCommand, PermissionTier, UsageEvent};
pub use config::{BridgeConfig, DeviceConfig, TwitchConfig};
pub use link::{LinkState, LinkStatus, WriteOutcome};
