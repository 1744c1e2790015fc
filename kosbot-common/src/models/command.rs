use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Only the newest usage records are kept on a command.
pub const MAX_USAGE_ENTRIES: usize = 50;

/// Minimum chat role required to invoke a custom command.
///
/// Stored as a lowercase string. Anything we don't know is kept verbatim in
/// `Unrecognized` instead of failing the whole command file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PermissionTier {
    Everyone,
    Subscribers,
    Moderators,
    Broadcaster,
    Unrecognized(String),
}

impl Default for PermissionTier {
    fn default() -> Self {
        PermissionTier::Everyone
    }
}

impl fmt::Display for PermissionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PermissionTier::Everyone => write!(f, "everyone"),
            PermissionTier::Subscribers => write!(f, "subscribers"),
            PermissionTier::Moderators => write!(f, "moderators"),
            PermissionTier::Broadcaster => write!(f, "broadcaster"),
            PermissionTier::Unrecognized(raw) => write!(f, "{}", raw),
        }
    }
}

impl From<String> for PermissionTier {
    fn from(s: String) -> Self {
        match s.trim().to_lowercase().as_str() {
            "everyone" => PermissionTier::Everyone,
            "subscribers" => PermissionTier::Subscribers,
            "moderators" => PermissionTier::Moderators,
            "broadcaster" => PermissionTier::Broadcaster,
            _ => PermissionTier::Unrecognized(s),
        }
    }
}

impl From<&str> for PermissionTier {
    fn from(s: &str) -> Self {
        PermissionTier::from(s.to_string())
    }
}

impl From<PermissionTier> for String {
    fn from(tier: PermissionTier) -> Self {
        tier.to_string()
    }
}

/// One invocation of a custom command, as kept in its usage log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandUsage {
    pub username: String,
    pub output: String,
    pub timestamp: DateTime<Utc>,
}

/// A custom chat command (e.g. `!ping`) mapped to a line of device input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandDefinition {
    /// Assigned by the repository when left empty.
    #[serde(default)]
    pub id: String,
    pub trigger: String,
    pub output: String,
    #[serde(default)]
    pub description: String,

    /// Per-user cooldown in seconds; 0 disables it.
    #[serde(default)]
    pub cooldown: u64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub permissions: PermissionTier,

    #[serde(default)]
    pub uses: u64,
    #[serde(default)]
    pub usage: Vec<CommandUsage>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

fn default_enabled() -> bool {
    true
}

impl CommandDefinition {
    /// Appends a usage record, trimming to the newest `MAX_USAGE_ENTRIES`,
    /// and bumps the use counter.
    pub fn push_usage(&mut self, usage: CommandUsage) {
        self.usage.push(usage);
        if self.usage.len() > MAX_USAGE_ENTRIES {
            let excess = self.usage.len() - MAX_USAGE_ENTRIES;
            self.usage.drain(..excess);
        }
        self.uses += 1;
    }
}

/// Create/update payload coming from the administrative side.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewCommand {
    pub trigger: String,
    pub output: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub cooldown: Option<u64>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub permissions: Option<PermissionTier>,
}

/// Emitted by the dispatcher every time a custom command reaches the device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageEvent {
    pub command_id: String,
    pub username: String,
    pub output: String,
    pub timestamp: DateTime<Utc>,
}

impl From<&UsageEvent> for CommandUsage {
    fn from(evt: &UsageEvent) -> Self {
        CommandUsage {
            username: evt.username.clone(),
            output: evt.output.clone(),
            timestamp: evt.timestamp,
        }
    }
}

/// Immutable, versioned snapshot of every command definition.
///
/// Readers hold an `Arc<CommandTable>`; a change produces a whole new table
/// with a bumped version.
#[derive(Debug, Clone, Default)]
pub struct CommandTable {
    pub version: u64,
    pub commands: Vec<CommandDefinition>,
}

impl CommandTable {
    pub fn new(version: u64, commands: Vec<CommandDefinition>) -> Self {
        Self { version, commands }
    }

    /// First enabled command with exactly this (already lowercased) trigger,
    /// in insertion order.
    pub fn find_enabled(&self, trigger: &str) -> Option<&CommandDefinition> {
        self.commands
            .iter()
            .find(|c| c.enabled && c.trigger == trigger)
    }

    pub fn get(&self, id: &str) -> Option<&CommandDefinition> {
        self.commands.iter().find(|c| c.id == id)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Largest cooldown of any command, in seconds.
    pub fn max_cooldown_secs(&self) -> u64 {
        self.commands.iter().map(|c| c.cooldown).max().unwrap_or(0)
    }
}
