use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration file (`kosbot.json`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub twitch: TwitchConfig,
}

/// Where the device control endpoint lives and how the link paces itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConfig {
    #[serde(default = "default_device_host")]
    pub host: String,
    #[serde(default = "default_device_port")]
    pub port: u16,

    /// Settle time between connect and the `HANDSHAKE` line.
    #[serde(default = "default_handshake_delay_ms")]
    pub handshake_delay_ms: u64,
    /// Fixed delay before reconnecting after a close.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_true")]
    pub keepalive: bool,
    /// Destroy the socket when nothing is read for this long. Off when unset.
    #[serde(default)]
    pub idle_timeout_ms: Option<u64>,
}

fn default_device_host() -> String {
    "127.0.0.1".to_string()
}

fn default_device_port() -> u16 {
    5410
}

fn default_handshake_delay_ms() -> u64 {
    1000
}

fn default_reconnect_delay_ms() -> u64 {
    3000
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            host: default_device_host(),
            port: default_device_port(),
            handshake_delay_ms: default_handshake_delay_ms(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            keepalive: true,
            idle_timeout_ms: None,
        }
    }
}

impl DeviceConfig {
    pub fn handshake_delay(&self) -> Duration {
        Duration::from_millis(self.handshake_delay_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_ms.map(Duration::from_millis)
    }
}

/// Chat side settings. Field names match the old `twitch-config.json`.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TwitchConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_username")]
    pub username: String,
    /// IRC password, `oauth:` prefixed. Never logged.
    #[serde(default = "default_oauth")]
    pub oauth: String,
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default = "default_command_prefix")]
    pub command_prefix: String,
    /// Lowercase logins allowed to issue commands. Empty means everyone.
    #[serde(default)]
    pub allowed_users: Vec<String>,
    #[serde(default = "default_true")]
    pub auto_connect: bool,
    #[serde(default = "default_true")]
    pub log_commands: bool,
    /// Longest accepted command after the prefix; 0 disables the check.
    #[serde(default)]
    pub max_command_length: usize,
    /// How often the dispatcher prunes stale cooldown entries, in seconds.
    #[serde(default = "default_cooldown_prune_secs")]
    pub cooldown_prune_secs: u64,
}

fn default_username() -> String {
    "your_bot_username".to_string()
}

fn default_oauth() -> String {
    "oauth:your_oauth_token_here".to_string()
}

fn default_command_prefix() -> String {
    "!".to_string()
}

fn default_true() -> bool {
    true
}

fn default_cooldown_prune_secs() -> u64 {
    600
}

impl Default for TwitchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            username: default_username(),
            oauth: default_oauth(),
            channels: vec![],
            command_prefix: default_command_prefix(),
            allowed_users: vec![],
            auto_connect: true,
            log_commands: true,
            max_command_length: 0,
            cooldown_prune_secs: default_cooldown_prune_secs(),
        }
    }
}

impl fmt::Debug for TwitchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TwitchConfig")
            .field("enabled", &self.enabled)
            .field("username", &self.username)
            .field("oauth", &"[REDACTED]")
            .field("channels", &self.channels)
            .field("command_prefix", &self.command_prefix)
            .field("allowed_users", &self.allowed_users)
            .field("auto_connect", &self.auto_connect)
            .field("log_commands", &self.log_commands)
            .field("max_command_length", &self.max_command_length)
            .field("cooldown_prune_secs", &self.cooldown_prune_secs)
            .finish()
    }
}

impl TwitchConfig {
    /// Channels normalized to `#lowercase`, the form IRC uses.
    pub fn irc_channels(&self) -> Vec<String> {
        self.channels
            .iter()
            .map(|c| c.trim())
            .filter(|c| !c.is_empty())
            .map(|c| format!("#{}", c.trim_start_matches('#').to_lowercase()))
            .collect()
    }

    /// Allow-list lowercased for comparison against logins.
    pub fn allowed_logins(&self) -> Vec<String> {
        self.allowed_users
            .iter()
            .map(|u| u.trim().to_lowercase())
            .filter(|u| !u.is_empty())
            .collect()
    }
}
