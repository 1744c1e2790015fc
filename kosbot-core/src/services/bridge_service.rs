// File: kosbot-core/src/services/bridge_service.rs

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};

use kosbot_common::models::chat::{ChatStatus, HistoryEntry};
use kosbot_common::models::command::{CommandDefinition, CommandUsage, NewCommand};
use kosbot_common::models::config::TwitchConfig;
use kosbot_common::models::link::{LinkStatus, WriteOutcome};
use kosbot_common::traits::platform_traits::{read_status, ChatPlatform, SharedStatus};
use kosbot_common::traits::repository_traits::CommandRepository;

use crate::device::link::DeviceLink;
use crate::device::ensure_newline;
use crate::eventbus::EventBus;
use crate::services::chat_bridge::ChatBridge;
use crate::Error;

/// Operator-facing surface of the running bridge: status, history, raw
/// sends, command management and the reconnect/connect/disconnect controls.
pub struct BridgeService {
    link: DeviceLink,
    bridge: Arc<ChatBridge>,
    chat: Mutex<Box<dyn ChatPlatform>>,
    chat_state: SharedStatus,
    twitch: TwitchConfig,
    commands: Arc<dyn CommandRepository>,
    event_bus: Arc<EventBus>,
}

impl BridgeService {
    pub fn new(
        link: DeviceLink,
        bridge: Arc<ChatBridge>,
        chat: Box<dyn ChatPlatform>,
        twitch: TwitchConfig,
        commands: Arc<dyn CommandRepository>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        let chat_state = chat.status_handle();
        Self {
            link,
            bridge,
            chat: Mutex::new(chat),
            chat_state,
            twitch,
            commands,
            event_bus,
        }
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        self.event_bus.clone()
    }

    pub fn link_status(&self) -> LinkStatus {
        self.link.status()
    }

    /// Does not wait for a chat connect in progress.
    pub fn chat_status(&self) -> ChatStatus {
        let connection = read_status(&self.chat_state);
        let settings = self.bridge.settings();
        ChatStatus {
            enabled: self.twitch.enabled,
            connected: connection.is_connected(),
            connection,
            channels: self.twitch.irc_channels(),
            username: self.twitch.username.clone(),
            command_prefix: settings.command_prefix.clone(),
            allowed_users: settings.allowed_users.clone(),
            history_count: self.bridge.history_count(),
            custom_command_count: self.bridge.custom_command_count(),
        }
    }

    /// Most recent last, at most 100 entries.
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.bridge.history()
    }

    /// The command set the dispatcher is currently using.
    pub fn commands(&self) -> Vec<CommandDefinition> {
        self.bridge.command_table().commands.clone()
    }

    /// Sends operator text straight to the device. Surrounding whitespace is
    /// trimmed and a newline appended.
    pub async fn send_raw(&self, text: &str) -> Result<WriteOutcome, Error> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(Error::Validation("Command is required".into()));
        }
        let line = ensure_newline(trimmed);
        match self.link.write(&line).await {
            Ok(outcome) => {
                info!("(BridgeService) sent raw command => {}", trimmed);
                Ok(outcome)
            }
            Err(e) => {
                warn!("(BridgeService) raw command not sent => {}", e);
                Err(e)
            }
        }
    }

    pub fn request_reconnect(&self) {
        info!("(BridgeService) manual device reconnect requested");
        self.link.request_reconnect();
    }

    pub async fn connect_chat(&self) -> Result<(), Error> {
        if !self.twitch.enabled {
            return Err(Error::Config("Twitch integration is disabled".into()));
        }
        self.chat.lock().await.connect().await
    }

    pub async fn disconnect_chat(&self) -> Result<(), Error> {
        self.chat.lock().await.disconnect().await
    }

    pub async fn get_command(&self, id: &str) -> Result<CommandDefinition, Error> {
        self.commands
            .get_command(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Command {} not found", id)))
    }

    pub async fn create_command(&self, new: NewCommand) -> Result<CommandDefinition, Error> {
        self.commands.create_command(new).await
    }

    pub async fn update_command(&self, id: &str, update: NewCommand) -> Result<CommandDefinition, Error> {
        self.commands.update_command(id, update).await
    }

    pub async fn delete_command(&self, id: &str) -> Result<CommandDefinition, Error> {
        self.commands.delete_command(id).await
    }

    pub async fn command_usage(&self, id: &str) -> Result<Vec<CommandUsage>, Error> {
        self.commands.command_usage(id).await
    }

    /// Swaps in a whole new command set through the repository; the
    /// dispatcher sees it on its next message. Returns the new table version.
    pub async fn replace_commands(&self, commands: Vec<CommandDefinition>) -> Result<u64, Error> {
        let stored = self.commands.replace_all(commands).await?;
        let version = self.bridge.command_table().version;
        info!("(BridgeService) loaded {} custom commands (v{})", stored.len(), version);
        Ok(version)
    }
}
