//! src/services/chat_bridge.rs
//!
//! Turns chat lines into device commands. Messages are handled one at a time
//! by a single task, so the cooldown check and the cooldown record of one
//! dispatch never interleave with another dispatch.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

use kosbot_common::models::chat::{ChatMessageEvent, HistoryEntry};
use kosbot_common::models::command::{CommandDefinition, CommandTable, UsageEvent};
use kosbot_common::models::config::TwitchConfig;
use kosbot_common::models::link::WriteOutcome;

use crate::device::{ensure_newline, DeviceSink};
use crate::eventbus::EventBus;
use crate::services::cooldown::CooldownTracker;
use crate::services::permission;
use crate::services::resolver::{resolve, Resolution};
use crate::Error;

pub const MAX_HISTORY_ENTRIES: usize = 100;

/// The slice of chat configuration the dispatcher needs.
#[derive(Debug, Clone)]
pub struct BridgeSettings {
    /// The bridge's own login; its messages are ignored.
    pub username: String,
    pub command_prefix: String,
    /// Lowercase logins. Empty means unrestricted.
    pub allowed_users: Vec<String>,
    /// 0 = unlimited.
    pub max_command_length: usize,
    pub log_commands: bool,
    pub cooldown_prune_interval: Duration,
}

impl From<&TwitchConfig> for BridgeSettings {
    fn from(cfg: &TwitchConfig) -> Self {
        Self {
            username: cfg.username.trim().to_lowercase(),
            command_prefix: cfg.command_prefix.clone(),
            allowed_users: cfg.allowed_logins(),
            max_command_length: cfg.max_command_length,
            log_commands: cfg.log_commands,
            cooldown_prune_interval: Duration::from_secs(cfg.cooldown_prune_secs.max(1)),
        }
    }
}

/// Why a chat message did not reach the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    OwnMessage,
    NoPrefix,
    /// Nothing left after the prefix.
    MalformedCommand,
    TooLong,
    NotAllowed,
    PermissionDenied,
    OnCooldown,
}

#[derive(Debug)]
pub enum DispatchOutcome {
    Forwarded {
        /// Exactly what was handed to the device, newline included.
        text: String,
        /// Set for custom commands, `None` for passthrough.
        command_id: Option<String>,
        write: WriteOutcome,
    },
    Dropped(DropReason),
    /// The device rejected the write (usually `LinkUnavailable`).
    Failed { text: String, error: Error },
}

impl DispatchOutcome {
    pub fn forwarded_text(&self) -> Option<&str> {
        match self {
            DispatchOutcome::Forwarded { text, .. } => Some(text),
            _ => None,
        }
    }

    pub fn drop_reason(&self) -> Option<DropReason> {
        match self {
            DispatchOutcome::Dropped(reason) => Some(*reason),
            _ => None,
        }
    }
}

pub struct ChatBridge {
    settings: BridgeSettings,
    commands: watch::Receiver<Arc<CommandTable>>,
    sink: Arc<dyn DeviceSink>,
    event_bus: Option<Arc<EventBus>>,
    cooldowns: Mutex<CooldownTracker>,
    history: Mutex<VecDeque<HistoryEntry>>,
}

impl ChatBridge {
    pub fn new(
        settings: BridgeSettings,
        commands: watch::Receiver<Arc<CommandTable>>,
        sink: Arc<dyn DeviceSink>,
    ) -> Self {
        debug!("Initializing ChatBridge (prefix='{}')", settings.command_prefix);
        Self {
            settings,
            commands,
            sink,
            event_bus: None,
            cooldowns: Mutex::new(CooldownTracker::new()),
            history: Mutex::new(VecDeque::with_capacity(MAX_HISTORY_ENTRIES)),
        }
    }

    pub fn set_event_bus(&mut self, bus: Arc<EventBus>) {
        self.event_bus = Some(bus);
    }

    pub fn settings(&self) -> &BridgeSettings {
        &self.settings
    }

    /// Current command table snapshot.
    pub fn command_table(&self) -> Arc<CommandTable> {
        self.commands.borrow().clone()
    }

    pub fn custom_command_count(&self) -> usize {
        self.command_table().len()
    }

    /// Recent custom-command invocations, oldest first.
    pub fn history(&self) -> Vec<HistoryEntry> {
        match self.history.lock() {
            Ok(h) => h.iter().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
        }
    }

    pub fn history_count(&self) -> usize {
        match self.history.lock() {
            Ok(h) => h.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// Drains chat messages until the channel closes or shutdown flips.
    pub async fn run(
        self: Arc<Self>,
        mut messages: mpsc::Receiver<ChatMessageEvent>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let mut commands_rx = self.commands.clone();
        let mut watching_commands = true;
        let mut prune = interval(self.settings.cooldown_prune_interval);
        prune.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("(ChatBridge) dispatcher started");

        loop {
            tokio::select! {
                msg = messages.recv() => match msg {
                    Some(msg) => {
                        let outcome = self.dispatch(&msg).await;
                        debug!("(ChatBridge) {} => {:?}", msg.username, outcome);
                    }
                    None => break,
                },
                changed = commands_rx.changed(), if watching_commands => {
                    if changed.is_err() {
                        warn!("(ChatBridge) command table sender dropped; keeping last snapshot");
                        watching_commands = false;
                        continue;
                    }
                    let table = commands_rx.borrow_and_update().clone();
                    debug!("(ChatBridge) now using {} custom commands (v{})", table.len(), table.version);
                },
                _ = prune.tick() => self.prune_cooldowns(),
                Ok(_) = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
        info!("(ChatBridge) dispatcher ended.");
    }

    /// Runs one chat message through the pipeline.
    pub async fn dispatch(&self, msg: &ChatMessageEvent) -> DispatchOutcome {
        if msg.username.eq_ignore_ascii_case(&self.settings.username) {
            return DispatchOutcome::Dropped(DropReason::OwnMessage);
        }

        let Some(rest) = msg.text.strip_prefix(self.settings.command_prefix.as_str()) else {
            return DispatchOutcome::Dropped(DropReason::NoPrefix);
        };
        let command = rest.trim();
        if command.is_empty() {
            return DispatchOutcome::Dropped(DropReason::MalformedCommand);
        }
        if self.settings.max_command_length > 0
            && command.chars().count() > self.settings.max_command_length
        {
            debug!("(ChatBridge) {} sent an over-long command, dropping", msg.username);
            return DispatchOutcome::Dropped(DropReason::TooLong);
        }

        if self.settings.log_commands {
            info!("(ChatBridge) {}: {}", msg.username, command);
        }
        if !self.is_user_allowed(msg) {
            info!("(ChatBridge) user {} not allowed to use commands", msg.username);
            return DispatchOutcome::Dropped(DropReason::NotAllowed);
        }

        let table = self.command_table();
        match resolve(&table, command) {
            Resolution::Custom(cmd) => self.dispatch_custom(msg, &cmd).await,
            Resolution::Passthrough => {
                let text = ensure_newline(command);
                match self.sink.send_line(&text).await {
                    Ok(write) => DispatchOutcome::Forwarded {
                        text,
                        command_id: None,
                        write,
                    },
                    Err(error) => {
                        warn!("(ChatBridge) cannot send raw command '{}' => {}", command, error);
                        DispatchOutcome::Failed { text, error }
                    }
                }
            }
        }
    }

    async fn dispatch_custom(&self, msg: &ChatMessageEvent, cmd: &CommandDefinition) -> DispatchOutcome {
        if !permission::allowed(&cmd.permissions, &msg.roles) {
            info!(
                "(ChatBridge) user {} doesn't have permission for command {}",
                msg.username, cmd.trigger
            );
            return DispatchOutcome::Dropped(DropReason::PermissionDenied);
        }

        let on_cooldown = self
            .with_cooldowns(|cd| cd.on_cooldown(&cmd.id, &msg.username, cmd.cooldown));
        if on_cooldown {
            debug!("(ChatBridge) {} is on cooldown for {}", cmd.trigger, msg.username);
            return DispatchOutcome::Dropped(DropReason::OnCooldown);
        }

        info!("(ChatBridge) executing custom command: {} -> {}", cmd.trigger, cmd.output);
        self.push_history(HistoryEntry {
            timestamp: Utc::now(),
            username: msg.username.clone(),
            command: format!("{} (custom)", cmd.trigger),
            channel: msg.channel.clone(),
        });

        let text = ensure_newline(&cmd.output);
        match self.sink.send_line(&text).await {
            Ok(write) => {
                self.with_cooldowns(|cd| cd.record_use(&cmd.id, &msg.username));
                if let Some(bus) = &self.event_bus {
                    bus.publish_usage(UsageEvent {
                        command_id: cmd.id.clone(),
                        username: msg.username.clone(),
                        output: cmd.output.clone(),
                        timestamp: Utc::now(),
                    })
                    .await;
                }
                DispatchOutcome::Forwarded {
                    text,
                    command_id: Some(cmd.id.clone()),
                    write,
                }
            }
            Err(error) => {
                warn!("(ChatBridge) cannot send command {} => {}", cmd.trigger, error);
                DispatchOutcome::Failed { text, error }
            }
        }
    }

    fn is_user_allowed(&self, msg: &ChatMessageEvent) -> bool {
        if self.settings.allowed_users.is_empty() {
            return true;
        }
        let login = msg.username.to_lowercase();
        if self.settings.allowed_users.iter().any(|u| *u == login) {
            return true;
        }
        msg.roles.moderator || msg.roles.broadcaster
    }

    fn push_history(&self, entry: HistoryEntry) {
        let mut history = match self.history.lock() {
            Ok(h) => h,
            Err(poisoned) => poisoned.into_inner(),
        };
        history.push_back(entry);
        while history.len() > MAX_HISTORY_ENTRIES {
            history.pop_front();
        }
    }

    fn with_cooldowns<T>(&self, f: impl FnOnce(&mut CooldownTracker) -> T) -> T {
        let mut cd = match self.cooldowns.lock() {
            Ok(cd) => cd,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut cd)
    }

    /// Entries older than the longest cooldown in the table can never block
    /// anyone again.
    pub fn prune_cooldowns(&self) {
        let max = Duration::from_secs(self.command_table().max_cooldown_secs());
        let removed = self.with_cooldowns(|cd| cd.prune(max));
        if removed > 0 {
            debug!("(ChatBridge) pruned {} stale cooldown entries", removed);
        }
    }

    pub fn cooldown_entries(&self) -> usize {
        self.with_cooldowns(|cd| cd.len())
    }
}
