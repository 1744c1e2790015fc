// File: kosbot-core/src/repositories/json/commands.rs

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info};

use kosbot_common::error::Error;
use kosbot_common::models::command::{
    CommandDefinition, CommandTable, CommandUsage, NewCommand, UsageEvent,
};
use kosbot_common::traits::repository_traits::CommandRepository;

struct Store {
    commands: Vec<CommandDefinition>,
}

/// Command definitions kept in a pretty-printed JSON array on disk.
///
/// Every mutation rewrites the file and publishes a fresh [`CommandTable`]
/// to the watch channel the dispatcher reads.
pub struct JsonCommandRepository {
    path: PathBuf,
    store: Mutex<Store>,
    table_tx: Arc<watch::Sender<Arc<CommandTable>>>,
}

impl JsonCommandRepository {
    /// Loads `path`, creating an empty file if it does not exist yet.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        let commands: Vec<CommandDefinition> = match tokio::fs::read_to_string(&path).await {
            Ok(raw) if raw.trim().is_empty() => Vec::new(),
            Ok(raw) => serde_json::from_str(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() {
                        tokio::fs::create_dir_all(parent).await?;
                    }
                }
                tokio::fs::write(&path, "[]").await?;
                info!("(Commands) created empty command file at {}", path.display());
                Vec::new()
            }
            Err(e) => return Err(e.into()),
        };
        info!("(Commands) loaded {} custom commands from {}", commands.len(), path.display());

        let (table_tx, _) = watch::channel(Arc::new(CommandTable::new(1, commands.clone())));
        Ok(Self {
            path,
            store: Mutex::new(Store { commands }),
            table_tx: Arc::new(table_tx),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Receiver for command table snapshots. Starts at the current table.
    pub fn subscribe_table(&self) -> watch::Receiver<Arc<CommandTable>> {
        self.table_tx.subscribe()
    }

    pub fn table(&self) -> Arc<CommandTable> {
        self.table_tx.borrow().clone()
    }

    async fn save(&self, store: &Store) -> Result<(), Error> {
        let json = serde_json::to_string_pretty(&store.commands)?;
        tokio::fs::write(&self.path, json).await?;
        Ok(())
    }

    /// Replaces the published table with the store's commands under the next
    /// version number.
    fn publish(&self, store: &Store) -> u64 {
        let commands = store.commands.clone();
        let mut version = 0;
        self.table_tx.send_modify(|table| {
            version = table.version + 1;
            *table = Arc::new(CommandTable::new(version, commands));
        });
        debug!("(Commands) published table v{}", version);
        version
    }
}

fn normalize_trigger(trigger: &str) -> Result<String, Error> {
    let trigger = trigger.trim().to_lowercase();
    if trigger.is_empty() {
        return Err(Error::Validation("Trigger and output are required".into()));
    }
    if trigger.chars().any(char::is_whitespace) {
        return Err(Error::Validation(format!(
            "Trigger '{}' must be a single word",
            trigger
        )));
    }
    Ok(trigger)
}

fn validate(new: &NewCommand) -> Result<String, Error> {
    let trigger = normalize_trigger(&new.trigger)?;
    if new.output.trim().is_empty() {
        return Err(Error::Validation("Trigger and output are required".into()));
    }
    Ok(trigger)
}

/// Millisecond timestamp, bumped until it does not collide.
fn next_id(existing: &[CommandDefinition]) -> String {
    let mut millis = Utc::now().timestamp_millis();
    loop {
        let id = millis.to_string();
        if existing.iter().all(|c| c.id != id) {
            return id;
        }
        millis += 1;
    }
}

#[async_trait]
impl CommandRepository for JsonCommandRepository {
    async fn list_commands(&self) -> Result<Vec<CommandDefinition>, Error> {
        Ok(self.store.lock().await.commands.clone())
    }

    async fn get_command(&self, id: &str) -> Result<Option<CommandDefinition>, Error> {
        let store = self.store.lock().await;
        Ok(store.commands.iter().find(|c| c.id == id).cloned())
    }

    async fn create_command(&self, new: NewCommand) -> Result<CommandDefinition, Error> {
        let trigger = validate(&new)?;
        let mut store = self.store.lock().await;
        if store.commands.iter().any(|c| c.trigger == trigger) {
            return Err(Error::Validation(format!("Command '{}' already exists", trigger)));
        }

        let cmd = CommandDefinition {
            id: next_id(&store.commands),
            trigger,
            output: new.output,
            description: new.description.unwrap_or_default(),
            cooldown: new.cooldown.unwrap_or(0),
            enabled: new.enabled.unwrap_or(true),
            permissions: new.permissions.unwrap_or_default(),
            uses: 0,
            usage: Vec::new(),
            created_at: Some(Utc::now()),
            updated_at: None,
        };
        store.commands.push(cmd.clone());
        self.save(&store).await?;
        self.publish(&store);
        info!("(Commands) created !{} (id={})", cmd.trigger, cmd.id);
        Ok(cmd)
    }

    async fn update_command(&self, id: &str, update: NewCommand) -> Result<CommandDefinition, Error> {
        let trigger = validate(&update)?;
        let mut store = self.store.lock().await;
        if store.commands.iter().any(|c| c.id != id && c.trigger == trigger) {
            return Err(Error::Validation(format!("Command '{}' already exists", trigger)));
        }
        let Some(existing) = store.commands.iter_mut().find(|c| c.id == id) else {
            return Err(Error::NotFound(format!("Command {} not found", id)));
        };

        existing.trigger = trigger;
        existing.output = update.output;
        if let Some(description) = update.description {
            existing.description = description;
        }
        if let Some(cooldown) = update.cooldown {
            existing.cooldown = cooldown;
        }
        if let Some(enabled) = update.enabled {
            existing.enabled = enabled;
        }
        if let Some(permissions) = update.permissions {
            existing.permissions = permissions;
        }
        existing.updated_at = Some(Utc::now());
        let updated = existing.clone();

        self.save(&store).await?;
        self.publish(&store);
        info!("(Commands) updated !{} (id={})", updated.trigger, updated.id);
        Ok(updated)
    }

    async fn delete_command(&self, id: &str) -> Result<CommandDefinition, Error> {
        let mut store = self.store.lock().await;
        let Some(pos) = store.commands.iter().position(|c| c.id == id) else {
            return Err(Error::NotFound(format!("Command {} not found", id)));
        };
        let removed = store.commands.remove(pos);
        self.save(&store).await?;
        self.publish(&store);
        info!("(Commands) deleted !{} (id={})", removed.trigger, removed.id);
        Ok(removed)
    }

    async fn command_usage(&self, id: &str) -> Result<Vec<CommandUsage>, Error> {
        let store = self.store.lock().await;
        store
            .commands
            .iter()
            .find(|c| c.id == id)
            .map(|c| c.usage.clone())
            .ok_or_else(|| Error::NotFound(format!("Command {} not found", id)))
    }

    async fn record_usage(&self, usage: &UsageEvent) -> Result<(), Error> {
        let mut store = self.store.lock().await;
        let Some(cmd) = store.commands.iter_mut().find(|c| c.id == usage.command_id) else {
            return Err(Error::NotFound(format!("Command {} not found", usage.command_id)));
        };
        cmd.push_usage(CommandUsage::from(usage));
        self.save(&store).await?;
        self.publish(&store);
        Ok(())
    }

    async fn replace_all(&self, commands: Vec<CommandDefinition>) -> Result<Vec<CommandDefinition>, Error> {
        let mut triggers = HashSet::new();
        let mut ids = HashSet::new();
        let mut normalized = Vec::with_capacity(commands.len());
        for mut cmd in commands {
            cmd.trigger = normalize_trigger(&cmd.trigger)?;
            if cmd.output.trim().is_empty() {
                return Err(Error::Validation(format!("Command '{}' has no output", cmd.trigger)));
            }
            if !triggers.insert(cmd.trigger.clone()) {
                return Err(Error::Validation(format!("Command '{}' already exists", cmd.trigger)));
            }
            if !cmd.id.is_empty() && !ids.insert(cmd.id.clone()) {
                return Err(Error::Validation(format!("Duplicate command id {}", cmd.id)));
            }
            normalized.push(cmd);
        }
        for i in 0..normalized.len() {
            if normalized[i].id.is_empty() {
                let id = next_id(&normalized);
                normalized[i].id = id;
                if normalized[i].created_at.is_none() {
                    normalized[i].created_at = Some(Utc::now());
                }
            }
        }

        let mut store = self.store.lock().await;
        store.commands = normalized;
        self.save(&store).await?;
        let version = self.publish(&store);
        info!("(Commands) replaced command set with {} commands (v{})", store.commands.len(), version);
        Ok(store.commands.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kosbot_common::models::command::{PermissionTier, MAX_USAGE_ENTRIES};
    use tempfile::tempdir;

    fn new_cmd(trigger: &str, output: &str) -> NewCommand {
        NewCommand {
            trigger: trigger.into(),
            output: output.into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_load_creates_missing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data").join("commands.json");
        let repo = JsonCommandRepository::load(&path).await.unwrap();

        assert!(path.exists());
        assert!(repo.list_commands().await.unwrap().is_empty());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "[]");
    }

    #[tokio::test]
    async fn test_create_normalizes_and_persists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("commands.json");
        let repo = JsonCommandRepository::load(&path).await.unwrap();

        let cmd = repo.create_command(new_cmd("  PING ", "PONG")).await.unwrap();
        assert_eq!(cmd.trigger, "ping");
        assert_eq!(cmd.cooldown, 0);
        assert!(cmd.enabled);
        assert_eq!(cmd.permissions, PermissionTier::Everyone);
        assert!(cmd.id.parse::<i64>().is_ok());

        let reloaded = JsonCommandRepository::load(&path).await.unwrap();
        let listed = reloaded.list_commands().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].trigger, "ping");
        assert_eq!(listed[0].output, "PONG");
    }

    #[tokio::test]
    async fn test_duplicate_trigger_rejected() {
        let dir = tempdir().unwrap();
        let repo = JsonCommandRepository::load(dir.path().join("c.json")).await.unwrap();
        repo.create_command(new_cmd("ping", "PONG")).await.unwrap();

        let err = repo.create_command(new_cmd("Ping", "OTHER")).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let err = repo.create_command(new_cmd("", "x")).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_update_preserves_usage_and_rejects_conflicts() {
        let dir = tempdir().unwrap();
        let repo = JsonCommandRepository::load(dir.path().join("c.json")).await.unwrap();
        let ping = repo.create_command(new_cmd("ping", "PONG")).await.unwrap();
        let stage = repo.create_command(new_cmd("stage", "STAGE.")).await.unwrap();
        assert_ne!(ping.id, stage.id);

        repo.record_usage(&UsageEvent {
            command_id: ping.id.clone(),
            username: "alice".into(),
            output: "PONG".into(),
            timestamp: Utc::now(),
        })
        .await
        .unwrap();

        let mut update = new_cmd("pong", "PING");
        update.cooldown = Some(10);
        let updated = repo.update_command(&ping.id, update).await.unwrap();
        assert_eq!(updated.trigger, "pong");
        assert_eq!(updated.cooldown, 10);
        assert_eq!(updated.uses, 1);
        assert_eq!(updated.created_at, ping.created_at);
        assert!(updated.updated_at.is_some());

        let err = repo.update_command(&ping.id, new_cmd("stage", "x")).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let err = repo.update_command("nope", new_cmd("z", "x")).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_mutations_publish_new_tables() {
        let dir = tempdir().unwrap();
        let repo = JsonCommandRepository::load(dir.path().join("c.json")).await.unwrap();
        let mut rx = repo.subscribe_table();
        let start = rx.borrow_and_update().version;

        let cmd = repo.create_command(new_cmd("ping", "PONG")).await.unwrap();
        assert!(rx.has_changed().unwrap());
        let table = rx.borrow_and_update().clone();
        assert!(table.version > start);
        assert!(table.find_enabled("ping").is_some());

        repo.delete_command(&cmd.id).await.unwrap();
        assert!(rx.borrow_and_update().is_empty());

        let err = repo.delete_command(&cmd.id).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_replaced_set_survives_later_mutations() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("c.json");
        let repo = JsonCommandRepository::load(&path).await.unwrap();
        let ping = repo.create_command(new_cmd("ping", "PONG")).await.unwrap();

        let mut stage = ping.clone();
        stage.id = String::new();
        stage.trigger = " STAGE ".into();
        stage.output = "STAGE.".into();
        let stored = repo.replace_all(vec![ping.clone(), stage]).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[1].trigger, "stage");
        assert!(!stored[1].id.is_empty());
        assert_ne!(stored[1].id, ping.id);

        repo.record_usage(&UsageEvent {
            command_id: ping.id.clone(),
            username: "alice".into(),
            output: "PONG".into(),
            timestamp: Utc::now(),
        })
        .await
        .unwrap();

        let table = repo.table();
        assert!(table.find_enabled("stage").is_some());
        assert_eq!(table.get(&ping.id).map(|c| c.uses), Some(1));

        let reloaded = JsonCommandRepository::load(&path).await.unwrap();
        assert_eq!(reloaded.list_commands().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_replace_rejects_repeated_triggers() {
        let dir = tempdir().unwrap();
        let repo = JsonCommandRepository::load(dir.path().join("c.json")).await.unwrap();
        let ping = repo.create_command(new_cmd("ping", "PONG")).await.unwrap();
        let version = repo.table().version;

        let mut shout = ping.clone();
        shout.id = "2".into();
        shout.trigger = "PING".into();
        let err = repo.replace_all(vec![ping.clone(), shout]).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        assert_eq!(repo.table().version, version);
        assert_eq!(repo.list_commands().await.unwrap(), vec![ping]);
    }

    #[tokio::test]
    async fn test_usage_log_is_capped() {
        let dir = tempdir().unwrap();
        let repo = JsonCommandRepository::load(dir.path().join("c.json")).await.unwrap();
        let cmd = repo.create_command(new_cmd("go", "GO.")).await.unwrap();

        for i in 0..(MAX_USAGE_ENTRIES + 5) {
            repo.record_usage(&UsageEvent {
                command_id: cmd.id.clone(),
                username: format!("user{}", i),
                output: "GO.".into(),
                timestamp: Utc::now(),
            })
            .await
            .unwrap();
        }

        let usage = repo.command_usage(&cmd.id).await.unwrap();
        assert_eq!(usage.len(), MAX_USAGE_ENTRIES);
        assert_eq!(usage[0].username, "user5");
        let stored = repo.get_command(&cmd.id).await.unwrap().unwrap();
        assert_eq!(stored.uses as usize, MAX_USAGE_ENTRIES + 5);
    }
}
