use async_trait::async_trait;

use crate::Error;
use crate::models::command::{CommandDefinition, CommandUsage, NewCommand, UsageEvent};

/// Storage for custom command definitions.
///
/// Implementations enforce the trigger invariant: every trigger is lowercase
/// and unique across enabled and disabled commands.
#[async_trait]
pub trait CommandRepository: Send + Sync {
    async fn list_commands(&self) -> Result<Vec<CommandDefinition>, Error>;
    async fn get_command(&self, id: &str) -> Result<Option<CommandDefinition>, Error>;
    async fn create_command(&self, new: NewCommand) -> Result<CommandDefinition, Error>;
    async fn update_command(&self, id: &str, update: NewCommand) -> Result<CommandDefinition, Error>;
    async fn delete_command(&self, id: &str) -> Result<CommandDefinition, Error>;
    async fn command_usage(&self, id: &str) -> Result<Vec<CommandUsage>, Error>;
    async fn record_usage(&self, usage: &UsageEvent) -> Result<(), Error>;

    /// Swaps the whole command set for `commands`, returning what was stored.
    /// Nothing changes if any trigger is invalid or repeated.
    async fn replace_all(&self, commands: Vec<CommandDefinition>) -> Result<Vec<CommandDefinition>, Error>;
}
