// File: kosbot-server/src/console.rs
//
// Line-oriented operator console on stdin.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tracing::{error, info};

use kosbot_common::models::command::{CommandDefinition, NewCommand, PermissionTier};
use kosbot_core::{BridgeService, Error};

const COMMAND_USAGE: &str = "usage: command add [opts] <trigger> <output> | command edit <id> [opts] [<trigger> [<output>]] \
| command delete <id> | command usage <id> | command import <file>  (opts: cooldown=N perms=TIER enabled=BOOL)";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Help,
    Send(String),
    Reconnect,
    Status,
    ChatConnect,
    ChatDisconnect,
    History,
    Commands,
    CommandAdd(CommandArgs),
    CommandEdit(String, CommandArgs),
    CommandDelete(String),
    CommandUsage(String),
    CommandImport(PathBuf),
    Quit,
    Unknown(String),
}

/// Fields given on a `command add` or `command edit` line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandArgs {
    pub trigger: Option<String>,
    pub output: Option<String>,
    pub cooldown: Option<u64>,
    pub permissions: Option<PermissionTier>,
    pub enabled: Option<bool>,
}

impl CommandArgs {
    /// Leading `key=value` options, then an optional trigger word, then the
    /// rest of the line verbatim as output.
    fn parse(mut rest: &str) -> Result<Self, String> {
        let mut args = CommandArgs::default();
        while let Some((token, after)) = next_token(rest) {
            let Some((key, value)) = token.split_once('=') else {
                break;
            };
            match key.to_lowercase().as_str() {
                "cooldown" => {
                    args.cooldown = Some(value.parse().map_err(|_| format!("bad cooldown '{}'", value))?);
                }
                "perms" | "permissions" => match PermissionTier::from(value) {
                    PermissionTier::Unrecognized(raw) => return Err(format!("unknown permission tier '{}'", raw)),
                    tier => args.permissions = Some(tier),
                },
                "enabled" => {
                    args.enabled = Some(value.parse().map_err(|_| format!("bad enabled flag '{}'", value))?);
                }
                other => return Err(format!("unknown option '{}'", other)),
            }
            rest = after;
        }
        if let Some((trigger, output)) = next_token(rest) {
            args.trigger = Some(trigger.to_string());
            if !output.is_empty() {
                args.output = Some(output.to_string());
            }
        }
        Ok(args)
    }

    fn into_new_command(self) -> NewCommand {
        NewCommand {
            trigger: self.trigger.unwrap_or_default(),
            output: self.output.unwrap_or_default(),
            description: None,
            cooldown: self.cooldown,
            enabled: self.enabled,
            permissions: self.permissions,
        }
    }

    /// Update payload for `existing`, keeping whatever the line left out.
    fn merge_into(self, existing: &CommandDefinition) -> NewCommand {
        NewCommand {
            trigger: self.trigger.unwrap_or_else(|| existing.trigger.clone()),
            output: self.output.unwrap_or_else(|| existing.output.clone()),
            description: None,
            cooldown: self.cooldown,
            enabled: self.enabled,
            permissions: self.permissions,
        }
    }

    fn is_empty(&self) -> bool {
        *self == CommandArgs::default()
    }
}

/// First whitespace-separated word and the remainder with leading
/// whitespace removed.
fn next_token(s: &str) -> Option<(&str, &str)> {
    let s = s.trim_start();
    if s.is_empty() {
        return None;
    }
    Some(match s.split_once(char::is_whitespace) {
        Some((token, rest)) => (token, rest.trim_start()),
        None => (s, ""),
    })
}

fn parse_command_verb(rest: &str) -> ConsoleCommand {
    let usage = || ConsoleCommand::Unknown(COMMAND_USAGE.into());
    let Some((verb, rest)) = next_token(rest) else {
        return usage();
    };
    match verb.to_lowercase().as_str() {
        "add" => match CommandArgs::parse(rest) {
            Ok(args) if args.trigger.is_some() && args.output.is_some() => ConsoleCommand::CommandAdd(args),
            Ok(_) => usage(),
            Err(msg) => ConsoleCommand::Unknown(msg),
        },
        "edit" => {
            let Some((id, rest)) = next_token(rest) else {
                return usage();
            };
            match CommandArgs::parse(rest) {
                Ok(args) if !args.is_empty() => ConsoleCommand::CommandEdit(id.to_string(), args),
                Ok(_) => usage(),
                Err(msg) => ConsoleCommand::Unknown(msg),
            }
        }
        "delete" | "rm" => match next_token(rest) {
            Some((id, "")) => ConsoleCommand::CommandDelete(id.to_string()),
            _ => usage(),
        },
        "usage" => match next_token(rest) {
            Some((id, "")) => ConsoleCommand::CommandUsage(id.to_string()),
            _ => usage(),
        },
        "import" if !rest.trim().is_empty() => ConsoleCommand::CommandImport(PathBuf::from(rest.trim())),
        _ => usage(),
    }
}

impl ConsoleCommand {
    pub fn parse(line: &str) -> Option<Self> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }
        let (cmd, rest) = trimmed.split_once(char::is_whitespace).unwrap_or((trimmed, ""));
        let rest = rest.trim();

        let parsed = match (cmd.to_lowercase().as_str(), rest) {
            ("help", _) => ConsoleCommand::Help,
            ("send", "") => ConsoleCommand::Unknown("usage: send <text>".into()),
            ("send", text) => ConsoleCommand::Send(text.to_string()),
            ("reconnect", _) => ConsoleCommand::Reconnect,
            ("status", _) => ConsoleCommand::Status,
            ("chat", "connect") => ConsoleCommand::ChatConnect,
            ("chat", "disconnect") => ConsoleCommand::ChatDisconnect,
            ("chat", _) => ConsoleCommand::Unknown("usage: chat <connect|disconnect>".into()),
            ("history", _) => ConsoleCommand::History,
            ("commands", _) => ConsoleCommand::Commands,
            ("command", rest) => parse_command_verb(rest),
            ("quit" | "exit", _) => ConsoleCommand::Quit,
            (other, _) => ConsoleCommand::Unknown(format!("unknown command '{}', try 'help'", other)),
        };
        Some(parsed)
    }
}

/// Reads stdin until EOF or `quit`. `quit` shuts the event bus down, which
/// stops the server.
pub fn spawn_console(service: Arc<BridgeService>) -> JoinHandle<()> {
    tokio::spawn(async move {
        println!("Operator console ready. Type 'help' for commands.");
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    error!("(Console) error reading stdin => {:?}", e);
                    break;
                }
            };
            let Some(cmd) = ConsoleCommand::parse(&line) else {
                continue;
            };
            if cmd == ConsoleCommand::Quit {
                info!("(Console) quit requested");
                service.event_bus().shutdown();
                break;
            }
            execute(&service, cmd).await;
        }
    })
}

async fn execute(service: &BridgeService, cmd: ConsoleCommand) {
    match cmd {
        ConsoleCommand::Help => {
            println!("Commands:");
            println!("  send <text>       - write a raw line to the device");
            println!("  reconnect         - drop and rebuild the device connection");
            println!("  status            - show device and chat status");
            println!("  chat connect      - connect to Twitch chat");
            println!("  chat disconnect   - disconnect from Twitch chat");
            println!("  history           - recent custom commands");
            println!("  commands          - list custom commands");
            println!("  command add [opts] <trigger> <output>");
            println!("                    - create a custom command");
            println!("  command edit <id> [opts] [<trigger> [<output>]]");
            println!("                    - change a custom command");
            println!("  command delete <id>");
            println!("  command usage <id> - recent uses of a custom command");
            println!("  command import <file>");
            println!("                    - replace all custom commands with a JSON file");
            println!("    opts: cooldown=<secs> perms=<everyone|subscribers|moderators|broadcaster> enabled=<true|false>");
            println!("  quit              - shut down");
        }
        ConsoleCommand::Send(text) => match service.send_raw(&text).await {
            Ok(outcome) => println!("sent ({:?})", outcome),
            Err(e) => println!("not sent: {}", e),
        },
        ConsoleCommand::Reconnect => {
            service.request_reconnect();
            println!("reconnecting");
        }
        ConsoleCommand::Status => {
            let link = service.link_status();
            let chat = service.chat_status();
            println!(
                "device: {:?} {}:{}{}",
                link.state,
                link.remote_host.as_deref().unwrap_or("-"),
                link.remote_port.map(|p| p.to_string()).unwrap_or_else(|| "-".into()),
                link.last_error
                    .as_ref()
                    .map(|e| format!(" (last error: {})", e))
                    .unwrap_or_default()
            );
            println!(
                "chat:   {:?} as {} in {:?}, prefix '{}', {} custom commands, {} history entries",
                chat.connection,
                chat.username,
                chat.channels,
                chat.command_prefix,
                chat.custom_command_count,
                chat.history_count
            );
            if !chat.allowed_users.is_empty() {
                println!("        allowed users: {}", chat.allowed_users.join(", "));
            }
        }
        ConsoleCommand::ChatConnect => match service.connect_chat().await {
            Ok(()) => println!("chat connected"),
            Err(e) => println!("chat connect failed: {}", e),
        },
        ConsoleCommand::ChatDisconnect => match service.disconnect_chat().await {
            Ok(()) => println!("chat disconnected"),
            Err(e) => println!("chat disconnect failed: {}", e),
        },
        ConsoleCommand::History => {
            let history = service.history();
            if history.is_empty() {
                println!("no commands yet");
            }
            for h in history {
                println!(
                    "  {} {} {} {}",
                    h.timestamp.format("%H:%M:%S"),
                    h.channel,
                    h.username,
                    h.command
                );
            }
        }
        ConsoleCommand::Commands => {
            for c in service.commands() {
                println!(
                    "  [{}] !{:<12} -> {:<20} cooldown={}s perms={} enabled={} uses={}",
                    c.id, c.trigger, c.output, c.cooldown, c.permissions, c.enabled, c.uses
                );
            }
        }
        ConsoleCommand::CommandAdd(args) => match service.create_command(args.into_new_command()).await {
            Ok(c) => println!("created !{} [{}]", c.trigger, c.id),
            Err(e) => println!("not created: {}", e),
        },
        ConsoleCommand::CommandEdit(id, args) => match edit_command(service, &id, args).await {
            Ok(c) => println!("updated !{} [{}]", c.trigger, c.id),
            Err(e) => println!("not updated: {}", e),
        },
        ConsoleCommand::CommandDelete(id) => match service.delete_command(&id).await {
            Ok(c) => println!("deleted !{} [{}]", c.trigger, c.id),
            Err(e) => println!("not deleted: {}", e),
        },
        ConsoleCommand::CommandUsage(id) => match service.command_usage(&id).await {
            Ok(usage) if usage.is_empty() => println!("no recorded uses"),
            Ok(usage) => {
                for u in usage {
                    println!("  {} {} {}", u.timestamp.format("%Y-%m-%d %H:%M:%S"), u.username, u.output);
                }
            }
            Err(e) => println!("{}", e),
        },
        ConsoleCommand::CommandImport(path) => match import_commands(service, &path).await {
            Ok(version) => println!("imported {} (table v{})", path.display(), version),
            Err(e) => println!("not imported: {}", e),
        },
        ConsoleCommand::Unknown(msg) => println!("{}", msg),
        ConsoleCommand::Quit => {}
    }
}

async fn edit_command(service: &BridgeService, id: &str, args: CommandArgs) -> Result<CommandDefinition, Error> {
    let existing = service.get_command(id).await?;
    service.update_command(id, args.merge_into(&existing)).await
}

async fn import_commands(service: &BridgeService, path: &std::path::Path) -> Result<u64, Error> {
    let raw = tokio::fs::read_to_string(path).await?;
    let commands: Vec<CommandDefinition> = serde_json::from_str(&raw)?;
    service.replace_commands(commands).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(ConsoleCommand::parse("   "), None);
        assert_eq!(
            ConsoleCommand::parse("send  STAGE. "),
            Some(ConsoleCommand::Send("STAGE.".into()))
        );
        assert_eq!(ConsoleCommand::parse("RECONNECT"), Some(ConsoleCommand::Reconnect));
        assert_eq!(ConsoleCommand::parse("chat connect"), Some(ConsoleCommand::ChatConnect));
        assert_eq!(
            ConsoleCommand::parse("chat disconnect"),
            Some(ConsoleCommand::ChatDisconnect)
        );
        assert_eq!(ConsoleCommand::parse("quit"), Some(ConsoleCommand::Quit));
        assert_eq!(ConsoleCommand::parse("history"), Some(ConsoleCommand::History));
    }

    #[test]
    fn test_parse_usage_errors() {
        assert!(matches!(ConsoleCommand::parse("send"), Some(ConsoleCommand::Unknown(_))));
        assert!(matches!(ConsoleCommand::parse("chat"), Some(ConsoleCommand::Unknown(_))));
        assert!(matches!(ConsoleCommand::parse("launch"), Some(ConsoleCommand::Unknown(_))));
        assert!(matches!(ConsoleCommand::parse("command"), Some(ConsoleCommand::Unknown(_))));
        assert!(matches!(ConsoleCommand::parse("command add ping"), Some(ConsoleCommand::Unknown(_))));
        assert!(matches!(ConsoleCommand::parse("command edit 17"), Some(ConsoleCommand::Unknown(_))));
        assert!(matches!(ConsoleCommand::parse("command delete"), Some(ConsoleCommand::Unknown(_))));
        assert!(matches!(ConsoleCommand::parse("command import"), Some(ConsoleCommand::Unknown(_))));
        assert!(matches!(
            ConsoleCommand::parse("command add perms=admins ping PONG"),
            Some(ConsoleCommand::Unknown(msg)) if msg.contains("admins")
        ));
        assert!(matches!(
            ConsoleCommand::parse("command add cooldown=soon ping PONG"),
            Some(ConsoleCommand::Unknown(_))
        ));
    }

    #[test]
    fn test_parse_command_add_keeps_output_verbatim() {
        let parsed = ConsoleCommand::parse(r#"command add cooldown=30 perms=Moderators stage PRINT "GO  NOW"."#);
        assert_eq!(
            parsed,
            Some(ConsoleCommand::CommandAdd(CommandArgs {
                trigger: Some("stage".into()),
                output: Some(r#"PRINT "GO  NOW"."#.into()),
                cooldown: Some(30),
                permissions: Some(PermissionTier::Moderators),
                enabled: None,
            }))
        );
    }

    #[test]
    fn test_parse_command_edit_delete_usage_import() {
        assert_eq!(
            ConsoleCommand::parse("command edit 17 enabled=false"),
            Some(ConsoleCommand::CommandEdit(
                "17".into(),
                CommandArgs {
                    enabled: Some(false),
                    ..Default::default()
                }
            ))
        );
        assert_eq!(
            ConsoleCommand::parse("command delete 17"),
            Some(ConsoleCommand::CommandDelete("17".into()))
        );
        assert_eq!(
            ConsoleCommand::parse("command usage 17"),
            Some(ConsoleCommand::CommandUsage("17".into()))
        );
        assert_eq!(
            ConsoleCommand::parse("command import backup/commands.json"),
            Some(ConsoleCommand::CommandImport(PathBuf::from("backup/commands.json")))
        );
    }

    #[test]
    fn test_edit_keeps_fields_left_out() {
        let existing = CommandDefinition {
            id: "17".into(),
            trigger: "stage".into(),
            output: "STAGE.".into(),
            description: "next stage".into(),
            cooldown: 10,
            enabled: true,
            permissions: PermissionTier::Everyone,
            uses: 3,
            usage: vec![],
            created_at: None,
            updated_at: None,
        };
        let args = CommandArgs {
            cooldown: Some(0),
            ..Default::default()
        };
        let update = args.merge_into(&existing);
        assert_eq!(update.trigger, "stage");
        assert_eq!(update.output, "STAGE.");
        assert_eq!(update.cooldown, Some(0));
        assert_eq!(update.permissions, None);
    }
}
