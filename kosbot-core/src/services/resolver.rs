use kosbot_common::models::command::{CommandDefinition, CommandTable};

/// What a chat command maps to.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Custom(CommandDefinition),
    /// No enabled custom command; the text goes to the device verbatim.
    Passthrough,
}

/// Matches the first word of `text` (case-insensitive) against the enabled
/// triggers in table order. `text` is the command with the prefix removed.
pub fn resolve(table: &CommandTable, text: &str) -> Resolution {
    let trigger = match text.split_whitespace().next() {
        Some(word) => word.to_lowercase(),
        None => return Resolution::Passthrough,
    };
    match table.find_enabled(&trigger) {
        Some(cmd) => Resolution::Custom(cmd.clone()),
        None => Resolution::Passthrough,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kosbot_common::models::command::PermissionTier;

    fn cmd(id: &str, trigger: &str, enabled: bool) -> CommandDefinition {
        CommandDefinition {
            id: id.into(),
            trigger: trigger.into(),
            output: format!("OUT {}", id),
            description: String::new(),
            cooldown: 0,
            enabled,
            permissions: PermissionTier::Everyone,
            uses: 0,
            usage: vec![],
            created_at: None,
            updated_at: None,
        }
    }

    #[test]
    fn test_trigger_is_case_insensitive_and_first_word_only() {
        let table = CommandTable::new(1, vec![cmd("1", "ping", true)]);
        match resolve(&table, "PiNg with extra words") {
            Resolution::Custom(c) => assert_eq!(c.id, "1"),
            other => panic!("expected custom, got {:?}", other),
        }
        assert_eq!(resolve(&table, "pingpong"), Resolution::Passthrough);
    }

    #[test]
    fn test_disabled_command_falls_through_to_passthrough() {
        let table = CommandTable::new(1, vec![cmd("1", "ping", false)]);
        assert_eq!(resolve(&table, "ping"), Resolution::Passthrough);
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let table = CommandTable::new(3, vec![cmd("1", "stage", true), cmd("2", "abort", true)]);
        for text in ["stage now", "abort", "unknowncmd hello", ""] {
            assert_eq!(resolve(&table, text), resolve(&table, text));
        }
    }

    #[test]
    fn test_first_enabled_match_wins() {
        let table = CommandTable::new(
            1,
            vec![cmd("1", "go", false), cmd("2", "go", true), cmd("3", "go", true)],
        );
        match resolve(&table, "go") {
            Resolution::Custom(c) => assert_eq!(c.id, "2"),
            other => panic!("expected custom, got {:?}", other),
        }
    }
}
