use std::collections::HashMap;

use tokio::time::{Duration, Instant};

/// Last successful use of each command by each user.
#[derive(Debug, Default)]
pub struct CooldownTracker {
    last_use: HashMap<(String, String), Instant>,
}

impl CooldownTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// True while `username` used `command_id` less than `cooldown_secs` ago.
    /// A cooldown of 0 never blocks.
    pub fn on_cooldown(&self, command_id: &str, username: &str, cooldown_secs: u64) -> bool {
        self.remaining_at(command_id, username, cooldown_secs, Instant::now())
            .is_some()
    }

    /// Time left before the user may run the command again, if any.
    pub fn remaining_at(
        &self,
        command_id: &str,
        username: &str,
        cooldown_secs: u64,
        now: Instant,
    ) -> Option<Duration> {
        if cooldown_secs == 0 {
            return None;
        }
        let last = self.last_use.get(&key(command_id, username))?;
        let cooldown = Duration::from_secs(cooldown_secs);
        let elapsed = now.saturating_duration_since(*last);
        if elapsed < cooldown {
            Some(cooldown - elapsed)
        } else {
            None
        }
    }

    pub fn record_use(&mut self, command_id: &str, username: &str) {
        self.record_use_at(command_id, username, Instant::now());
    }

    pub fn record_use_at(&mut self, command_id: &str, username: &str, at: Instant) {
        self.last_use.insert(key(command_id, username), at);
    }

    /// Drops entries older than `max_age`; returns how many were removed.
    pub fn prune(&mut self, max_age: Duration) -> usize {
        let now = Instant::now();
        let before = self.last_use.len();
        self.last_use
            .retain(|_, last| now.saturating_duration_since(*last) < max_age);
        before - self.last_use.len()
    }

    pub fn len(&self) -> usize {
        self.last_use.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_use.is_empty()
    }
}

fn key(command_id: &str, username: &str) -> (String, String) {
    (command_id.to_string(), username.to_string())
}
