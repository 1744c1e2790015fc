// File: src/device/mod.rs

use async_trait::async_trait;
use kosbot_common::models::link::WriteOutcome;

use crate::Error;

pub mod link;

/// Anything that accepts device command lines. The dispatcher only needs this
/// much of the device link.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeviceSink: Send + Sync {
    /// Writes one line (a trailing newline is added when missing).
    async fn send_line(&self, text: &str) -> Result<WriteOutcome, Error>;
}

#[async_trait]
impl DeviceSink for link::DeviceLink {
    async fn send_line(&self, text: &str) -> Result<WriteOutcome, Error> {
        self.write(text).await
    }
}

/// Appends the line terminator the device protocol expects, if absent.
pub fn ensure_newline(text: &str) -> String {
    if text.ends_with('\n') {
        text.to_string()
    } else {
        format!("{}\n", text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_newline() {
        assert_eq!(ensure_newline("PONG"), "PONG\n");
        assert_eq!(ensure_newline("PONG\n"), "PONG\n");
        assert_eq!(ensure_newline(""), "\n");
    }
}
