// ================================================================
// File: kosbot-common/src/error.rs
// ================================================================

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// No connected device socket. Never fatal, the caller may retry later.
    #[error("Device link unavailable")]
    LinkUnavailable,

    /// Write-time I/O failure on the device socket. Recovery is left to the
    /// close-driven reconnect path.
    #[error("Device write failed: {0}")]
    TransportWrite(String),

    /// Connect/auth failure on the chat platform.
    #[error("Chat transport error: {0}")]
    ChatTransport(String),

    #[error("Not found error: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_missing() -> Result<String, Error> {
        Ok(std::fs::read_to_string("/definitely/not/here/kosbot.json")?)
    }

    #[test]
    fn test_question_mark_conversions() {
        assert!(matches!(read_missing(), Err(Error::Io(_))));

        let parsed: Result<u16, Error> = serde_json::from_str::<u16>("\"x\"").map_err(Error::from);
        assert!(matches!(parsed, Err(Error::Json(_))));

        assert_eq!(Error::LinkUnavailable.to_string(), "Device link unavailable");
    }
}
