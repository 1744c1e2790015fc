// File: kosbot-common/src/traits/platform_traits.rs

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    Connected,
    Connecting,
    Disconnected,
    Error(String),
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }
}

/// Connection status shared between a platform and its observers. Readers
/// never wait on a connect or disconnect in progress.
pub type SharedStatus = Arc<Mutex<ConnectionStatus>>;

pub fn new_shared_status() -> SharedStatus {
    Arc::new(Mutex::new(ConnectionStatus::Disconnected))
}

pub fn read_status(slot: &Mutex<ConnectionStatus>) -> ConnectionStatus {
    match slot.lock() {
        Ok(s) => s.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

pub fn write_status(slot: &Mutex<ConnectionStatus>, status: ConnectionStatus) {
    match slot.lock() {
        Ok(mut s) => *s = status,
        Err(poisoned) => *poisoned.into_inner() = status,
    }
}

/// A chat platform as the bridge sees it: connect, disconnect, talk.
///
/// Inbound messages are not pulled through this trait. Implementations are
/// constructed with the sender half of the dispatcher's channel and push
/// every chat line into it while connected.
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    async fn connect(&mut self) -> Result<(), Error>;
    async fn disconnect(&mut self) -> Result<(), Error>;
    async fn send_message(&self, channel: &str, message: &str) -> Result<(), Error>;

    /// The slot this platform keeps its status in.
    fn status_handle(&self) -> SharedStatus;

    fn connection_status(&self) -> ConnectionStatus {
        read_status(&self.status_handle())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_status_survives_poisoning() {
        let slot = new_shared_status();
        assert_eq!(read_status(&slot), ConnectionStatus::Disconnected);

        let poisoner = slot.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.lock().unwrap();
            panic!("poison the status slot");
        })
        .join();

        write_status(&slot, ConnectionStatus::Connecting);
        assert_eq!(read_status(&slot), ConnectionStatus::Connecting);
    }
}
