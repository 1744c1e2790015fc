//! src/platforms/twitch_irc/runtime.rs
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tracing::{debug, error, info, warn};

use kosbot_common::models::chat::ChatMessageEvent;
use kosbot_common::models::config::TwitchConfig;
use kosbot_common::traits::platform_traits::{
    new_shared_status, write_status, ChatPlatform, ConnectionStatus, SharedStatus,
};

use crate::Error;

use super::client::{IrcIncomingEvent, TwitchIrcClient, TWITCH_IRC_HOST, TWITCH_IRC_PORT};

const LOGIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Twitch chat over IRC. Every PRIVMSG in a joined channel is pushed to the
/// dispatcher's channel while connected.
pub struct TwitchIrcPlatform {
    username: String,
    oauth: String,
    channels: Vec<String>,
    host: String,
    port: u16,

    status: SharedStatus,
    client: Option<TwitchIrcClient>,
    read_loop_handle: Option<JoinHandle<()>>,
    messages_tx: mpsc::Sender<ChatMessageEvent>,
}

impl TwitchIrcPlatform {
    pub fn new(config: &TwitchConfig, messages_tx: mpsc::Sender<ChatMessageEvent>) -> Self {
        Self {
            username: config.username.trim().to_lowercase(),
            oauth: config.oauth.trim().to_string(),
            channels: config.irc_channels(),
            host: TWITCH_IRC_HOST.to_string(),
            port: TWITCH_IRC_PORT,
            status: new_shared_status(),
            client: None,
            read_loop_handle: None,
            messages_tx,
        }
    }

    /// Points the platform at a different IRC server.
    pub fn with_server(mut self, host: &str, port: u16) -> Self {
        self.host = host.to_string();
        self.port = port;
        self
    }

    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    fn set_status(&self, status: ConnectionStatus) {
        write_status(&self.status, status);
    }

    fn fail(&self, msg: String) -> Error {
        error!("(TwitchIrcPlatform) {}", msg);
        self.set_status(ConnectionStatus::Error(msg.clone()));
        Error::ChatTransport(msg)
    }

    fn token(&self) -> String {
        if self.oauth.starts_with("oauth:") {
            self.oauth.clone()
        } else {
            format!("oauth:{}", self.oauth)
        }
    }

    fn teardown(&mut self) {
        if let Some(cli) = self.client.take() {
            cli.shutdown();
        }
        if let Some(h) = self.read_loop_handle.take() {
            h.abort();
        }
    }
}

/// Waits for the server welcome (001) or an authentication NOTICE.
async fn await_login(incoming: &mut mpsc::UnboundedReceiver<IrcIncomingEvent>) -> Result<(), String> {
    while let Some(evt) = incoming.recv().await {
        if evt.command == "001" {
            return Ok(());
        }
        if evt.is_auth_failure() {
            return Err(format!(
                "login rejected => {}",
                evt.text.unwrap_or_default()
            ));
        }
        debug!("(TwitchIrcPlatform) pre-login line => {}", evt.raw_line);
    }
    Err("connection closed during login".into())
}

#[async_trait]
impl ChatPlatform for TwitchIrcPlatform {
    async fn connect(&mut self) -> Result<(), Error> {
        if self.client.is_some() && self.connection_status().is_connected() {
            info!("(TwitchIrcPlatform) connect => already connected");
            return Ok(());
        }
        self.teardown();

        if self.username.is_empty() || self.oauth.is_empty() {
            return Err(self.fail("Twitch username and oauth token are required".into()));
        }
        if self.channels.is_empty() {
            warn!("(TwitchIrcPlatform) no channels configured; connecting anyway");
        }

        self.set_status(ConnectionStatus::Connecting);
        info!("(TwitchIrcPlatform) connecting to {}:{} as {}", self.host, self.port, self.username);

        let mut client = match TwitchIrcClient::connect(&self.host, self.port, &self.username, &self.token()).await {
            Ok(c) => c,
            Err(e) => return Err(self.fail(format!("Error connecting to Twitch IRC => {}", e))),
        };
        let Some(mut incoming) = client.incoming.take() else {
            client.shutdown();
            return Err(self.fail("No incoming channel in TwitchIrcClient".into()));
        };

        let login = match timeout(LOGIN_TIMEOUT, await_login(&mut incoming)).await {
            Ok(result) => result,
            Err(_) => Err("timed out waiting for login".into()),
        };
        if let Err(msg) = login {
            client.shutdown();
            return Err(self.fail(msg));
        }

        for channel in &self.channels {
            client.join_channel(channel);
        }
        self.client = Some(client);
        self.set_status(ConnectionStatus::Connected);
        info!("(TwitchIrcPlatform) connected; joined {:?}", self.channels);

        let tx = self.messages_tx.clone();
        let status = self.status.clone();
        let handle = tokio::spawn(async move {
            while let Some(evt) = incoming.recv().await {
                if let Some(msg) = evt.to_chat_message() {
                    if tx.send(msg).await.is_err() {
                        warn!("(TwitchIrcPlatform) dispatcher channel closed");
                        break;
                    }
                } else if evt.command == "RECONNECT" {
                    warn!("(TwitchIrcPlatform) server requested a reconnect");
                } else {
                    debug!("(TwitchIrcPlatform) ignoring non-PRIVMSG => {:?}", evt.command);
                }
            }
            write_status(&status, ConnectionStatus::Disconnected);
            info!("(TwitchIrcPlatform) read loop ended.");
        });
        self.read_loop_handle = Some(handle);

        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), Error> {
        self.teardown();
        self.set_status(ConnectionStatus::Disconnected);
        info!("(TwitchIrcPlatform) disconnected");
        Ok(())
    }

    async fn send_message(&self, channel: &str, message: &str) -> Result<(), Error> {
        match &self.client {
            Some(cli) if self.connection_status().is_connected() => {
                cli.send_privmsg(channel, message);
                Ok(())
            }
            _ => Err(Error::ChatTransport("No active Twitch IRC connection".into())),
        }
    }

    fn status_handle(&self) -> SharedStatus {
        self.status.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(username: &str, oauth: &str) -> TwitchConfig {
        TwitchConfig {
            username: username.into(),
            oauth: oauth.into(),
            channels: vec!["Streamer".into()],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_missing_credentials_surface_as_status_error() {
        let (tx, _rx) = mpsc::channel(8);
        let mut platform = TwitchIrcPlatform::new(&config("", ""), tx);

        let err = platform.connect().await.unwrap_err();
        assert!(matches!(err, Error::ChatTransport(_)));
        assert!(matches!(platform.connection_status(), ConnectionStatus::Error(_)));
        assert_eq!(platform.channels(), ["#streamer".to_string()]);
    }

    #[tokio::test]
    async fn test_unreachable_server_is_a_transport_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let (tx, _rx) = mpsc::channel(8);
        let mut platform = TwitchIrcPlatform::new(&config("kosbot", "secret"), tx)
            .with_server("127.0.0.1", port);

        let err = platform.connect().await.unwrap_err();
        assert!(matches!(err, Error::ChatTransport(_)));
        assert!(!platform.connection_status().is_connected());
        assert!(platform.send_message("#streamer", "hi").await.is_err());
    }

    #[test]
    fn test_token_prefix() {
        let (tx, _rx) = mpsc::channel(8);
        let platform = TwitchIrcPlatform::new(&config("kosbot", "abc"), tx.clone());
        assert_eq!(platform.token(), "oauth:abc");
        let platform = TwitchIrcPlatform::new(&config("kosbot", "oauth:abc"), tx);
        assert_eq!(platform.token(), "oauth:abc");
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let (tx, _rx) = mpsc::channel(8);
        let mut platform = TwitchIrcPlatform::new(&config("kosbot", "abc"), tx);
        platform.disconnect().await.unwrap();
        platform.disconnect().await.unwrap();
        assert_eq!(platform.connection_status(), ConnectionStatus::Disconnected);
    }
}
