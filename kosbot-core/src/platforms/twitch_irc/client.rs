//! src/platforms/twitch_irc/client.rs

use std::io;

use tokio::io::{split, AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use tokio_native_tls::native_tls;
use tokio_native_tls::TlsConnector;
use tracing::{debug, error, info};

use kosbot_common::models::chat::{ChatMessageEvent, ChatRoles};

pub const TWITCH_IRC_HOST: &str = "irc.chat.twitch.tv";
pub const TWITCH_IRC_PORT: u16 = 6697;

/// Minimal representation of a parsed IRC message from Twitch.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedTwitchMsg {
    pub tags: Option<String>,
    pub prefix: Option<String>,
    pub command: String,
    pub params: Vec<String>,
    pub trailing: Option<String>,
}

impl ParsedTwitchMsg {
    pub fn parse_irc_line(line: &str) -> Self {
        let mut rest = line.trim();
        let mut msg = Self {
            tags: None,
            prefix: None,
            command: String::new(),
            params: Vec::new(),
            trailing: None,
        };

        if rest.starts_with('@') {
            match rest.split_once(' ') {
                Some((tags, tail)) => {
                    msg.tags = Some(tags.to_string());
                    rest = tail;
                }
                None => {
                    msg.tags = Some(rest.to_string());
                    return msg;
                }
            }
        }

        if let Some(stripped) = rest.strip_prefix(':') {
            match stripped.split_once(' ') {
                Some((prefix, tail)) => {
                    msg.prefix = Some(prefix.to_string());
                    rest = tail;
                }
                None => {
                    msg.prefix = Some(stripped.to_string());
                    return msg;
                }
            }
        }

        let (command, tail) = rest.split_once(' ').unwrap_or((rest, ""));
        msg.command = command.to_uppercase();

        let params_part = if let Some(trailing) = tail.strip_prefix(':') {
            msg.trailing = Some(trailing.to_string());
            ""
        } else if let Some((before, trailing)) = tail.split_once(" :") {
            msg.trailing = Some(trailing.to_string());
            before
        } else {
            tail
        };
        msg.params
            .extend(params_part.split_whitespace().map(|s| s.to_string()));
        msg
    }

    /// Login part of a `nick!user@host` prefix, lowercased.
    pub fn login(&self) -> Option<String> {
        let prefix = self.prefix.as_deref()?;
        let nick = prefix.split('!').next().unwrap_or(prefix);
        if nick.is_empty() || nick.contains('.') {
            // server prefixes such as tmi.twitch.tv
            return None;
        }
        Some(nick.to_lowercase())
    }

    pub fn tag(&self, key: &str) -> Option<String> {
        self.tags.as_deref().and_then(|t| extract_tag_value(t, key))
    }
}

/// Helper to extract `key=value` from a tag string like `@badge-info=;user-id=1234;...`
pub fn extract_tag_value(tag_str: &str, key: &str) -> Option<String> {
    tag_str
        .trim_start_matches('@')
        .split(';')
        .filter_map(|kv| kv.split_once('='))
        .find(|(left, _)| *left == key)
        .map(|(_, right)| right.to_string())
}

/// Role flags for the sender of a PRIVMSG. The broadcaster is the owner of
/// `channel`, either by badge or because the login equals the channel name.
pub fn roles_from_tags(tags: Option<&str>, channel: &str, login: &str) -> ChatRoles {
    let tag = |key: &str| tags.and_then(|t| extract_tag_value(t, key)).unwrap_or_default();
    let badges = tag("badges");
    let has_badge = |name: &str| {
        badges
            .split(',')
            .any(|b| b.split('/').next() == Some(name))
    };

    let broadcaster = has_badge("broadcaster")
        || channel.trim_start_matches('#').eq_ignore_ascii_case(login);
    ChatRoles {
        moderator: tag("mod") == "1" || has_badge("moderator"),
        subscriber: tag("subscriber") == "1" || has_badge("subscriber") || has_badge("founder"),
        broadcaster,
    }
}

/// Higher-level event from the IRC read loop.
#[derive(Debug, Clone)]
pub struct IrcIncomingEvent {
    pub command: String,
    pub channel: Option<String>,
    pub login: Option<String>,
    pub text: Option<String>,
    pub parsed: ParsedTwitchMsg,
    pub raw_line: String,
}

impl IrcIncomingEvent {
    pub fn from_parsed(parsed: ParsedTwitchMsg, raw_line: &str) -> Self {
        Self {
            command: parsed.command.clone(),
            channel: parsed.params.first().filter(|p| p.starts_with('#')).cloned(),
            login: parsed.login(),
            text: parsed.trailing.clone(),
            parsed,
            raw_line: raw_line.to_string(),
        }
    }

    /// Converts a PRIVMSG into the dispatcher's message type.
    pub fn to_chat_message(&self) -> Option<ChatMessageEvent> {
        if self.command != "PRIVMSG" {
            return None;
        }
        let channel = self.channel.clone()?;
        let login = self.login.clone()?;
        let text = self.text.clone()?;
        let roles = roles_from_tags(self.parsed.tags.as_deref(), &channel, &login);
        Some(ChatMessageEvent {
            channel,
            display_name: self.parsed.tag("display-name").filter(|d| !d.is_empty()),
            username: login,
            text,
            roles,
        })
    }

    /// Twitch reports bad credentials with a NOTICE instead of closing.
    pub fn is_auth_failure(&self) -> bool {
        if self.command != "NOTICE" {
            return false;
        }
        let text = self.text.as_deref().unwrap_or_default().to_lowercase();
        text.contains("authentication failed") || text.contains("improperly formatted auth")
    }
}

/// Low-level IRC client that connects to Twitch via TLS.
pub struct TwitchIrcClient {
    raw_outgoing: mpsc::UnboundedSender<String>,
    pub incoming: Option<mpsc::UnboundedReceiver<IrcIncomingEvent>>,
    read_task: JoinHandle<()>,
    write_task: JoinHandle<()>,
}

impl TwitchIrcClient {
    /// Connects with TLS, sends PASS/NICK/CAP and spawns the read/write tasks.
    pub async fn connect(host: &str, port: u16, username: &str, oauth_token: &str) -> io::Result<Self> {
        let tcp = TcpStream::connect((host, port))
            .await
            .map_err(|e| io::Error::other(format!("TCP connect error: {e}")))?;

        let native_connector = native_tls::TlsConnector::new()
            .map_err(|e| io::Error::other(format!("TLSConnector::new() => {e}")))?;
        let connector = TlsConnector::from(native_connector);
        let tls_stream = connector
            .connect(host, tcp)
            .await
            .map_err(|e| io::Error::other(format!("TLS connect() => {e}")))?;

        let (read_half, write_half) = split(tls_stream);
        let (tx_outgoing, rx_outgoing) = mpsc::unbounded_channel::<String>();
        let (tx_incoming, rx_incoming) = mpsc::unbounded_channel::<IrcIncomingEvent>();

        let write_task = tokio::spawn(Self::writer_loop(write_half, rx_outgoing));

        tx_outgoing.send(format!("PASS {}", oauth_token)).ok();
        tx_outgoing.send(format!("NICK {}", username)).ok();
        tx_outgoing
            .send("CAP REQ :twitch.tv/commands twitch.tv/tags".to_string())
            .ok();

        let read_task = tokio::spawn(Self::reader_loop(read_half, tx_incoming, tx_outgoing.clone()));

        Ok(Self {
            raw_outgoing: tx_outgoing,
            incoming: Some(rx_incoming),
            read_task,
            write_task,
        })
    }

    async fn reader_loop<R>(
        read_half: R,
        tx_incoming: mpsc::UnboundedSender<IrcIncomingEvent>,
        tx_outgoing: mpsc::UnboundedSender<String>,
    ) where
        R: tokio::io::AsyncRead + Unpin,
    {
        let mut reader = BufReader::new(read_half);
        let mut line_buffer = String::new();

        loop {
            line_buffer.clear();
            match reader.read_line(&mut line_buffer).await {
                Ok(0) => {
                    info!("(TwitchIrcClient) read_loop => EOF");
                    break;
                }
                Ok(_) => {
                    let line = line_buffer.trim_end();
                    if line.is_empty() {
                        continue;
                    }
                    debug!("<< {}", line);

                    let parsed = ParsedTwitchMsg::parse_irc_line(line);
                    if parsed.command == "PING" {
                        let token = parsed.trailing.as_deref().unwrap_or("tmi.twitch.tv");
                        tx_outgoing.send(format!("PONG :{}", token)).ok();
                        continue;
                    }

                    if tx_incoming.send(IrcIncomingEvent::from_parsed(parsed, line)).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    error!("(TwitchIrcClient) read error => {:?}", e);
                    break;
                }
            }
        }

        info!("(TwitchIrcClient) reader_loop ended.");
    }

    async fn writer_loop<W>(write_half: W, mut rx_outgoing: mpsc::UnboundedReceiver<String>)
    where
        W: tokio::io::AsyncWrite + Unpin,
    {
        let mut writer = BufWriter::new(write_half);

        while let Some(line) = rx_outgoing.recv().await {
            if line.starts_with("PASS ") {
                debug!(">> PASS ****");
            } else {
                debug!(">> {}", line);
            }
            let framed = format!("{}\r\n", line);
            if let Err(e) = writer.write_all(framed.as_bytes()).await {
                error!("writer error => {:?}", e);
                break;
            }
            if let Err(e) = writer.flush().await {
                error!("writer flush error => {:?}", e);
                break;
            }
        }

        info!("(TwitchIrcClient) writer_loop ended.");
    }

    pub fn send_raw_line(&self, line: &str) {
        let _ = self.raw_outgoing.send(line.to_string());
    }

    pub fn join_channel(&self, channel: &str) {
        self.send_raw_line(&format!("JOIN {}", channel));
    }

    pub fn send_privmsg(&self, channel: &str, message: &str) {
        self.send_raw_line(&format!("PRIVMSG {} :{}", channel, message));
    }

    pub fn shutdown(self) {
        self.read_task.abort();
        self.write_task.abort();
    }
}
