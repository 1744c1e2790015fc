//! src/device/link.rs
//!
//! Supervised TCP connection to the device control endpoint.
//!
//! A single actor task owns the socket. `DeviceLink` handles talk to it over a
//! channel and read its status from a `watch`. Every connection attempt gets a
//! new generation number; connect results and timers carry the generation they
//! were created for and are ignored once a newer attempt exists.

use std::future::pending;
use std::io;
use std::net::SocketAddr;

use tokio::net::{lookup_host, TcpSocket, TcpStream};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, Duration, Instant};
use tracing::{debug, error, info, warn};

use kosbot_common::models::config::DeviceConfig;
use kosbot_common::models::link::{LinkState, LinkStatus, WriteOutcome};

use crate::Error;
use super::ensure_newline;

/// Sent once per connection, after the handshake delay.
pub const HANDSHAKE_LINE: &str = "HANDSHAKE\n";

/// The device prints all of these when it drops the terminal session on its
/// side; the TCP close that should follow does not always arrive promptly.
const DETACH_MARKERS: [&str; 3] = ["Detaching from", "CPU:", "Space Craft"];

/// Characters of previous output kept for matching markers split across reads.
const MARKER_CARRY_CHARS: usize = 128;

const READ_BUFFER_SIZE: usize = 4096;

/// True if a chunk of device output announces a remote-side detach.
pub fn is_detach_notice(data: &str) -> bool {
    DETACH_MARKERS.iter().all(|m| data.contains(m))
}

enum LinkCommand {
    Write {
        text: String,
        reply: oneshot::Sender<Result<WriteOutcome, Error>>,
    },
    Reconnect,
    Shutdown,
}

enum LinkEvent {
    Connected { generation: u64, stream: TcpStream },
    ConnectFailed { generation: u64, error: String },
    HandshakeDue { generation: u64 },
    ReconnectDue { generation: u64 },
}

/// Cloneable handle to the device link actor.
#[derive(Clone)]
pub struct DeviceLink {
    commands: mpsc::UnboundedSender<LinkCommand>,
    status: watch::Receiver<LinkStatus>,
}

impl DeviceLink {
    /// Spawns the link actor and starts connecting right away.
    pub fn spawn(config: DeviceConfig) -> (Self, JoinHandle<()>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (evt_tx, evt_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(LinkStatus::default());

        let actor = LinkActor {
            config,
            generation: 0,
            state: LinkState::Disconnected,
            conn: None,
            connect_task: None,
            events_tx: evt_tx,
            status_tx,
            last_error: None,
        };
        let handle = tokio::spawn(actor.run(cmd_rx, evt_rx));

        (
            Self {
                commands: cmd_tx,
                status: status_rx,
            },
            handle,
        )
    }

    /// Writes one line to the device. Fails with `LinkUnavailable` unless the
    /// link is connected.
    pub async fn write(&self, text: &str) -> Result<WriteOutcome, Error> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(LinkCommand::Write {
                text: text.to_string(),
                reply: reply_tx,
            })
            .map_err(|_| Error::LinkUnavailable)?;
        reply_rx.await.map_err(|_| Error::LinkUnavailable)?
    }

    /// Drops the current socket (if any) and reconnects immediately,
    /// superseding any pending automatic retry.
    pub fn request_reconnect(&self) {
        if self.commands.send(LinkCommand::Reconnect).is_err() {
            warn!("(DeviceLink) reconnect requested but the link task is gone");
        }
    }

    pub fn shutdown(&self) {
        let _ = self.commands.send(LinkCommand::Shutdown);
    }

    pub fn status(&self) -> LinkStatus {
        self.status.borrow().clone()
    }

    /// Receiver that observes every status change.
    pub fn subscribe(&self) -> watch::Receiver<LinkStatus> {
        self.status.clone()
    }
}

struct Connection {
    stream: TcpStream,
    remote: SocketAddr,
    /// Bytes accepted by `write` that the socket has not taken yet.
    backlog: Vec<u8>,
    carry: String,
    last_activity: Instant,
}

struct LinkActor {
    config: DeviceConfig,
    generation: u64,
    state: LinkState,
    conn: Option<Connection>,
    connect_task: Option<JoinHandle<()>>,
    events_tx: mpsc::UnboundedSender<LinkEvent>,
    status_tx: watch::Sender<LinkStatus>,
    last_error: Option<String>,
}

enum ReadResult {
    Data(String),
    Eof,
    Failed(io::Error),
    Nothing,
}

impl LinkActor {
    async fn run(
        mut self,
        mut commands_rx: mpsc::UnboundedReceiver<LinkCommand>,
        mut events_rx: mpsc::UnboundedReceiver<LinkEvent>,
    ) {
        self.connect();

        loop {
            let idle = self.config.idle_timeout();
            tokio::select! {
                cmd = commands_rx.recv() => match cmd {
                    Some(LinkCommand::Write { text, reply }) => {
                        let _ = reply.send(self.write(&text));
                    }
                    Some(LinkCommand::Reconnect) => {
                        info!("(DeviceLink) manual reconnect requested");
                        self.connect();
                    }
                    Some(LinkCommand::Shutdown) | None => break,
                },
                Some(evt) = events_rx.recv() => self.handle_event(evt),
                res = readable(self.conn.as_ref()) => match res {
                    Ok(()) => self.read_available(),
                    Err(e) => {
                        self.record_error(format!("read readiness failed => {}", e));
                        self.handle_close(true);
                    }
                },
                res = writable(self.conn.as_ref()), if self.has_backlog() => match res {
                    Ok(()) => self.drain_backlog(),
                    Err(e) => {
                        self.record_error(format!("write readiness failed => {}", e));
                        self.destroy_current();
                        self.handle_close(true);
                    }
                },
                _ = idle_deadline(self.conn.as_ref(), idle) => {
                    warn!("(DeviceLink) no data for {:?}, dropping connection", idle.unwrap_or_default());
                    self.destroy_current();
                    self.handle_close(false);
                }
            }
        }

        self.destroy_current();
        self.set_state(LinkState::Disconnected);
        info!("(DeviceLink) link task ended.");
    }

    /// Destroys any current socket, then starts a fresh connection attempt.
    fn connect(&mut self) {
        self.destroy_current();
        self.generation += 1;
        let generation = self.generation;
        self.set_state(LinkState::Connecting);

        let host = self.config.host.clone();
        let port = self.config.port;
        let keepalive = self.config.keepalive;
        let connect_timeout = self.config.connect_timeout();
        let events = self.events_tx.clone();

        info!("(DeviceLink) connecting to {}:{} (attempt #{})", host, port, generation);
        self.connect_task = Some(tokio::spawn(async move {
            let evt = match tokio::time::timeout(connect_timeout, open_socket(&host, port, keepalive)).await {
                Ok(Ok(stream)) => LinkEvent::Connected { generation, stream },
                Ok(Err(e)) => LinkEvent::ConnectFailed {
                    generation,
                    error: e.to_string(),
                },
                Err(_) => LinkEvent::ConnectFailed {
                    generation,
                    error: format!("connect timed out after {:?}", connect_timeout),
                },
            };
            let _ = events.send(evt);
        }));
    }

    /// Drops the socket synchronously. Nothing from it is observed afterwards.
    fn destroy_current(&mut self) {
        if let Some(task) = self.connect_task.take() {
            task.abort();
        }
        if let Some(conn) = self.conn.take() {
            debug!("(DeviceLink) destroying socket to {}", conn.remote);
            drop(conn);
        }
    }

    fn handle_event(&mut self, evt: LinkEvent) {
        match evt {
            LinkEvent::Connected { generation, stream } => {
                if generation != self.generation {
                    debug!("(DeviceLink) dropping stale connection from attempt #{}", generation);
                    return;
                }
                self.connect_task = None;
                let remote = match stream.peer_addr() {
                    Ok(addr) => addr,
                    Err(e) => {
                        self.record_error(format!("peer_addr => {}", e));
                        self.handle_close(true);
                        return;
                    }
                };
                info!("(DeviceLink) connected to {}", remote);
                self.conn = Some(Connection {
                    stream,
                    remote,
                    backlog: Vec::new(),
                    carry: String::new(),
                    last_activity: Instant::now(),
                });
                self.set_state(LinkState::Connected);
                self.schedule(self.config.handshake_delay(), LinkEvent::HandshakeDue { generation });
            }
            LinkEvent::ConnectFailed { generation, error } => {
                if generation != self.generation {
                    return;
                }
                self.connect_task = None;
                self.record_error(format!("connect failed => {}", error));
                self.handle_close(true);
            }
            LinkEvent::HandshakeDue { generation } => {
                if generation != self.generation || !self.state.is_connected() {
                    return;
                }
                info!("(DeviceLink) sending initial handshake");
                if let Err(e) = self.write(HANDSHAKE_LINE) {
                    warn!("(DeviceLink) handshake write failed => {}", e);
                }
            }
            LinkEvent::ReconnectDue { generation } => {
                if generation != self.generation || self.state != LinkState::Disconnected {
                    return;
                }
                info!("(DeviceLink) attempting to reconnect");
                self.connect();
            }
        }
    }

    fn read_available(&mut self) {
        let result = match self.conn.as_ref() {
            Some(conn) => {
                let mut buf = [0u8; READ_BUFFER_SIZE];
                match conn.stream.try_read(&mut buf) {
                    Ok(0) => ReadResult::Eof,
                    Ok(n) => ReadResult::Data(String::from_utf8_lossy(&buf[..n]).into_owned()),
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => ReadResult::Nothing,
                    Err(e) => ReadResult::Failed(e),
                }
            }
            None => ReadResult::Nothing,
        };

        match result {
            ReadResult::Data(text) => self.handle_data(&text),
            ReadResult::Eof => {
                self.conn = None;
                self.handle_close(false);
            }
            ReadResult::Failed(e) => {
                self.record_error(format!("read error => {}", e));
                self.conn = None;
                self.handle_close(true);
            }
            ReadResult::Nothing => {}
        }
    }

    fn handle_data(&mut self, text: &str) {
        debug!("(DeviceLink) << {}", text.trim());
        let Some(conn) = self.conn.as_mut() else {
            return;
        };
        conn.last_activity = Instant::now();

        let window = format!("{}{}", conn.carry, text);
        if is_detach_notice(&window) {
            info!("(DeviceLink) device detached its terminal, rebuilding connection");
            self.connect();
            return;
        }
        conn.carry = tail_chars(&window, MARKER_CARRY_CHARS);
    }

    /// Socket is gone (EOF, read error, failed connect, timeout). The only
    /// place an automatic reconnect is scheduled.
    fn handle_close(&mut self, had_error: bool) {
        self.conn = None;
        if had_error {
            info!("(DeviceLink) connection closed due to error");
        } else {
            info!("(DeviceLink) connection closed");
        }
        self.set_state(LinkState::Disconnected);
        let delay = self.config.reconnect_delay();
        debug!("(DeviceLink) reconnecting in {:?}", delay);
        self.schedule(delay, LinkEvent::ReconnectDue { generation: self.generation });
    }

    fn write(&mut self, text: &str) -> Result<WriteOutcome, Error> {
        if !self.state.is_connected() {
            return Err(Error::LinkUnavailable);
        }
        let line = ensure_newline(text);
        let result = match self.conn.as_mut() {
            Some(conn) => write_or_queue(conn, line.as_bytes()),
            None => return Err(Error::LinkUnavailable),
        };

        match result {
            Ok(WriteOutcome::Flushed) => {
                debug!("(DeviceLink) >> {}", line.trim_end());
                Ok(WriteOutcome::Flushed)
            }
            Ok(WriteOutcome::Buffered) => {
                debug!("(DeviceLink) >> (buffered) {}", line.trim_end());
                self.set_state(LinkState::Draining);
                Ok(WriteOutcome::Buffered)
            }
            Err(e) => {
                error!("(DeviceLink) error writing to device => {}", e);
                self.record_error(format!("write error => {}", e));
                Err(Error::TransportWrite(e.to_string()))
            }
        }
    }

    fn has_backlog(&self) -> bool {
        self.conn.as_ref().is_some_and(|c| !c.backlog.is_empty())
    }

    fn drain_backlog(&mut self) {
        let result = match self.conn.as_mut() {
            Some(conn) => flush_backlog(conn),
            None => return,
        };
        match result {
            Ok(true) => {
                info!("(DeviceLink) buffer drained, queued writes delivered");
                self.set_state(LinkState::Connected);
            }
            Ok(false) => {}
            Err(e) => {
                // the queued bytes die with the socket
                error!("(DeviceLink) error draining write buffer => {}", e);
                self.record_error(format!("write error => {}", e));
                self.destroy_current();
                self.handle_close(true);
            }
        }
    }

    fn schedule(&self, delay: Duration, evt: LinkEvent) {
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            sleep(delay).await;
            let _ = events.send(evt);
        });
    }

    fn record_error(&mut self, msg: String) {
        warn!("(DeviceLink) {}", msg);
        self.last_error = Some(msg);
        self.publish_status();
    }

    fn set_state(&mut self, state: LinkState) {
        if self.state != state {
            debug!("(DeviceLink) {:?} => {:?}", self.state, state);
        }
        self.state = state;
        self.publish_status();
    }

    fn publish_status(&self) {
        let remote = self.conn.as_ref().map(|c| c.remote);
        self.status_tx.send_replace(LinkStatus {
            state: self.state,
            connected: self.state.is_connected(),
            remote_host: remote.map(|r| r.ip().to_string()),
            remote_port: remote.map(|r| r.port()),
            last_error: self.last_error.clone(),
        });
    }
}

/// Tries every resolved address until one connects.
async fn open_socket(host: &str, port: u16, keepalive: bool) -> io::Result<TcpStream> {
    let mut last_err = None;
    for addr in lookup_host((host, port)).await? {
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_keepalive(keepalive)?;
        match socket.connect(addr).await {
            Ok(stream) => {
                let _ = stream.set_nodelay(true);
                return Ok(stream);
            }
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, format!("no address for {}:{}", host, port))
    }))
}

/// Writes what the socket takes right now and queues the rest. Once a
/// backlog exists, new bytes go behind it so ordering is preserved.
fn write_or_queue(conn: &mut Connection, bytes: &[u8]) -> io::Result<WriteOutcome> {
    if !conn.backlog.is_empty() {
        conn.backlog.extend_from_slice(bytes);
        return Ok(WriteOutcome::Buffered);
    }

    let mut written = 0;
    while written < bytes.len() {
        match conn.stream.try_write(&bytes[written..]) {
            Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
            Ok(n) => written += n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) => return Err(e),
        }
    }

    if written == bytes.len() {
        Ok(WriteOutcome::Flushed)
    } else {
        conn.backlog.extend_from_slice(&bytes[written..]);
        Ok(WriteOutcome::Buffered)
    }
}

/// Returns `Ok(true)` once the backlog is empty.
fn flush_backlog(conn: &mut Connection) -> io::Result<bool> {
    while !conn.backlog.is_empty() {
        match conn.stream.try_write(&conn.backlog) {
            Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
            Ok(n) => {
                conn.backlog.drain(..n);
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}

async fn readable(conn: Option<&Connection>) -> io::Result<()> {
    match conn {
        Some(c) => c.stream.readable().await,
        None => pending().await,
    }
}

async fn writable(conn: Option<&Connection>) -> io::Result<()> {
    match conn {
        Some(c) => c.stream.writable().await,
        None => pending().await,
    }
}

async fn idle_deadline(conn: Option<&Connection>, idle: Option<Duration>) {
    match (conn, idle) {
        (Some(c), Some(idle)) => sleep_until(c.last_activity + idle).await,
        _ => pending().await,
    }
}

fn tail_chars(s: &str, max: usize) -> String {
    let start = s
        .char_indices()
        .rev()
        .nth(max.saturating_sub(1))
        .map(|(i, _)| i)
        .unwrap_or(0);
    s[start..].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn idle_actor() -> (LinkActor, watch::Receiver<LinkStatus>, mpsc::UnboundedReceiver<LinkEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(LinkStatus::default());
        let actor = LinkActor {
            config: DeviceConfig {
                reconnect_delay_ms: 50,
                ..Default::default()
            },
            generation: 1,
            state: LinkState::Disconnected,
            conn: None,
            connect_task: None,
            events_tx,
            status_tx,
            last_error: None,
        };
        (actor, status_rx, events_rx)
    }

    #[tokio::test]
    #[allow(deprecated)]
    async fn test_drain_failure_drops_socket_and_backlog() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let stream = TcpStream::connect(listener.local_addr().unwrap()).await.unwrap();
        let (peer, _) = listener.accept().await.unwrap();
        // zero linger turns the close into a reset
        peer.set_linger(Some(Duration::ZERO)).unwrap();
        drop(peer);
        sleep(Duration::from_millis(100)).await;

        let (mut actor, status, mut events) = idle_actor();
        let remote = stream.peer_addr().unwrap();
        actor.conn = Some(Connection {
            stream,
            remote,
            backlog: b"PRINT 1.\n".repeat(64),
            carry: String::new(),
            last_activity: Instant::now(),
        });
        actor.set_state(LinkState::Draining);

        actor.drain_backlog();

        assert!(actor.conn.is_none());
        assert!(!actor.has_backlog());
        assert_eq!(actor.state, LinkState::Disconnected);
        let last_error = status.borrow().last_error.clone().unwrap_or_default();
        assert!(last_error.contains("write error"), "{}", last_error);

        let next = tokio::time::timeout(Duration::from_secs(1), events.recv()).await.unwrap();
        assert!(matches!(next, Some(LinkEvent::ReconnectDue { generation: 1 })));
    }

    #[test]
    fn test_detach_notice_needs_every_marker() {
        assert!(is_detach_notice("Detaching from CPU: 1 Space Craft"));
        assert!(is_detach_notice("...\r\nDetaching from CPU: 2 (Space Craft)\r\n"));
        assert!(!is_detach_notice("Detaching from CPU: 1"));
        assert!(!is_detach_notice("CPU: 1 Space Craft"));
        assert!(!is_detach_notice(""));
    }

    #[test]
    fn test_tail_chars() {
        assert_eq!(tail_chars("abcdef", 3), "def");
        assert_eq!(tail_chars("ab", 3), "ab");
        assert_eq!(tail_chars("ääää", 2), "ää");
    }
}
