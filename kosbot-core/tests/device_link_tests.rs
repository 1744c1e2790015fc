// File: kosbot-core/tests/device_link_tests.rs

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout};

use kosbot_common::models::config::DeviceConfig;
use kosbot_common::models::link::{LinkState, LinkStatus, WriteOutcome};
use kosbot_core::device::link::HANDSHAKE_LINE;
use kosbot_core::{DeviceLink, Error};

const WAIT: Duration = Duration::from_secs(3);

async fn listener() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

fn config(port: u16, handshake_ms: u64, reconnect_ms: u64) -> DeviceConfig {
    DeviceConfig {
        host: "127.0.0.1".into(),
        port,
        handshake_delay_ms: handshake_ms,
        reconnect_delay_ms: reconnect_ms,
        ..Default::default()
    }
}

async fn accept(listener: &TcpListener) -> TcpStream {
    let (stream, _) = timeout(WAIT, listener.accept())
        .await
        .expect("link should connect")
        .unwrap();
    stream
}

async fn wait_for(link: &DeviceLink, pred: impl FnMut(&LinkStatus) -> bool) {
    let mut rx = link.subscribe();
    timeout(WAIT, rx.wait_for(pred))
        .await
        .expect("status change in time")
        .expect("link task alive");
}

async fn read_line(stream: &mut TcpStream) -> String {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    timeout(WAIT, reader.read_line(&mut line))
        .await
        .expect("line in time")
        .unwrap();
    line
}

async fn assert_eof(stream: &mut TcpStream) {
    let mut buf = [0u8; 64];
    let n = timeout(WAIT, stream.read(&mut buf))
        .await
        .expect("old socket should be closed")
        .unwrap_or(0);
    assert_eq!(n, 0, "old socket should observe EOF");
}

#[tokio::test]
async fn test_handshake_sent_after_delay() {
    let (listener, port) = listener().await;
    let (link, _task) = DeviceLink::spawn(config(port, 100, 60_000));

    let mut device = accept(&listener).await;
    assert_eq!(read_line(&mut device).await, HANDSHAKE_LINE);
    assert_eq!(HANDSHAKE_LINE, "HANDSHAKE\n");

    let status = link.status();
    assert_eq!(status.state, LinkState::Connected);
    assert_eq!(status.remote_port, Some(port));
    link.shutdown();
}

#[tokio::test]
async fn test_write_while_disconnected_is_rejected() {
    let (listener, port) = listener().await;
    drop(listener);
    let (link, _task) = DeviceLink::spawn(config(port, 100, 60_000));

    wait_for(&link, |s| s.state == LinkState::Disconnected && s.last_error.is_some()).await;
    match link.write("PONG").await {
        Err(Error::LinkUnavailable) => {}
        other => panic!("expected LinkUnavailable, got {:?}", other),
    }
    link.shutdown();
}

#[tokio::test]
async fn test_write_reaches_device_with_newline() {
    let (listener, port) = listener().await;
    let (link, _task) = DeviceLink::spawn(config(port, 60_000, 60_000));

    let mut device = accept(&listener).await;
    wait_for(&link, |s| s.connected).await;

    let outcome = link.write("PONG").await.unwrap();
    assert_eq!(outcome, WriteOutcome::Flushed);
    assert_eq!(read_line(&mut device).await, "PONG\n");
    link.shutdown();
}

#[tokio::test]
async fn test_manual_reconnect_keeps_a_single_socket() {
    let (listener, port) = listener().await;
    let (link, _task) = DeviceLink::spawn(config(port, 60_000, 60_000));

    let mut first = accept(&listener).await;
    wait_for(&link, |s| s.connected).await;

    link.request_reconnect();
    let mut second = accept(&listener).await;
    assert_eof(&mut first).await;

    // no further connection attempts pile up
    assert!(timeout(Duration::from_millis(300), listener.accept()).await.is_err());

    wait_for(&link, |s| s.connected).await;
    link.write("STAGE.").await.unwrap();
    assert_eq!(read_line(&mut second).await, "STAGE.\n");
    link.shutdown();
}

#[tokio::test]
async fn test_detach_notice_rebuilds_immediately() {
    let (listener, port) = listener().await;
    // the automatic path would take five seconds
    let (link, _task) = DeviceLink::spawn(config(port, 60_000, 5_000));

    let mut first = accept(&listener).await;
    wait_for(&link, |s| s.connected).await;

    first
        .write_all(b"Detaching from CPU: 1 Space Craft\r\n")
        .await
        .unwrap();

    let second = timeout(Duration::from_secs(1), listener.accept()).await;
    assert!(second.is_ok(), "detach should reconnect right away");
    assert_eof(&mut first).await;
    link.shutdown();
}

#[tokio::test]
async fn test_detach_notice_split_across_reads() {
    let (listener, port) = listener().await;
    let (link, _task) = DeviceLink::spawn(config(port, 60_000, 5_000));

    let mut first = accept(&listener).await;
    wait_for(&link, |s| s.connected).await;

    first.write_all(b"Detaching from CPU:").await.unwrap();
    first.flush().await.unwrap();
    sleep(Duration::from_millis(100)).await;
    first.write_all(b" 1 Space Craft\r\n").await.unwrap();

    let second = timeout(Duration::from_secs(1), listener.accept()).await;
    assert!(second.is_ok(), "split detach notice should still reconnect");
    link.shutdown();
}

#[tokio::test]
async fn test_unrelated_output_keeps_connection() {
    let (listener, port) = listener().await;
    let (link, _task) = DeviceLink::spawn(config(port, 60_000, 5_000));

    let mut first = accept(&listener).await;
    wait_for(&link, |s| s.connected).await;

    first.write_all(b"Welcome to the terminal, CPU: 1\r\n").await.unwrap();
    assert!(timeout(Duration::from_millis(300), listener.accept()).await.is_err());
    assert!(link.status().connected);
    link.shutdown();
}

#[tokio::test]
async fn test_close_schedules_reconnect() {
    let (listener, port) = listener().await;
    let (link, _task) = DeviceLink::spawn(config(port, 60_000, 200));

    let first = accept(&listener).await;
    wait_for(&link, |s| s.connected).await;
    drop(first);

    wait_for(&link, |s| !s.connected).await;
    let _second = accept(&listener).await;
    wait_for(&link, |s| s.connected).await;
    link.shutdown();
}

#[tokio::test]
async fn test_manual_reconnect_supersedes_pending_retry() {
    let (listener, port) = listener().await;
    let (link, _task) = DeviceLink::spawn(config(port, 60_000, 300));

    let first = accept(&listener).await;
    wait_for(&link, |s| s.connected).await;
    drop(first);

    // an automatic retry is now pending
    wait_for(&link, |s| !s.connected).await;
    link.request_reconnect();
    let _second = accept(&listener).await;
    wait_for(&link, |s| s.connected).await;

    let stray = timeout(Duration::from_millis(800), listener.accept()).await;
    assert!(stray.is_err(), "stale retry opened another socket");
    assert!(link.status().connected);
    link.shutdown();
}

#[tokio::test]
async fn test_idle_timeout_drops_silent_connection() {
    let (listener, port) = listener().await;
    let mut cfg = config(port, 60_000, 200);
    cfg.idle_timeout_ms = Some(300);
    let (link, _task) = DeviceLink::spawn(cfg);

    let mut first = accept(&listener).await;
    wait_for(&link, |s| s.connected).await;

    assert_eof(&mut first).await;
    let mut second = accept(&listener).await;
    wait_for(&link, |s| s.connected).await;

    // output from the device keeps the connection alive
    for _ in 0..4 {
        sleep(Duration::from_millis(150)).await;
        second.write_all(b"Program ended.\r\n").await.unwrap();
    }
    let stray = timeout(Duration::from_millis(100), listener.accept()).await;
    assert!(stray.is_err());
    assert!(link.status().connected);
    link.shutdown();
}
