//! src/eventbus/mod.rs
//!
//! In-process event bus with guaranteed delivery to every subscriber via
//! bounded MPSC queues. The dispatcher publishes usage events here; the
//! command repository side subscribes to persist them.

use std::sync::Arc;

use tokio::sync::{mpsc, watch, Mutex};

use kosbot_common::models::command::UsageEvent;

/// Events the bridge broadcasts to the rest of the process.
#[derive(Debug, Clone)]
pub enum BridgeEvent {
    /// A custom command was written to the device.
    CommandUsed(UsageEvent),
}

impl BridgeEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            BridgeEvent::CommandUsed(_) => "command.used",
        }
    }
}

/// Each subscriber gets its own `mpsc::Sender<BridgeEvent>`.
///
/// - If a subscriber's buffer fills, `publish` waits for space (backpressure).
/// - A subscriber that dropped its `Receiver` is skipped.
#[derive(Clone)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<mpsc::Sender<BridgeEvent>>>>,
    shutdown_tx: watch::Sender<bool>,
    pub shutdown_rx: watch::Receiver<bool>,
}

const DEFAULT_BUFFER_SIZE: usize = 1000;

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            subscribers: Arc::new(Mutex::new(vec![])),
            shutdown_tx: tx,
            shutdown_rx: rx,
        }
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    /// Returns a receiver on which events will be delivered.
    pub async fn subscribe(&self, buffer_size: Option<usize>) -> mpsc::Receiver<BridgeEvent> {
        let size = buffer_size.unwrap_or(DEFAULT_BUFFER_SIZE);
        let (tx, rx) = mpsc::channel(size);
        let mut subs = self.subscribers.lock().await;
        subs.push(tx);
        rx
    }

    /// Publish an event to all live subscribers. Closed ones are pruned.
    pub async fn publish(&self, event: BridgeEvent) {
        let senders = {
            let mut subs = self.subscribers.lock().await;
            subs.retain(|s| !s.is_closed());
            subs.clone()
        };
        for s in senders {
            let _ = s.send(event.clone()).await;
        }
    }

    pub async fn publish_usage(&self, usage: UsageEvent) {
        self.publish(BridgeEvent::CommandUsed(usage)).await;
    }
}
