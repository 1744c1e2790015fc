//! src/services/usage_recorder.rs
//!
//! Spawns a task that subscribes to the EventBus and persists every
//! `BridgeEvent::CommandUsed` through the command repository. Drains what is
//! left in its queue on shutdown.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{error, info};

use kosbot_common::traits::repository_traits::CommandRepository;

use crate::eventbus::{BridgeEvent, EventBus};

pub async fn spawn_usage_recorder(
    event_bus: &EventBus,
    repo: Arc<dyn CommandRepository>,
) -> JoinHandle<()> {
    let mut rx = event_bus.subscribe(Some(256)).await;
    let mut shutdown_rx = event_bus.shutdown_rx.clone();

    tokio::spawn(async move {
        info!("(UsageRecorder) started");
        loop {
            tokio::select! {
                biased;
                maybe_event = rx.recv() => match maybe_event {
                    Some(event) => record(&*repo, &event).await,
                    None => break,
                },
                Ok(_) = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        while let Ok(event) = rx.try_recv() {
            record(&*repo, &event).await;
        }
        info!("(UsageRecorder) exited");
    })
}

async fn record(repo: &dyn CommandRepository, event: &BridgeEvent) {
    let BridgeEvent::CommandUsed(usage) = event;
    if let Err(e) = repo.record_usage(usage).await {
        // the command may have been deleted since it ran
        error!("(UsageRecorder) could not record use of {} => {}", usage.command_id, e);
    }
}
