use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use kosbot_core::device::link::DeviceLink;
use kosbot_core::eventbus::EventBus;
use kosbot_core::platforms::twitch_irc::TwitchIrcPlatform;
use kosbot_core::repositories::JsonCommandRepository;
use kosbot_core::services::usage_recorder::spawn_usage_recorder;
use kosbot_core::services::{BridgeSettings, ChatBridge};
use kosbot_core::{BridgeService, Error};

mod config;
mod console;

const CHAT_QUEUE_SIZE: usize = 1000;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser, Debug, Clone)]
#[command(name = "kosbot")]
#[command(author, version, about = "kosbot - Twitch chat to kOS terminal bridge")]
struct Args {
    /// Bridge configuration file (created with defaults if missing)
    #[arg(long, default_value = "kosbot.json")]
    config: PathBuf,

    /// Custom command definitions (created empty if missing)
    #[arg(long, default_value = "commands.json")]
    commands: PathBuf,

    /// Run without the stdin operator console
    #[arg(long, default_value = "false")]
    headless: bool,
}

fn init_tracing() {
    let filter = EnvFilter::from_default_env()
        .add_directive("kosbot=info".parse().unwrap_or_default());
    let sub = fmt().with_env_filter(filter).finish();
    if let Err(e) = tracing::subscriber::set_global_default(sub) {
        eprintln!("Failed to set global subscriber: {e}");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();
    let args = Args::parse();
    info!(
        "kosbot starting. config={}, commands={}, headless={}",
        args.config.display(),
        args.commands.display(),
        args.headless
    );

    if let Err(e) = run_server(args).await {
        error!("Server error: {:?}", e);
        return Err(e.into());
    }
    info!("Main finished. Goodbye!");
    Ok(())
}

async fn run_server(args: Args) -> Result<(), Error> {
    // 1) Configuration and command storage
    let cfg = config::load_config(&args.config).await?;
    info!("Device endpoint {}:{}; twitch={:?}", cfg.device.host, cfg.device.port, cfg.twitch);
    let repo = Arc::new(JsonCommandRepository::load(&args.commands).await?);

    // 2) Event bus + usage persistence
    let event_bus = Arc::new(EventBus::new());
    let recorder = spawn_usage_recorder(&event_bus, repo.clone()).await;

    // 3) Device link
    let (link, link_task) = DeviceLink::spawn(cfg.device.clone());

    // 4) Chat dispatcher
    let (chat_tx, chat_rx) = mpsc::channel(CHAT_QUEUE_SIZE);
    let mut bridge = ChatBridge::new(
        BridgeSettings::from(&cfg.twitch),
        repo.subscribe_table(),
        Arc::new(link.clone()),
    );
    bridge.set_event_bus(event_bus.clone());
    let bridge = Arc::new(bridge);
    let dispatcher = tokio::spawn(bridge.clone().run(chat_rx, event_bus.shutdown_rx.clone()));

    // 5) Chat platform behind the service facade
    let platform = TwitchIrcPlatform::new(&cfg.twitch, chat_tx);
    let service = Arc::new(BridgeService::new(
        link.clone(),
        bridge,
        Box::new(platform),
        cfg.twitch.clone(),
        repo.clone(),
        event_bus.clone(),
    ));

    if cfg.twitch.enabled && cfg.twitch.auto_connect {
        if let Err(e) = service.connect_chat().await {
            warn!("Twitch auto-connect failed => {}", e);
        }
    } else if !cfg.twitch.enabled {
        info!("Twitch integration disabled in config");
    }

    if !args.headless {
        console::spawn_console(service.clone());
    }

    // 6) Ctrl-C signals shutdown
    let eb_clone = event_bus.clone();
    let _ctrlc_handle = tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {:?}", e);
            return;
        }
        info!("Ctrl-C detected; shutting down event bus...");
        eb_clone.shutdown();
    });

    // 7) Park until someone asks us to stop
    let mut shutdown_rx = event_bus.shutdown_rx.clone();
    while !*shutdown_rx.borrow() {
        if shutdown_rx.changed().await.is_err() {
            break;
        }
    }
    info!("Shutdown signaled; stopping bridge.");

    // 8) Teardown
    if let Err(e) = service.disconnect_chat().await {
        warn!("Error disconnecting chat => {}", e);
    }
    link.shutdown();
    for (name, handle) in [("dispatcher", dispatcher), ("usage recorder", recorder), ("device link", link_task)] {
        if timeout(SHUTDOWN_GRACE, handle).await.is_err() {
            warn!("{} did not stop within {:?}", name, SHUTDOWN_GRACE);
        }
    }

    Ok(())
}
