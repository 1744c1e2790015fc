pub mod bridge_service;
pub mod chat_bridge;
pub mod cooldown;
pub mod permission;
pub mod resolver;
pub mod usage_recorder;

pub use chat_bridge::{BridgeSettings, ChatBridge, DispatchOutcome, DropReason};
pub use cooldown::CooldownTracker;
pub use resolver::Resolution;
