// src/platforms/mod.rs

pub mod twitch_irc;

pub use kosbot_common::traits::platform_traits::{ChatPlatform, ConnectionStatus};
