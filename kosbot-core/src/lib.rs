// src/lib.rs

pub mod device;
pub mod eventbus;
pub mod platforms;
pub mod repositories;
pub mod services;

pub use kosbot_common::error::Error;
pub use device::link::DeviceLink;
pub use services::bridge_service::BridgeService;
