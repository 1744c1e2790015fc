// File: kosbot-server/src/config.rs

use std::path::Path;

use tracing::{info, warn};

use kosbot_common::models::config::BridgeConfig;
use kosbot_core::Error;

pub const ENV_TWITCH_OAUTH: &str = "KOSBOT_TWITCH_OAUTH";
pub const ENV_TWITCH_USERNAME: &str = "KOSBOT_TWITCH_USERNAME";
pub const ENV_DEVICE_HOST: &str = "KOSBOT_DEVICE_HOST";
pub const ENV_DEVICE_PORT: &str = "KOSBOT_DEVICE_PORT";

/// Reads the config file, writing a default one first if it is missing, then
/// applies environment overrides.
pub async fn load_config(path: &Path) -> Result<BridgeConfig, Error> {
    let mut config = match tokio::fs::read_to_string(path).await {
        Ok(raw) => serde_json::from_str::<BridgeConfig>(&raw)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let config = BridgeConfig::default();
            tokio::fs::write(path, serde_json::to_string_pretty(&config)?).await?;
            info!("Created default config at {}", path.display());
            config
        }
        Err(e) => return Err(e.into()),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    Ok(config)
}

/// Credentials and the device address may come from the environment (or a
/// `.env` file) instead of the config file.
pub fn apply_env_overrides(
    config: &mut BridgeConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<(), Error> {
    let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

    if let Some(oauth) = var(ENV_TWITCH_OAUTH) {
        config.twitch.oauth = oauth;
    }
    if let Some(username) = var(ENV_TWITCH_USERNAME) {
        config.twitch.username = username;
    }
    if let Some(host) = var(ENV_DEVICE_HOST) {
        config.device.host = host;
    }
    if let Some(port) = var(ENV_DEVICE_PORT) {
        config.device.port = port
            .parse()
            .map_err(|_| Error::Config(format!("{} is not a valid port: {}", ENV_DEVICE_PORT, port)))?;
    }

    if config.twitch.enabled && config.twitch.channels.is_empty() {
        warn!("Twitch is enabled but no channels are configured");
    }
    Ok(())
}
