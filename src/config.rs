use std::path::PathBuf;

use serde::{Deserialize, Deserializer};
use zeroize::Zeroizing;

use base64::engine::general_purpose::STANDARD as base64decoder;
use base64::Engine;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read configuration file: {0}")]
    Io(#[from] std::io::Error),
    #[error("LIGHTHOUSE_CONFIG is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("LIGHTHOUSE_CONFIG is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("invalid configuration: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("PORT is not a valid port: {0}")]
    Port(String),
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct HeartbeatSettings {
    pub interval_ms: u64,
    pub timeout_ms: u64,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            interval_ms: 10_000,
            timeout_ms: 15_000,
        }
    }
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Configuration {
    pub service_address: String,
    pub service_port: u16,
    /// Without a key the presentation runs offline
    #[serde(deserialize_with = "deserialize_secret")]
    pub broker_api_key: Option<Zeroizing<String>>,
    /// Signs operator tokens. Without it every operator route is refused.
    #[serde(deserialize_with = "deserialize_secret")]
    pub operator_secret: Option<Zeroizing<String>>,
    /// Where the keynote snapshot lives. Kept in memory when unset.
    pub storage_dir: Option<PathBuf>,
    pub connection_timeout_ms: u64,
    pub vote_duration_seconds: u32,
    pub heartbeat: HeartbeatSettings,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            service_address: "127.0.0.1".to_string(),
            service_port: 8000,
            broker_api_key: None,
            operator_secret: None,
            storage_dir: None,
            connection_timeout_ms: 15_000,
            vote_duration_seconds: 20,
            heartbeat: HeartbeatSettings::default(),
        }
    }
}

/// Fetch the configuration. Check a path if one is provided, otherwise
/// look for a base64 encoded blob in the LIGHTHOUSE_CONFIG environment
/// variable, otherwise run on defaults.
///
/// PORT and LIGHTHOUSE_BROKER_KEY override whatever was loaded.
pub fn load_configuration() -> Result<Configuration, ConfigError> {
    let configuration_toml = match std::env::args().nth(1) {
        Some(path) => Some(std::fs::read_to_string(path)?),
        None => match std::env::var("LIGHTHOUSE_CONFIG") {
            Ok(base64_config) => {
                let config_bytes = base64decoder.decode(base64_config.trim())?;
                Some(String::from_utf8(config_bytes)?)
            }
            Err(_) => None,
        },
    };

    let config = match configuration_toml {
        Some(toml) => parse_configuration(&toml)?,
        None => {
            info!("No configuration provided, using defaults");
            Configuration::default()
        }
    };

    apply_env_overrides(config, |name| std::env::var(name).ok())
}

pub fn parse_configuration(configuration_toml: &str) -> Result<Configuration, ConfigError> {
    Ok(toml::from_str(configuration_toml)?)
}

pub fn apply_env_overrides(
    mut config: Configuration,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<Configuration, ConfigError> {
    if let Some(port) = lookup("PORT") {
        config.service_port = port.parse().map_err(|_| ConfigError::Port(port))?;
    }

    if let Some(key) = lookup("LIGHTHOUSE_BROKER_KEY").filter(|key| !key.is_empty()) {
        config.broker_api_key = Some(Zeroizing::new(key));
    }

    Ok(config)
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<Option<Zeroizing<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let s: Option<String> = Deserialize::deserialize(deserializer)?;
    Ok(s.filter(|s| !s.is_empty()).map(Zeroizing::new))
}
