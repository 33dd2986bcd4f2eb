use crate::detail::DetailSchedulerConfig;
use busgate_core::net::Endpoint;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_PORT: u16 = 8899;
/// Object address the client uses as packet source unless configured.
pub const DEFAULT_CLIENT_ADDRESS: u16 = 0x7FF0;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Durations in config files are plain millisecond counts.
pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub password: String,
    pub client_address: u16,
    #[serde(with = "duration_ms")]
    pub connect_timeout: Duration,
    #[serde(with = "duration_ms")]
    pub keepalive_interval: Duration,
    /// Silence from the gateway longer than this forces a reconnect.
    #[serde(with = "duration_ms")]
    pub keepalive_max_idle: Duration,
    pub auto_reconnect: bool,
    pub detail: DetailSchedulerConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            password: String::new(),
            client_address: DEFAULT_CLIENT_ADDRESS,
            connect_timeout: Duration::from_secs(10),
            keepalive_interval: Duration::from_secs(30),
            keepalive_max_idle: Duration::from_secs(120),
            auto_reconnect: true,
            detail: DetailSchedulerConfig::default(),
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("password", &"<redacted>")
            .field("client_address", &self.client_address)
            .field("connect_timeout", &self.connect_timeout)
            .field("keepalive_interval", &self.keepalive_interval)
            .field("keepalive_max_idle", &self.keepalive_max_idle)
            .field("auto_reconnect", &self.auto_reconnect)
            .field("detail", &self.detail)
            .finish()
    }
}

impl ClientConfig {
    pub fn new(host: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            password: password.into(),
            ..Default::default()
        }
    }

    pub async fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = tokio::fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.host.clone(), self.port).with_connect_timeout(self.connect_timeout)
    }
}
