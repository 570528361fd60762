//! Client configuration.
//!
//! Defaults match the dashboard deployment: broker on `localhost:5000`,
//! 10 s connect timeout, 60 s keep-alive, 1 s between candidate endpoints.
//! Durations are expressed in milliseconds when loaded from JSON.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ConfigError;
use crate::supervisor::SupervisorConfig;
use crate::topics;

/// Environment variable overriding the broker host.
pub const BROKER_HOST_ENV: &str = "TRACEABILITY_MQTT_BROKER";
/// Environment variable overriding the broker port.
pub const BROKER_PORT_ENV: &str = "TRACEABILITY_MQTT_PORT";

/// Where the broker lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5000,
        }
    }
}

impl BrokerConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Defaults overridden by `TRACEABILITY_MQTT_BROKER` / `TRACEABILITY_MQTT_PORT`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_overrides(
            std::env::var(BROKER_HOST_ENV).ok(),
            std::env::var(BROKER_PORT_ENV).ok(),
        )
    }

    fn with_overrides(
        mut self,
        host: Option<String>,
        port: Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(host) = host.filter(|h| !h.trim().is_empty()) {
            self.host = host.trim().to_string();
        }
        if let Some(port) = port {
            self.port = port
                .trim()
                .parse()
                .map_err(|_| ConfigError::Port(port.clone()))?;
        }
        Ok(self)
    }

    /// Ranked endpoint list: WebSocket with the `/mqtt` path, WebSocket
    /// without it, then raw MQTT. The order is fixed.
    pub fn candidate_urls(&self) -> Result<Vec<Url>, ConfigError> {
        let authority = format!("{}:{}", self.host, self.port);
        [
            format!("ws://{authority}/mqtt"),
            format!("ws://{authority}"),
            format!("mqtt://{authority}"),
        ]
        .iter()
        .map(|raw| Url::parse(raw).map_err(ConfigError::from))
        .collect()
    }
}

/// Everything the session needs to reach the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub broker: BrokerConfig,
    /// Prefix for the generated MQTT client id; a random suffix is appended.
    pub client_id_prefix: String,
    #[serde(rename = "connect_timeout_ms", with = "millis")]
    pub connect_timeout: Duration,
    #[serde(rename = "keep_alive_ms", with = "millis")]
    pub keep_alive: Duration,
    /// Pause before trying the next candidate endpoint.
    #[serde(rename = "candidate_delay_ms", with = "millis")]
    pub candidate_delay: Duration,
    /// Broker-side subscriptions re-issued on every connect.
    pub result_topics: Vec<String>,
    pub supervisor: SupervisorConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            broker: BrokerConfig::default(),
            client_id_prefix: "traceability-frontend".to_string(),
            connect_timeout: Duration::from_secs(10),
            keep_alive: Duration::from_secs(60),
            candidate_delay: Duration::from_secs(1),
            result_topics: topics::result_topics()
                .into_iter()
                .map(String::from)
                .collect(),
            supervisor: SupervisorConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn for_broker(broker: BrokerConfig) -> Self {
        Self {
            broker,
            ..Self::default()
        }
    }

    /// Defaults plus the broker location from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self::for_broker(BrokerConfig::from_env()?))
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the transport cannot honor.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.keep_alive.is_zero() && self.keep_alive < Duration::from_secs(1) {
            return Err(ConfigError::KeepAlive(self.keep_alive));
        }
        Ok(())
    }

    /// Load a JSON config file, then apply environment overrides for the
    /// broker location.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let mut config = Self::from_json_str(&raw)?;
        config.broker = config.broker.with_overrides(
            std::env::var(BROKER_HOST_ENV).ok(),
            std::env::var(BROKER_PORT_ENV).ok(),
        )?;
        Ok(config)
    }

    pub fn candidate_urls(&self) -> Result<Vec<Url>, ConfigError> {
        self.broker.candidate_urls()
    }

    /// Liveness acknowledgments older than this make the session not ready.
    /// `None` when keep-alive is disabled: no pings, so no liveness check.
    pub fn liveness_window(&self) -> Option<Duration> {
        if self.keep_alive.is_zero() {
            return None;
        }
        Some(self.keep_alive + self.keep_alive / 2)
    }

    /// Fresh client id, `<prefix>-<hex>`.
    pub fn client_id(&self) -> String {
        format!("{}-{:x}", self.client_id_prefix, rand::random::<u32>())
    }
}

pub(crate) mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

pub(crate) mod opt_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}
