use std::time::Duration;

use crate::errors::ConfigError;

/// Configuration of a [`Server`](crate::Server).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// The request path the engine transport is attached under.
    ///
    /// Defaults to `"/socket.io"`.
    pub path: String,

    /// Allowed origins, forwarded to the HTTP attachment layer.
    ///
    /// Defaults to `"*:*"`.
    pub origins: String,

    /// Options forwarded to the engine transport.
    pub engine: EngineOptions,
}

/// Options consumed by the engine transport layer.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// The interval at which the engine sends heartbeat probes.
    ///
    /// Defaults to 25 seconds.
    pub ping_interval: Duration,

    /// The delay the engine waits for a heartbeat answer before closing the
    /// connection.
    ///
    /// Defaults to 20 seconds.
    pub ping_timeout: Duration,

    /// The maximum size of a payload in bytes.
    ///
    /// Defaults to 100 kb.
    pub max_payload: u64,

    /// Allowed transport kinds, in upgrade order.
    pub transports: Vec<String>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(25),
            ping_timeout: Duration::from_secs(20),
            max_payload: 100_000,
            transports: vec!["polling".to_string(), "websocket".to_string()],
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            path: "/socket.io".to_string(),
            origins: "*:*".to_string(),
            engine: EngineOptions::default(),
        }
    }
}

/// Value accepted by the legacy [`set`](crate::Server::set) surface.
#[derive(Debug, Clone)]
pub enum SettingValue {
    Str(String),
    Duration(Duration),
    Num(u64),
    List(Vec<String>),
}

impl From<&str> for SettingValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}
impl From<String> for SettingValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}
impl From<Duration> for SettingValue {
    fn from(value: Duration) -> Self {
        Self::Duration(value)
    }
}
impl From<u64> for SettingValue {
    fn from(value: u64) -> Self {
        Self::Num(value)
    }
}
impl From<Vec<String>> for SettingValue {
    fn from(value: Vec<String>) -> Self {
        Self::List(value)
    }
}
impl From<Vec<&str>> for SettingValue {
    fn from(value: Vec<&str>) -> Self {
        Self::List(value.into_iter().map(str::to_string).collect())
    }
}

impl SettingValue {
    fn as_duration(&self) -> Option<Duration> {
        match self {
            Self::Duration(d) => Some(*d),
            // numbers are historically milliseconds
            Self::Num(ms) => Some(Duration::from_millis(*ms)),
            _ => None,
        }
    }
}

impl ServerConfig {
    /// Applies a legacy `set(key, value)` pair.
    pub(crate) fn apply(&mut self, key: &str, value: SettingValue) -> Result<(), ConfigError> {
        match key {
            "origins" => match value {
                SettingValue::Str(origins) => self.origins = origins,
                _ => return Err(ConfigError::InvalidValue("origins")),
            },
            "resource" => match value {
                SettingValue::Str(mut path) => {
                    if !path.starts_with('/') {
                        path.insert(0, '/');
                    }
                    self.path = path;
                }
                _ => return Err(ConfigError::InvalidValue("resource")),
            },
            "heartbeat timeout" => {
                self.engine.ping_timeout = value
                    .as_duration()
                    .ok_or(ConfigError::InvalidValue("heartbeat timeout"))?;
            }
            "heartbeat interval" => {
                self.engine.ping_interval = value
                    .as_duration()
                    .ok_or(ConfigError::InvalidValue("heartbeat interval"))?;
            }
            "destroy buffer size" => match value {
                SettingValue::Num(size) => self.engine.max_payload = size,
                _ => return Err(ConfigError::InvalidValue("destroy buffer size")),
            },
            "transports" => match value {
                SettingValue::List(transports) => self.engine.transports = transports,
                _ => return Err(ConfigError::InvalidValue("transports")),
            },
            _ => return Err(ConfigError::UnknownSetting(key.to_string())),
        }
        Ok(())
    }
}
