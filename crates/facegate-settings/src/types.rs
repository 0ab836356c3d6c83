//! Settings types. All structs serialize as camelCase JSON. Missing sections
//! fall back to their defaults; partial backend sections are completed by the
//! loader's deep merge.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewaySettings {
    /// Listener and connection limits.
    pub server: ServerSettings,
    /// Face recognition backend.
    pub recognition: BackendSettings,
    /// Chat / answer backend.
    pub chat: BackendSettings,
    /// Optional retry policy for backend calls.
    pub retry: RetrySettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            recognition: BackendSettings::recognition_default(),
            chat: BackendSettings::chat_default(),
            retry: RetrySettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl GatewaySettings {
    /// Reject values that would make the gateway unusable.
    pub fn validate(&self) -> Result<()> {
        if self.recognition.deadline_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "recognition.deadlineMs must be greater than zero".into(),
            ));
        }
        if self.chat.deadline_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "chat.deadlineMs must be greater than zero".into(),
            ));
        }
        if self.server.send_queue_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "server.sendQueueCapacity must be greater than zero".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter_factor) {
            return Err(SettingsError::InvalidValue(
                "retry.jitterFactor must be within 0.0..=1.0".into(),
            ));
        }
        Ok(())
    }
}

/// Listener, WebSocket and heartbeat settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` picks a free port).
    pub port: u16,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Outbound queue capacity per connection.
    pub send_queue_capacity: usize,
    /// Maximum inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Interval between server pings.
    pub heartbeat_interval_secs: u64,
    /// Disconnect a client silent for longer than this.
    pub pong_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 4000,
            max_connections: 256,
            send_queue_capacity: 256,
            max_message_size: 8 * 1024 * 1024,
            heartbeat_interval_secs: 30,
            pong_timeout_secs: 60,
        }
    }
}

impl ServerSettings {
    /// `host:port` bind string.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Heartbeat interval as a `Duration`.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    /// Pong timeout as a `Duration`.
    pub fn pong_timeout(&self) -> Duration {
        Duration::from_secs(self.pong_timeout_secs.max(1))
    }
}

/// One inference backend reachable over HTTP.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendSettings {
    /// Base URL, without trailing slash.
    pub base_url: String,
    /// Per-call deadline in milliseconds.
    pub deadline_ms: u64,
}

impl BackendSettings {
    /// Recognition service defaults: port 8001, 10s deadline.
    pub fn recognition_default() -> Self {
        Self {
            base_url: "http://localhost:8001".to_string(),
            deadline_ms: 10_000,
        }
    }

    /// Chat service defaults: port 8002, 30s deadline.
    pub fn chat_default() -> Self {
        Self {
            base_url: "http://localhost:8002".to_string(),
            deadline_ms: 30_000,
        }
    }

    /// Deadline as a `Duration`.
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }

    /// Join a path onto the base URL.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url.trim_end_matches('/'))
    }
}

/// Bounded retry with exponential backoff. Disabled when `max_retries` is 0.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetrySettings {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Base backoff delay in milliseconds.
    pub base_delay_ms: u64,
    /// Backoff cap in milliseconds.
    pub max_delay_ms: u64,
    /// Jitter factor, 0.0 to 1.0.
    pub jitter_factor: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 0,
            base_delay_ms: 200,
            max_delay_ms: 2_000,
            jitter_factor: 0.2,
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive; `RUST_LOG` wins when set.
    pub level: String,
    /// Emit JSON lines instead of the compact format.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
