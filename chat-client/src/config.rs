//! Configuration loading for livechat clients.
//!
//! Configuration can be loaded from a TOML file; every field has a default.
//!
//! ```toml
//! base_url = "https://chat.example.com"
//! send_timeout_ms = 10000
//!
//! [reconnect]
//! max_attempts = 6
//! backoff = { kind = "exponential", base_ms = 500, max_ms = 30000, jitter_ms = 250 }
//! ```

use livechat_core::ReconnectPolicy;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::channel::ChannelConfig;
use crate::transport::WebSocketTransportConfig;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// The config is not valid TOML or has wrongly typed fields.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// `base_url` is not an absolute http(s) URL.
    #[error("invalid base url: {0}")]
    InvalidUrl(String),
}

/// Client configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatConfig {
    /// Backend origin (default: http://localhost:5132).
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// History endpoint path (default: /api/message).
    #[serde(default = "default_history_path")]
    pub history_path: String,
    /// Hub endpoint path (default: /chathub).
    #[serde(default = "default_hub_path")]
    pub hub_path: String,
    /// Whole-request timeout for the history fetch in milliseconds (default: 10s).
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Socket open plus hub handshake timeout in milliseconds (default: 15s).
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    /// Wait for a send completion in milliseconds (default: 30s).
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
    /// Keep-alive ping interval in milliseconds, 0 to disable (default: 15s).
    #[serde(default = "default_keep_alive_ms")]
    pub keep_alive_ms: u64,
    /// Reconnect policy after a dropped connection.
    #[serde(default)]
    pub reconnect: ReconnectPolicy,
}

// Default value functions
fn default_base_url() -> String {
    "http://localhost:5132".to_string()
}

fn default_history_path() -> String {
    "/api/message".to_string()
}

fn default_hub_path() -> String {
    "/chathub".to_string()
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_handshake_timeout_ms() -> u64 {
    15_000
}

fn default_send_timeout_ms() -> u64 {
    30_000
}

fn default_keep_alive_ms() -> u64 {
    15_000
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            history_path: default_history_path(),
            hub_path: default_hub_path(),
            request_timeout_ms: default_request_timeout_ms(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            send_timeout_ms: default_send_timeout_ms(),
            keep_alive_ms: default_keep_alive_ms(),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl ChatConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Check that `base_url` is an absolute http(s) URL.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| ConfigError::InvalidUrl(format!("{}: {}", self.base_url, e)))?;
        match url.scheme() {
            "http" | "https" => Ok(()),
            other => Err(ConfigError::InvalidUrl(format!(
                "{}: unsupported scheme {}",
                self.base_url, other
            ))),
        }
    }

    /// Set the backend origin.
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.to_string();
        self
    }

    /// Set the send completion timeout.
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout_ms = millis(timeout);
        self
    }

    /// Set the keep-alive interval (`None` disables pings).
    pub fn with_keep_alive(mut self, interval: Option<Duration>) -> Self {
        self.keep_alive_ms = interval.map_or(0, millis);
        self
    }

    /// Set the reconnect policy.
    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Full history endpoint URL.
    pub fn history_url(&self) -> String {
        join(&self.base_url, &self.history_path)
    }

    /// Full hub endpoint URL.
    pub fn hub_url(&self) -> String {
        join(&self.base_url, &self.hub_path)
    }

    /// History request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Settings for the live channel.
    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            reconnect: self.reconnect.clone(),
            send_timeout: Duration::from_millis(self.send_timeout_ms),
            keep_alive_interval: match self.keep_alive_ms {
                0 => None,
                ms => Some(Duration::from_millis(ms)),
            },
        }
    }

    /// Settings for the WebSocket transport.
    pub fn transport_config(&self) -> WebSocketTransportConfig {
        WebSocketTransportConfig {
            handshake_timeout: Duration::from_millis(self.handshake_timeout_ms),
            operation_timeout: Duration::from_millis(self.send_timeout_ms),
        }
    }
}

/// Whole milliseconds, saturating at `u64::MAX`.
fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn join(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
