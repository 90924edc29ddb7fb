//! Configuration management for peerlink
//!
//! All negotiation parameters are read once at startup and shared
//! read-only; nothing here mutates after load.

use crate::webrtc::PeerError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Peer connection configuration
    #[serde(default)]
    pub peer: PeerConfig,

    /// Authentication server configuration
    #[serde(default)]
    pub auth: AuthConfig,

    /// Reconnection supervisor configuration
    #[serde(default)]
    pub reconnect: ReconnectConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// An ICE server entry (STUN or TURN)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    pub username: Option<String>,
    pub credential: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerConfig {
    /// Connectivity-assist (STUN/TURN) servers
    #[serde(default)]
    pub ice_servers: Vec<IceServerConfig>,

    /// Label for the ordered, reliable input data channel
    #[serde(default = "default_data_channel_label")]
    pub data_channel_label: String,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            ice_servers: Vec::new(),
            data_channel_label: default_data_channel_label(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Attempts before the supervisor gives up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base wait, scaled linearly by attempt number
    #[serde(default = "default_base_delay_secs")]
    pub base_delay_secs: u64,

    /// Fixed wait after each attempt before checking connectivity
    #[serde(default = "default_observe_window_secs")]
    pub observe_window_secs: u64,
}

impl ReconnectConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_secs(self.base_delay_secs)
    }

    pub fn observe_window(&self) -> Duration {
        Duration::from_secs(self.observe_window_secs)
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_secs: default_base_delay_secs(),
            observe_window_secs: default_observe_window_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Token endpoint URL
    #[serde(default)]
    pub server_url: String,

    /// Stable client identifier sent during the token exchange
    #[serde(default)]
    pub client_id: String,

    /// Client kind, e.g. "host" or "client"
    #[serde(default = "default_client_type")]
    pub client_type: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            server_url: String::new(),
            client_id: String::new(),
            client_type: default_client_type(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Config, PeerError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            PeerError::Configuration(format!("Failed to read {}: {}", path.display(), e))
        })?;
        toml::from_str(&content).map_err(|e| {
            PeerError::Configuration(format!("Failed to parse {}: {}", path.display(), e))
        })
    }
}

fn default_data_channel_label() -> String {
    "input".to_string()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_secs() -> u64 {
    2
}

fn default_observe_window_secs() -> u64 {
    5
}

fn default_client_type() -> String {
    "client".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}
