//! Configuration system for Groundlink.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $GROUNDLINK_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/groundlink/config.toml
//!   3. ~/.config/groundlink/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::swupd::SW_UPD_MAX_SEND_ATTEMPTS;
use crate::wire::Endpoint;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GroundlinkConfig {
    pub network: NetworkConfig,
    pub link: LinkConfig,
    pub transfer: TransferConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Ground server address (IPv4 or IPv6 literal).
    pub server_addr: String,
    /// Ground server port.
    pub server_port: u16,
    /// Connect timeout in seconds. Values below 1 are raised to 1.
    pub connect_timeout_secs: u64,
    /// Connect to the server at startup.
    pub auto_connect: bool,
    /// Local control API port.
    pub api_port: u16,
    /// Listening port of each network participant.
    pub ports: PortsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortsConfig {
    pub client: u16,
    pub uhf: u16,
    pub xband: u16,
    pub telescope: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// A read that waits longer than this drops the connection.
    pub recv_timeout_secs: u64,
    /// Sleep between checks while disconnected.
    pub idle_secs: u64,
    /// Interval between heartbeat frames.
    pub heartbeat_secs: u64,
    /// Telemetry records kept in the ring.
    pub telemetry_capacity: usize,
    /// How long a telemetry poll waits for the answer.
    pub telemetry_poll_timeout_secs: u64,
    /// Where telemetry requests and subsystem commands are addressed.
    pub command_endpoint: Endpoint,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Where software-update packets are addressed.
    pub endpoint: Endpoint,
    /// How long to wait for each reply before counting a failed attempt.
    pub reply_timeout_secs: u64,
    /// Sends of one packet before the transfer is aborted.
    pub max_send_attempts: u32,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for GroundlinkConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            link: LinkConfig::default(),
            transfer: TransferConfig::default(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1".to_string(),
            server_port: 54200,
            connect_timeout_secs: 5,
            auto_connect: false,
            api_port: 9101,
            ports: PortsConfig::default(),
        }
    }
}

impl Default for PortsConfig {
    fn default() -> Self {
        Self {
            client: 54201,
            uhf: 54202,
            xband: 54203,
            telescope: 54204,
        }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            recv_timeout_secs: 60,
            idle_secs: 5,
            heartbeat_secs: 15,
            telemetry_capacity: 64,
            telemetry_poll_timeout_secs: 10,
            command_endpoint: Endpoint::Uhf,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::Uhf,
            reply_timeout_secs: 5,
            max_send_attempts: SW_UPD_MAX_SEND_ATTEMPTS,
        }
    }
}

impl NetworkConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }

    /// Listening port for `endpoint`. The server's own port for `Server`.
    pub fn port_of(&self, endpoint: Endpoint) -> u16 {
        match endpoint {
            Endpoint::Server => self.server_port,
            Endpoint::Client => self.ports.client,
            Endpoint::Uhf => self.ports.uhf,
            Endpoint::XBand => self.ports.xband,
            Endpoint::Telescope => self.ports.telescope,
        }
    }
}

impl LinkConfig {
    pub fn recv_timeout(&self) -> Duration {
        Duration::from_secs(self.recv_timeout_secs.max(1))
    }

    pub fn idle_interval(&self) -> Duration {
        Duration::from_secs(self.idle_secs.max(1))
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs.max(1))
    }

    pub fn telemetry_poll_timeout(&self) -> Duration {
        Duration::from_secs(self.telemetry_poll_timeout_secs.max(1))
    }
}

impl TransferConfig {
    pub fn reply_timeout(&self) -> Duration {
        Duration::from_secs(self.reply_timeout_secs.max(1))
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("groundlink")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl GroundlinkConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            GroundlinkConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("GROUNDLINK_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&GroundlinkConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply GROUNDLINK_* env var overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("GROUNDLINK_NETWORK__SERVER_ADDR") {
            self.network.server_addr = v;
        }
        if let Some(p) = var("GROUNDLINK_NETWORK__SERVER_PORT").and_then(|v| v.parse().ok()) {
            self.network.server_port = p;
        }
        if let Some(p) = var("GROUNDLINK_NETWORK__API_PORT").and_then(|v| v.parse().ok()) {
            self.network.api_port = p;
        }
        if let Some(v) = var("GROUNDLINK_NETWORK__AUTO_CONNECT") {
            self.network.auto_connect = v == "true" || v == "1";
        }
        if let Some(s) = var("GROUNDLINK_LINK__HEARTBEAT_SECS").and_then(|v| v.parse().ok()) {
            self.link.heartbeat_secs = s;
        }
        if let Some(n) = var("GROUNDLINK_TRANSFER__MAX_SEND_ATTEMPTS").and_then(|v| v.parse().ok())
        {
            self.transfer.max_send_attempts = n;
        }
    }
}
