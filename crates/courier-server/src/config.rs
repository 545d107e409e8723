//! Server configuration.
//!
//! Read from the first TOML file found among `$COURIER_CONFIG`,
//! `courier.toml`, `/etc/courier/courier.toml` and
//! `~/.config/courier/courier.toml`. Every field is optional.
//!
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 9090
//!
//! [channels]
//! max_payload_size = 65536
//!
//! [metrics]
//! enabled = false
//! ```
//!
//! `COURIER_HOST` and `COURIER_PORT` take precedence over the file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "COURIER_CONFIG";

const SEARCH_PATHS: [&str; 3] = [
    "courier.toml",
    "/etc/courier/courier.toml",
    "~/.config/courier/courier.toml",
];

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub channels: ChannelLimits,
    pub metrics: MetricsConfig,
}

/// Listener and session settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Route that upgrades to a WebSocket session.
    pub websocket_path: String,
    /// Upgrades beyond this many open sessions are refused.
    pub max_connections: usize,
    /// Heartbeat interval advertised in the `connected` frame.
    pub heartbeat_interval_ms: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9090,
            websocket_path: "/ws".to_string(),
            max_connections: 10_000,
            heartbeat_interval_ms: 30_000,
        }
    }
}

/// Limits applied to channel traffic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelLimits {
    /// Largest payload accepted by `publish`, in bytes.
    pub max_payload_size: usize,
}

impl Default for ChannelLimits {
    fn default() -> Self {
        Self {
            max_payload_size: 1024 * 1024,
        }
    }
}

/// Prometheus exporter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 9091,
        }
    }
}

impl Config {
    /// Locate and parse the config file, then apply environment overrides.
    ///
    /// Falls back to defaults when no file exists.
    ///
    /// # Errors
    ///
    /// Returns an error if a file is found but unreadable or malformed, if
    /// `COURIER_CONFIG` names a missing file, or if `COURIER_PORT` is not a
    /// port number.
    pub fn load() -> Result<Self> {
        let mut config = match find_config_file() {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Parse a config file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(host) = var("COURIER_HOST") {
            self.server.host = host;
        }
        if let Some(port) = var("COURIER_PORT") {
            self.server.port = port
                .parse()
                .with_context(|| format!("COURIER_PORT is not a port number: {}", port))?;
        }
        Ok(())
    }

    /// Socket address for the listener.
    ///
    /// # Errors
    ///
    /// Returns an error if `host:port` does not parse as a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        let addr = format!("{}:{}", self.server.host, self.server.port);
        addr.parse()
            .with_context(|| format!("Invalid bind address {}", addr))
    }
}

fn find_config_file() -> Option<String> {
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        return Some(shellexpand::tilde(&path).into_owned());
    }
    SEARCH_PATHS
        .iter()
        .map(|path| shellexpand::tilde(path).into_owned())
        .find(|path| Path::new(path).exists())
}
