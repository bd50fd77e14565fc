//! Configuration file support for the demo host
//!
//! ```toml
//! [peer]
//! mtu = 1200
//! simulated_loss = 0.25
//!
//! [demo]
//! message_count = 16
//! tick_interval_ms = 100
//! server_addr = "127.0.0.1:25005"
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use udpnotify::Config;

/// Port the demo server listens on
pub const DEFAULT_SERVER_PORT: u16 = 25005;

/// Demo traffic settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoSettings {
    /// Numbered messages the client sends
    pub message_count: u32,
    /// Delay between updates in milliseconds
    pub tick_interval_ms: u64,
    /// Address the server binds and the client connects to
    pub server_addr: SocketAddr,
}

impl Default for DemoSettings {
    fn default() -> Self {
        DemoSettings {
            message_count: 16,
            tick_interval_ms: 100,
            server_addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_SERVER_PORT)),
        }
    }
}

impl DemoSettings {
    /// Get tick interval as Duration
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

/// Combined configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Transport settings
    pub peer: Config,
    /// Demo traffic settings
    pub demo: DemoSettings,
}

impl HostConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: HostConfig = toml::from_str(contents)?;
        config.peer.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Two-peer demo configuration: 25% loss on both sides
    pub fn example() -> Self {
        HostConfig {
            peer: Config::default().with_simulated_loss(0.25),
            demo: DemoSettings::default(),
        }
    }

    /// Peer configuration for the server side
    pub fn server_peer(&self) -> Config {
        self.peer.clone().with_bind_endpoint(self.demo.server_addr)
    }

    /// Peer configuration for the client side, on an ephemeral port
    pub fn client_peer(&self) -> Config {
        let any = if self.demo.server_addr.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };
        self.peer.clone().with_bind_endpoint(any)
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Invalid peer configuration: {0}")]
    Peer(#[from] udpnotify::ConfigError),
}
