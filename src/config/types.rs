//! Configuration Types

use serde::{Deserialize, Serialize};
use std::net::{SocketAddr, SocketAddrV4};
use std::time::Duration;

/// Main configuration structure, shared by the proxy, client and target binaries
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub filter: FilterConfig,
    pub client: ClientConfig,
    pub target: TargetConfig,
    pub log_level: String,
}

/// Proxy server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub max_connections: usize,
    /// Size of the single bounded read per relay step
    pub buffer_size: usize,
    #[serde(with = "humantime_serde")]
    pub handshake_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// How long a relay may carry no bytes in either direction before it is closed
    #[serde(with = "humantime_serde")]
    pub connection_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

/// Transform applied to target -> client traffic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    Off,
    Simple,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FilterConfig {
    pub mode: FilterMode,
}

/// Client configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    pub proxy_addr: SocketAddr,
    pub target_addr: SocketAddrV4,
    pub message: String,
}

/// Target server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TargetConfig {
    pub bind_addr: SocketAddr,
    pub response: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            filter: FilterConfig::default(),
            client: ClientConfig::default(),
            target: TargetConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 1080)),
            max_connections: 100,
            buffer_size: 1024,
            handshake_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
            connection_timeout: Duration::from_secs(300),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            mode: FilterMode::Simple,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            proxy_addr: SocketAddr::from(([127, 0, 0, 1], 1080)),
            target_addr: SocketAddrV4::new([127, 0, 0, 1].into(), 8888),
            message: "Hallo".to_string(),
        }
    }
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8888)),
            response: "She is a nice girl.".to_string(),
        }
    }
}

impl std::str::FromStr for FilterMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "off" => Ok(FilterMode::Off),
            "simple" => Ok(FilterMode::Simple),
            other => Err(format!("unknown filter mode '{}' (expected 'off' or 'simple')", other)),
        }
    }
}
