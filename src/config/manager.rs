//! Configuration Manager

use super::{Config, FilterMode};
use crate::Result;
use anyhow::{bail, Context};
use std::net::SocketAddr;
use std::path::Path;

/// Manages configuration loading and validation
pub struct ConfigManager;

impl ConfigManager {
    /// File if it exists, otherwise environment on top of defaults
    pub fn load(path: &Path) -> Result<Config> {
        if path.exists() {
            Self::load_from_file(path)
        } else {
            Self::load_from_env()
        }
    }

    /// Load configuration from file
    pub fn load_from_file(path: &Path) -> Result<Config> {
        if path.exists() {
            tracing::info!("Loading configuration from: {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;

            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

            config
                .validate()
                .with_context(|| "Configuration validation failed")?;

            tracing::info!("Configuration loaded and validated successfully");
            Ok(config)
        } else {
            tracing::warn!(
                "Configuration file not found at {}, using defaults",
                path.display()
            );
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }

    /// Load configuration from environment variables
    pub fn load_from_env() -> Result<Config> {
        let mut config = Config::default();

        if let Ok(bind_addr) = std::env::var("SOCKSRELAY_BIND_ADDR") {
            config.server.bind_addr = bind_addr
                .parse::<SocketAddr>()
                .with_context(|| format!("Invalid SOCKSRELAY_BIND_ADDR: {}", bind_addr))?;
        }

        if let Ok(max_conn) = std::env::var("SOCKSRELAY_MAX_CONNECTIONS") {
            config.server.max_connections = max_conn
                .parse::<usize>()
                .with_context(|| format!("Invalid SOCKSRELAY_MAX_CONNECTIONS: {}", max_conn))?;
        }

        if let Ok(timeout) = std::env::var("SOCKSRELAY_CONNECTION_TIMEOUT") {
            config.server.connection_timeout = humantime::parse_duration(&timeout)
                .with_context(|| format!("Invalid SOCKSRELAY_CONNECTION_TIMEOUT: {}", timeout))?;
        }

        if let Ok(buffer_size) = std::env::var("SOCKSRELAY_BUFFER_SIZE") {
            config.server.buffer_size = buffer_size
                .parse::<usize>()
                .with_context(|| format!("Invalid SOCKSRELAY_BUFFER_SIZE: {}", buffer_size))?;
        }

        if let Ok(filter) = std::env::var("SOCKSRELAY_FILTER") {
            config.filter.mode = filter
                .parse::<FilterMode>()
                .map_err(anyhow::Error::msg)
                .with_context(|| "Invalid SOCKSRELAY_FILTER")?;
        }

        if let Ok(log_level) = std::env::var("SOCKSRELAY_LOG_LEVEL") {
            config.log_level = log_level;
        }

        config.validate()?;
        Ok(config)
    }
}

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.validate_server_config()
            .with_context(|| "Server configuration validation failed")?;

        self.validate_client_config()
            .with_context(|| "Client configuration validation failed")?;

        self.validate_target_config()
            .with_context(|| "Target configuration validation failed")?;

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.log_level.as_str()) {
            bail!("log_level must be one of: {}", valid_log_levels.join(", "));
        }

        Ok(())
    }

    fn validate_server_config(&self) -> Result<()> {
        if self.server.max_connections == 0 {
            bail!("max_connections must be greater than 0");
        }

        if self.server.max_connections > 100000 {
            bail!("max_connections cannot exceed 100,000 for safety");
        }

        if self.server.buffer_size < 1024 {
            bail!("buffer_size must be at least 1024 bytes");
        }

        if self.server.buffer_size > 1048576 {
            bail!("buffer_size cannot exceed 1MB");
        }

        if self.server.handshake_timeout.is_zero() {
            bail!("handshake_timeout must be greater than 0");
        }

        if self.server.connect_timeout.is_zero() {
            bail!("connect_timeout must be greater than 0");
        }

        if self.server.connection_timeout.as_secs() == 0 {
            bail!("connection_timeout must be at least 1 second");
        }

        if self.server.connection_timeout.as_secs() > 3600 {
            bail!("connection_timeout cannot exceed 1 hour");
        }

        Ok(())
    }

    fn validate_client_config(&self) -> Result<()> {
        if self.client.message.is_empty() {
            bail!("client.message must not be empty");
        }

        if self.client.message.len() > self.server.buffer_size {
            bail!(
                "client.message ({} bytes) does not fit in buffer_size ({} bytes)",
                self.client.message.len(),
                self.server.buffer_size
            );
        }

        Ok(())
    }

    fn validate_target_config(&self) -> Result<()> {
        if self.target.response.is_empty() {
            bail!("target.response must not be empty");
        }

        Ok(())
    }

    /// Merge with CLI arguments
    pub fn merge_with_cli_args(
        &mut self,
        bind: Option<&str>,
        port: Option<u16>,
        max_connections: Option<usize>,
        timeout: Option<u64>,
        buffer_size: Option<usize>,
        filter: Option<FilterMode>,
    ) {
        if let Some(bind_str) = bind {
            if let Ok(addr) = bind_str.parse::<SocketAddr>() {
                self.server.bind_addr = addr;
                tracing::info!("CLI override: bind address set to {}", addr);
            } else {
                tracing::warn!("Invalid bind address provided: {}", bind_str);
            }
        }

        if let Some(port) = port {
            self.server.bind_addr.set_port(port);
            tracing::info!("CLI override: port set to {}", port);
        }

        if let Some(max_conn) = max_connections {
            self.server.max_connections = max_conn;
            tracing::info!("CLI override: max connections set to {}", max_conn);
        }

        if let Some(timeout_secs) = timeout {
            self.server.connection_timeout = std::time::Duration::from_secs(timeout_secs);
            tracing::info!("CLI override: connection timeout set to {}s", timeout_secs);
        }

        if let Some(buffer_size) = buffer_size {
            self.server.buffer_size = buffer_size;
            tracing::info!("CLI override: buffer size set to {} bytes", buffer_size);
        }

        if let Some(mode) = filter {
            self.filter.mode = mode;
            tracing::info!("CLI override: filter mode set to {:?}", mode);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.bind_addr.port(), 1080);
        assert_eq!(config.client.target_addr.port(), 8888);
        assert_eq!(config.filter.mode, FilterMode::Simple);
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
log_level = "debug"

[server]
bind_addr = "127.0.0.1:2080"
buffer_size = 4096
handshake_timeout = "3s"

[filter]
mode = "off"

[target]
response = "He waves."
"#
        )
        .unwrap();

        let config = ConfigManager::load_from_file(file.path()).unwrap();
        assert_eq!(config.server.bind_addr.port(), 2080);
        assert_eq!(config.server.buffer_size, 4096);
        assert_eq!(config.server.handshake_timeout, Duration::from_secs(3));
        // untouched fields keep their defaults
        assert_eq!(config.server.max_connections, 100);
        assert_eq!(config.filter.mode, FilterMode::Off);
        assert_eq!(config.target.response, "He waves.");
        assert_eq!(config.client.message, "Hallo");
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nbuffer_size = 16").unwrap();
        assert!(ConfigManager::load_from_file(file.path()).is_err());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[filter]\nmode = \"linguistic\"").unwrap();
        assert!(ConfigManager::load_from_file(file.path()).is_err());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConfigManager::load_from_file(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.server.buffer_size, 1024);
    }

    #[test]
    fn test_validation_bounds() {
        let mut config = Config::default();
        config.server.max_connections = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.server.connection_timeout = Duration::from_secs(7200);
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.client.message = String::new();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.log_level = "verbose".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cli_overrides() {
        let mut config = Config::default();
        config.merge_with_cli_args(
            Some("0.0.0.0:9000"),
            Some(9100),
            Some(8),
            Some(60),
            Some(2048),
            Some(FilterMode::Off),
        );
        assert_eq!(config.server.bind_addr, "0.0.0.0:9100".parse().unwrap());
        assert_eq!(config.server.max_connections, 8);
        assert_eq!(config.server.connection_timeout, Duration::from_secs(60));
        assert_eq!(config.server.buffer_size, 2048);
        assert_eq!(config.filter.mode, FilterMode::Off);

        // an unparsable bind address is ignored
        config.merge_with_cli_args(Some("not-an-addr"), None, None, None, None, None);
        assert_eq!(config.server.bind_addr.port(), 9100);
    }

    #[test]
    fn test_filter_mode_from_str() {
        assert_eq!("OFF".parse::<FilterMode>().unwrap(), FilterMode::Off);
        assert_eq!("simple".parse::<FilterMode>().unwrap(), FilterMode::Simple);
        assert!("lingu".parse::<FilterMode>().is_err());
    }
}
