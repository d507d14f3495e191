//! socksrelay - SOCKS5 proxy
//!
//! Accepts SOCKS5 clients, connects them to their requested IPv4 target and
//! relays bytes, passing target -> client traffic through the configured filter.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info};

use socksrelay::config::{ConfigManager, FilterMode};
use socksrelay::logging::{effective_level, init_tracing};
use socksrelay::{ConnectionManager, ShutdownCoordinator};

/// CLI arguments for the proxy
#[derive(Parser, Debug)]
#[command(name = "socksrelay")]
#[command(about = "Minimal SOCKS5 relay proxy")]
#[command(version)]
#[command(long_about = "
Minimal SOCKS5 (RFC 1928) relay proxy: NO AUTHENTICATION, CONNECT, IPv4.

Configuration priority (highest to lowest):
1. Command-line arguments
2. Configuration file
3. Environment variables
4. Built-in defaults

Environment variables:
  SOCKSRELAY_BIND_ADDR          - Bind address (e.g., 127.0.0.1:1080)
  SOCKSRELAY_MAX_CONNECTIONS    - Maximum concurrent connections
  SOCKSRELAY_CONNECTION_TIMEOUT - Relay idle timeout (e.g., 5m, 30s)
  SOCKSRELAY_BUFFER_SIZE        - Relay chunk size in bytes
  SOCKSRELAY_FILTER             - Payload filter (off, simple)
  SOCKSRELAY_LOG_LEVEL          - Log level (trace, debug, info, warn, error)
")]
pub struct CliArgs {
    #[arg(short, long, default_value = "config.toml", help = "Path to configuration file")]
    pub config: PathBuf,

    #[arg(short, long, help = "Bind address (e.g., 127.0.0.1:1080)")]
    pub bind: Option<String>,

    #[arg(short, long, help = "Port to bind to")]
    pub port: Option<u16>,

    #[arg(long, help = "Log level")]
    pub log_level: Option<String>,

    #[arg(short, long, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(long, help = "Maximum number of concurrent connections")]
    pub max_connections: Option<usize>,

    #[arg(long, help = "Relay idle timeout in seconds")]
    pub timeout: Option<u64>,

    #[arg(long, help = "Relay chunk size in bytes")]
    pub buffer_size: Option<usize>,

    #[arg(long, help = "Payload filter for target -> client traffic (off, simple)")]
    pub filter: Option<FilterMode>,

    #[arg(long, help = "Validate configuration and exit")]
    pub validate_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    let mut config = ConfigManager::load(&args.config)?;
    init_tracing(effective_level(
        args.verbose,
        args.log_level.as_deref(),
        &config.log_level,
    ))?;

    info!("Starting socksrelay v{}", env!("CARGO_PKG_VERSION"));

    config.merge_with_cli_args(
        args.bind.as_deref(),
        args.port,
        args.max_connections,
        args.timeout,
        args.buffer_size,
        args.filter,
    );

    config
        .validate()
        .context("Final configuration validation failed")?;

    if args.validate_config {
        info!("Configuration is valid");
        info!("  Bind address: {}", config.server.bind_addr);
        info!("  Max connections: {}", config.server.max_connections);
        info!("  Buffer size: {} bytes", config.server.buffer_size);
        info!("  Handshake timeout: {:?}", config.server.handshake_timeout);
        info!("  Relay idle timeout: {:?}", config.server.connection_timeout);
        info!("  Filter: {:?}", config.filter.mode);
        return Ok(());
    }

    let shutdown_coordinator = ShutdownCoordinator::new();
    let manager = Arc::new(ConnectionManager::bind(Arc::new(config)).await?);
    info!("Proxy listening on {}", manager.local_addr()?);

    let mut shutdown_rx = shutdown_coordinator.subscribe();

    let server = Arc::clone(&manager);
    let server_handle = tokio::spawn(async move {
        tokio::select! {
            result = server.run() => {
                if let Err(e) = result {
                    error!("Server error: {}", e);
                }
            }
            _ = shutdown_rx.recv() => {
                info!("Server task received shutdown signal");
                if let Err(e) = server.shutdown().await {
                    error!("Error during connection cleanup: {}", e);
                }
            }
        }
    });

    info!("Press Ctrl+C or send SIGTERM to shut down");
    if let Err(e) = shutdown_coordinator.listen_for_signals().await {
        error!("Error setting up signal handlers: {}", e);
        shutdown_coordinator.trigger();
    }

    info!("Initiating graceful shutdown...");

    if let Err(e) = server_handle.await {
        if !e.is_cancelled() {
            error!("Server task failed: {}", e);
        }
    }

    info!("Server shutdown complete");
    Ok(())
}
