//! socksrelay-client
//!
//! Opens a SOCKS5 tunnel to the target, sends one message and prints the answer.

use anyhow::{Context, Result};
use clap::Parser;
use std::net::{SocketAddr, SocketAddrV4};
use std::path::PathBuf;

use tracing::{error, info};

use socksrelay::config::ConfigManager;
use socksrelay::logging::{effective_level, init_tracing};
use socksrelay::protocol::Endpoint;
use socksrelay::Socks5Client;

#[derive(Parser, Debug)]
#[command(name = "socksrelay-client")]
#[command(about = "Send one message to a target through a SOCKS5 proxy")]
#[command(version)]
pub struct CliArgs {
    #[arg(short, long, default_value = "config.toml", help = "Path to configuration file")]
    pub config: PathBuf,

    #[arg(long, help = "Proxy address (e.g., 127.0.0.1:1080)")]
    pub proxy: Option<SocketAddr>,

    #[arg(long, help = "IPv4 target address (e.g., 127.0.0.1:8888)")]
    pub target: Option<SocketAddrV4>,

    #[arg(short, long, help = "Message to send")]
    pub message: Option<String>,

    #[arg(long, help = "Log level")]
    pub log_level: Option<String>,

    #[arg(short, long, help = "Enable verbose logging")]
    pub verbose: bool,
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

    if let Some(proxy) = args.proxy {
        config.client.proxy_addr = proxy;
    }
    if let Some(target) = args.target {
        config.client.target_addr = target;
    }
    if let Some(message) = args.message {
        config.client.message = message;
    }
    config
        .validate()
        .context("Final configuration validation failed")?;

    let client = Socks5Client::new(config.client.proxy_addr)
        .with_buffer_size(config.server.buffer_size);
    let target = Endpoint::from(config.client.target_addr);

    let (mut stream, _) = match client.connect(target).await {
        Ok(tunnel) => tunnel,
        Err(e) if e.is_rejection() => {
            error!("Proxy refused the tunnel: {}", e);
            return Err(e.into());
        }
        Err(e) => {
            error!("Could not reach {} through the proxy: {}", target, e);
            return Err(e.into());
        }
    };

    info!("Sending: {:?}", config.client.message);
    let answer = client
        .exchange(&mut stream, config.client.message.as_bytes())
        .await
        .context("Exchange with target failed")?;

    let answer = String::from_utf8_lossy(&answer);
    info!("Received: {:?}", answer);
    println!("{}", answer);

    Ok(())
}
