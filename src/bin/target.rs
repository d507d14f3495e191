//! socksrelay-target
//!
//! Toy target: answers every connection's first message with a fixed response.

use anyhow::Result;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;

use tracing::{error, info};

use socksrelay::config::ConfigManager;
use socksrelay::logging::{effective_level, init_tracing};
use socksrelay::{ShutdownCoordinator, TargetServer};

#[derive(Parser, Debug)]
#[command(name = "socksrelay-target")]
#[command(about = "Toy target server answering with a fixed response")]
#[command(version)]
pub struct CliArgs {
    #[arg(short, long, default_value = "config.toml", help = "Path to configuration file")]
    pub config: PathBuf,

    #[arg(short, long, help = "Bind address (e.g., 127.0.0.1:8888)")]
    pub bind: Option<SocketAddr>,

    #[arg(short, long, help = "Response sent to every client")]
    pub response: Option<String>,

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

    if let Some(bind) = args.bind {
        config.target.bind_addr = bind;
    }
    if let Some(response) = args.response {
        config.target.response = response;
    }
    config.validate()?;

    let server = TargetServer::bind(
        config.target.bind_addr,
        config.target.response.into_bytes(),
        config.server.buffer_size,
    )
    .await?;
    info!("Target listening on {}", server.local_addr()?);

    let shutdown_coordinator = ShutdownCoordinator::new();
    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Target server error: {}", e);
            }
        }
        result = shutdown_coordinator.listen_for_signals() => {
            if let Err(e) = result {
                error!("Error setting up signal handlers: {}", e);
            }
        }
    }

    info!("Target server stopped");
    Ok(())
}
