//! Tracing setup shared by the binaries.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::Result;

/// Pick the effective level: `--verbose` wins, then the CLI flag, then config
pub fn effective_level<'a>(verbose: bool, cli_level: Option<&'a str>, config_level: &'a str) -> &'a str {
    if verbose {
        "debug"
    } else {
        cli_level.unwrap_or(config_level)
    }
}

/// Install the global subscriber. `RUST_LOG` overrides `log_level`.
pub fn init_tracing(log_level: &str) -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(true)
                .with_level(true),
        )
        .with(env_filter)
        .try_init()?;

    Ok(())
}
