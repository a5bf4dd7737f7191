//! watchdog - HTTP health checks with alerting
//!
//! Main entry point for the CLI and the monitoring service.

mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use tracing::debug;

use cli::{Cli, Commands};
use watchdog::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let dotenv = dotenvy::dotenv();
    let cli = Cli::parse();

    let config = Config::from_config(cli.config.as_deref())?.with_env_overrides();
    logger::init_tracing_with(config.logging.level_filter(), config.logging.log_format());

    if let Ok(path) = dotenv {
        debug!("Loaded environment from {}", path.display());
    }

    commands::execute(cli.command.unwrap_or(Commands::Run), config).await
}
