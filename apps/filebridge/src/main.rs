//! filebridge command-line entry point.

mod app;
mod cli;
mod config;

use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = cli::Cli::parse();

    let mut config = config::load(cli.config.as_deref())?;
    cli.apply(&mut config);
    tracing::debug!(?config, "configuration loaded");

    let rt = tokio::runtime::Runtime::new()?;
    let result = rt.block_on(app::run(cli.command, config));
    // A pending stdin prompt would otherwise keep the runtime alive.
    rt.shutdown_timeout(Duration::from_millis(100));
    result
}
