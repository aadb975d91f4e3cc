//! kinestore - unified CLI entrypoint.
//!
//! Usage:
//!   kinestore start --config config/kinestore.toml
//!   kinestore status [--format json]
//!   kinestore compact --database data/kine.db
//!   kinestore config validate|show

use anyhow::Result;
use clap::Parser;
use kinestore::cli::commands::{init_tracing, run_compact, run_config, run_start, run_status};
use kinestore::cli::{load_config, Cli, Commands};
use std::path::PathBuf;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Determine config path - use global --config or default
    let config_path = cli
        .config
        .clone()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config/kinestore.toml"));

    let config = load_config(&config_path, &cli.overrides())?;
    init_tracing(&config.telemetry.log_level);

    match cli.command {
        Commands::Start(args) => run_start(args, config).await,
        Commands::Status(args) => run_status(args, config).await,
        Commands::Compact(args) => run_compact(args, config).await,
        Commands::Config(args) => run_config(args, &config),
    }
}
