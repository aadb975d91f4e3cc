//! Command-line interface.
//!
//! Unified CLI for kinestore operations.

pub mod commands;

use crate::core::config::{Config, ConfigOverrides};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::Path;

/// kinestore - SQL-backed revisioned key-value log.
#[derive(Parser, Debug)]
#[command(name = "kinestore")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path.
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Database path, overriding `database.path`.
    #[arg(long, global = true)]
    pub database: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the store until interrupted.
    Start(commands::StartArgs),
    /// Show revisions, key count and size.
    Status(commands::StatusArgs),
    /// Run one compaction pass.
    Compact(commands::CompactArgs),
    /// Configuration operations.
    Config(commands::ConfigArgs),
}

impl Cli {
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            log_level: self.log_level.clone(),
            database: self.database.clone(),
        }
    }
}

/// Load the configuration file if it exists (defaults otherwise), then
/// apply overrides and validate.
pub fn load_config(path: &Path, overrides: &ConfigOverrides) -> Result<Config> {
    let mut config = if path.exists() {
        Config::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?
    } else {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        Config::default()
    };
    config.apply_overrides(overrides);
    config.validate().context("invalid configuration")?;
    Ok(config)
}
