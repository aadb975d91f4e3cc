//! Config command implementation.

use crate::core::config::Config;
use anyhow::Result;
use clap::{Args, Subcommand};

/// Configuration operations.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Validate the effective configuration.
    Validate,
    /// Print the effective configuration with defaults.
    Show {
        /// Output format (toml, json).
        #[arg(long, default_value = "toml")]
        format: String,
    },
}

/// Run the config command against an already loaded configuration.
pub fn run_config(args: ConfigArgs, config: &Config) -> Result<()> {
    match args.command {
        ConfigCommand::Validate => validate_config(config),
        ConfigCommand::Show { format } => show_config(config, &format),
    }
}

fn validate_config(config: &Config) -> Result<()> {
    config.validate()?;
    println!("✓ Configuration is valid");
    println!("  database:  {}", config.database.path);
    println!("  admission: {:?}", config.admission.resolve());
    if !matches!(config.admission.policy.as_str(), "allow-all" | "limit") {
        println!(
            "  ⚠ Warning: unknown admission policy {:?}, using allow-all",
            config.admission.policy
        );
    }
    Ok(())
}

fn show_config(config: &Config, format: &str) -> Result<()> {
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(config)?),
        _ => print!("{}", render_toml(config)?), // Default to TOML output
    }
    Ok(())
}

fn render_toml(config: &Config) -> Result<String> {
    Ok(toml::to_string_pretty(config)?)
}
