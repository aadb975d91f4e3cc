//! Status command implementation.

use crate::core::config::Config;
use crate::core::runtime::open_log;
use crate::ops::observability::StoreMetrics;
use crate::storage::Dialect;
use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Show revisions, key count and size.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Key prefix whose live keys are counted.
    #[arg(long, default_value = "/")]
    pub prefix: String,

    /// Output format (text, json).
    #[arg(long, default_value = "text")]
    pub format: String,
}

/// Store status snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub database: String,
    pub current_revision: i64,
    pub compact_revision: i64,
    pub prefix: String,
    pub keys: i64,
    pub size_bytes: i64,
}

/// Run the status command.
pub async fn run_status(args: StatusArgs, config: Config) -> Result<()> {
    let report = collect(&args.prefix, &config).await?;
    match args.format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&report)?),
        _ => print_text(&report), // Default to text output
    }
    Ok(())
}

async fn collect(prefix: &str, config: &Config) -> Result<StatusReport> {
    let cancel = CancellationToken::new();
    let (driver, log) = open_log(config, Arc::new(StoreMetrics::new()), &cancel)
        .await
        .context("failed to open database")?;

    let (compact, current) = driver.get_compact_revision().await?;
    let (_, keys) = log.count(prefix, 0).await?;
    let size_bytes = log.db_size().await?;
    driver.close();

    Ok(StatusReport {
        database: config.database.path.clone(),
        current_revision: current,
        compact_revision: compact,
        prefix: prefix.to_string(),
        keys,
        size_bytes,
    })
}

fn print_text(report: &StatusReport) {
    println!("kinestore Status");
    println!("================");
    println!("Database:     {}", report.database);
    println!();
    println!("Revisions:");
    println!("  Current:    {}", report.current_revision);
    println!("  Compacted:  {}", report.compact_revision);
    println!();
    println!("Keys:");
    println!("  Prefix:     {}", report.prefix);
    println!("  Live:       {}", report.keys);
    println!();
    println!("Size:         {}", format_bytes(report.size_bytes));
}

fn format_bytes(bytes: i64) -> String {
    const KIB: f64 = 1024.0;
    let b = bytes as f64;
    if b >= KIB * KIB * KIB {
        format!("{:.1} GiB", b / (KIB * KIB * KIB))
    } else if b >= KIB * KIB {
        format!("{:.1} MiB", b / (KIB * KIB))
    } else if b >= KIB {
        format!("{:.1} KiB", b / KIB)
    } else {
        format!("{bytes} B")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_are_humanized() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(4096), "4.0 KiB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MiB");
    }
}
