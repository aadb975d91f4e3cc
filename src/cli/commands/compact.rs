//! Compact command implementation.

use crate::core::config::Config;
use crate::core::runtime::open_log;
use crate::ops::observability::StoreMetrics;
use anyhow::{Context, Result};
use clap::Args;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Run one compaction pass.
#[derive(Args, Debug)]
pub struct CompactArgs {
    /// Output format (text, json).
    #[arg(long, default_value = "text")]
    pub format: String,
}

/// Run the compact command.
pub async fn run_compact(args: CompactArgs, config: Config) -> Result<()> {
    let cancel = CancellationToken::new();
    let (driver, log) = open_log(&config, Arc::new(StoreMetrics::new()), &cancel)
        .await
        .context("failed to open database")?;

    let report = log.do_compact().await.context("compaction failed")?;
    driver.close();

    match args.format.as_str() {
        "json" => {
            let json = serde_json::json!({
                "from": report.from,
                "compact_revision": report.compact_revision,
                "current_revision": report.current_revision,
                "deleted": report.deleted,
            });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        _ => {
            if report.is_noop() {
                println!("Nothing to compact (floor {})", report.compact_revision);
            } else {
                println!(
                    "Compacted {} -> {} ({} rows deleted, current revision {})",
                    report.from, report.compact_revision, report.deleted, report.current_revision
                );
            }
        }
    }
    Ok(())
}
