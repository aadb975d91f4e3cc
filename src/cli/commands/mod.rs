//! CLI command implementations.

mod compact;
mod config;
mod start;
mod status;

pub use compact::{run_compact, CompactArgs};
pub use config::{run_config, ConfigArgs, ConfigCommand};
pub use start::{init_tracing, run_start, StartArgs};
pub use status::{run_status, StatusArgs, StatusReport};
