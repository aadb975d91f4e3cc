//! MVCC log over a SQL table.
//!
//! # Modules
//!
//! - [`sql_log`] - List/Watch/Count/Append/Compact entry points
//! - [`event`] - Row to event conversion
//! - [`revision`] - Compaction floor checks
//! - [`watch`] - Watch filters, gap tracking and the poll task
//! - [`broadcaster`] - Fan-out of poll batches to subscribers
//! - [`compaction`] - Sentinel bootstrap and compaction passes
//!
//! # Invariants
//!
//! - Delivered events are contiguous by revision within a stream
//! - Gap placeholders are never delivered
//! - Reads below the compaction floor fail with `Compacted`
//! - The most recent 1000 revisions and the sentinel row are never compacted

pub mod broadcaster;
pub mod compaction;
pub mod event;
pub mod revision;
pub mod sql_log;
pub mod watch;

pub use compaction::CompactionReport;
pub use event::{Event, EventType, KeyValue};
pub use revision::{RevisionState, COMPACT_RETAIN_REVISIONS};
pub use sql_log::{SqlLog, WatchStream};
pub use watch::{GapAction, GapTracker, WatchFilter};
