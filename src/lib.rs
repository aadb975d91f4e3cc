//! kinestore - SQL-backed, revisioned key-value log.
//!
//! kinestore makes an ordinary SQL table behave like an etcd-style MVCC
//! store: every mutation appends a row whose id is its revision, reads can
//! be served at any retained revision, watchers receive contiguous event
//! batches, and a background compactor trims superseded history.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                            SQL Log                              │
//! │   List │ Watch (poll + broadcast) │ Count │ Append │ Compact    │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │  Dialect
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       Generic SQL Driver                        │
//! │        statements │ connection pool │ jittered retry            │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       Admission Control                         │
//! │              allow-all │ limit (fail-fast semaphore)            │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//!                          backing SQL engine
//! ```
//!
//! # Module Organization
//!
//! ## Core
//! - [`core::config`] - Configuration parsing and validation
//! - [`core::runtime`] - Store lifecycle
//! - [`core::error`] - Error types and etcd-facing mapping
//!
//! ## Storage
//! - [`storage::dialect`] - Contract between the log and an engine
//! - [`storage::generic`] - SQL driver
//! - [`storage::admission`] - Admission control
//! - [`storage::pool`] - Connection pool
//! - [`storage::retry`] - Transient-error retry
//!
//! ## MVCC
//! - [`mvcc::sql_log`] - The log's public operations
//! - [`mvcc::watch`] - Watch polling and gap healing
//! - [`mvcc::compaction`] - Compaction passes
//!
//! ## Operations
//! - [`ops::observability`] - Metrics
//!
//! ## CLI
//! - [`cli::commands`] - CLI command implementations
//!
//! # Key Invariants
//!
//! - Revisions are engine-assigned, strictly increasing and never reused
//! - Watch streams are contiguous by revision; gaps are filled, never skipped
//! - Reads below the compaction floor fail with `Compacted`
//! - Compaction leaves the newest 1000 revisions and the sentinel row alone

// Core infrastructure
pub mod core;

// Storage layer
pub mod storage;

// MVCC log
pub mod mvcc;

// Operations and observability
pub mod ops;

// CLI
pub mod cli;

// Re-exports for convenience
pub use self::core::{config, error, runtime};
pub use mvcc::{Event, KeyValue, SqlLog};
pub use ops::observability;
pub use storage::{Dialect, GenericDriver};
