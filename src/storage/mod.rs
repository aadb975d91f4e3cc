//! Storage layer.
//!
//! Everything between the SQL log and the backing engine: the
//! [`Dialect`] contract, the generic SQL driver that implements it,
//! admission control, connection pooling and transient-error retry.
//!
//! # Modules
//!
//! - [`dialect`] - Storage contract consumed by the SQL log
//! - [`generic`] - SQL driver implementing the contract
//! - [`admission`] - Fail-fast concurrency gate in front of every call
//! - [`engine`] - Per-engine retry/translation/setup strategies
//! - [`pool`] - Bounded connection pool
//! - [`retry`] - Jittered in-place retry
//! - [`schema`] - Table definition and statements
//!
//! # Invariants
//!
//! - Engine error types never cross this module boundary
//! - A denied call issues no SQL
//! - Revisions are assigned by the engine and never reused

pub mod admission;
pub mod dialect;
pub mod engine;
pub mod generic;
pub mod pool;
pub mod retry;
pub mod schema;

// Re-exports for convenience
pub use admission::{AdmissionControl, AdmissionGuard, AdmissionPolicy};
pub use dialect::{Dialect, NewRow, Row, RowSet};
pub use engine::Engine;
pub use generic::GenericDriver;
pub use pool::{ConnectionPool, PoolLimits};
pub use retry::RetryPolicy;
pub use schema::{COMPACT_REV_KEY, GAP_KEY_PREFIX};
