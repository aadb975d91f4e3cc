//! The contract between the SQL log and a backing engine.
//!
//! [`crate::mvcc::SqlLog`] needs nothing from an engine beyond this trait.
//! [`crate::storage::GenericDriver`] is the SQL implementation; tests may
//! supply their own.

use crate::core::error::StoreResult;
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

/// One `kine` table row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    /// Revision assigned by the engine.
    pub id: i64,
    /// Key.
    pub name: String,
    pub created: bool,
    pub deleted: bool,
    /// Id of the row that first created this key.
    pub create_revision: i64,
    /// Id of the previous version of this key, 0 if none.
    pub prev_revision: i64,
    pub lease: i64,
    pub value: Bytes,
    /// Value of the previous version.
    pub old_value: Bytes,
}

/// Rows plus the revision bookkeeping read in the same statement.
#[derive(Debug, Clone, Default)]
pub struct RowSet {
    /// Highest revision at the time of the read.
    pub current_revision: i64,
    /// Compaction floor at the time of the read.
    pub compact_revision: i64,
    pub rows: Vec<Row>,
}

/// A row to append. The engine assigns the id.
#[derive(Debug, Clone, Default)]
pub struct NewRow {
    pub name: String,
    pub created: bool,
    pub deleted: bool,
    pub create_revision: i64,
    pub prev_revision: i64,
    pub lease: i64,
    pub value: Bytes,
    pub old_value: Bytes,
}

/// Operations the SQL log requires from a backing engine.
///
/// Prefix arguments follow [`crate::storage::schema::prefix_range`]: a
/// trailing `/` selects a directory, anything else a single key.
#[async_trait]
pub trait Dialect: Send + Sync + 'static {
    /// Latest version of each key under `prefix`.
    async fn list_current(
        &self,
        prefix: &str,
        limit: i64,
        include_deleted: bool,
    ) -> StoreResult<RowSet>;

    /// Version of each key under `prefix` as of `revision`, starting at
    /// `start_key` (inclusive, empty for the beginning of the range).
    async fn list(
        &self,
        prefix: &str,
        start_key: &str,
        limit: i64,
        revision: i64,
        include_deleted: bool,
    ) -> StoreResult<RowSet>;

    /// `(current revision, live key count)` under `prefix` as of
    /// `revision` (0 for current).
    async fn count(&self, prefix: &str, revision: i64) -> StoreResult<(i64, i64)>;

    /// Highest assigned revision, 0 for an empty table.
    async fn current_revision(&self) -> StoreResult<i64>;

    /// Rows under `prefix` with `id > revision`, oldest first.
    async fn after_prefix(&self, prefix: &str, revision: i64, limit: i64) -> StoreResult<RowSet>;

    /// Rows with `id > revision`, oldest first.
    async fn after(&self, revision: i64, limit: i64) -> StoreResult<RowSet>;

    /// Append a row and return its revision.
    async fn insert(&self, row: NewRow) -> StoreResult<i64>;

    /// The row at exactly `revision`, if it still exists.
    async fn get_revision(&self, revision: i64) -> StoreResult<RowSet>;

    async fn delete_revision(&self, revision: i64) -> StoreResult<()>;

    /// `(compact revision, current revision)`.
    async fn get_compact_revision(&self) -> StoreResult<(i64, i64)>;

    async fn set_compact_revision(&self, revision: i64) -> StoreResult<()>;

    /// Insert a gap placeholder row at exactly `revision`.
    async fn fill(&self, revision: i64) -> StoreResult<()>;

    /// Returns true if `key` names a gap placeholder.
    fn is_fill(&self, key: &str) -> bool;

    /// Database size in bytes.
    async fn get_size(&self) -> StoreResult<i64>;

    fn compact_interval(&self) -> Duration;

    fn poll_interval(&self) -> Duration;
}
