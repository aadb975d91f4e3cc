//! Revision bookkeeping.
//!
//! Revisions are `kine` row ids: engine-assigned, strictly increasing and
//! never reused. The compaction floor is persisted in the sentinel row's
//! `prev_revision`; reads below it cannot be answered faithfully.

use crate::core::error::{StoreError, StoreResult};

/// Revisions compaction always leaves untouched at the head of the log.
pub const COMPACT_RETAIN_REVISIONS: i64 = 1000;

/// Current revision and compaction floor, read together.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RevisionState {
    /// Highest assigned revision.
    pub current: i64,
    /// Compaction floor.
    pub compact: i64,
}

impl RevisionState {
    pub const fn new(current: i64, compact: i64) -> Self {
        Self { current, compact }
    }

    /// Check if a historical read at `revision` hits compacted history.
    ///
    /// Revision 0 means "current" and is never compacted.
    pub const fn is_compacted(&self, revision: i64) -> bool {
        revision > 0 && revision < self.compact
    }

    /// Fail with [`StoreError::Compacted`] for reads below the floor.
    pub fn check(&self, revision: i64) -> StoreResult<()> {
        if self.is_compacted(revision) {
            return Err(StoreError::compacted(revision, self.compact));
        }
        Ok(())
    }

    /// Last revision a compaction pass may touch.
    pub const fn compaction_end(&self) -> i64 {
        self.current - COMPACT_RETAIN_REVISIONS
    }
}

impl std::fmt::Display for RevisionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "rev:{} compact:{}", self.current, self.compact)
    }
}
