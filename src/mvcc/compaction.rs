//! Log compaction.
//!
//! Compaction walks revisions from the persisted floor up to
//! `current - 1000`. For every row that superseded an earlier version the
//! earlier row is deleted; tombstones are deleted once the cursor has moved
//! past them. The floor lives in the `compact_rev_key` sentinel row and is
//! saved before each deletion point and once at the end of the pass, so an
//! interrupted pass resumes where it stopped.
//!
//! Any failure aborts the pass. Nothing is lost: the next pass starts from
//! the last saved floor.

use crate::core::error::{StoreError, StoreResult};
use crate::mvcc::event::Event;
use crate::mvcc::revision::RevisionState;
use crate::ops::observability::StoreMetrics;
use crate::storage::dialect::{Dialect, NewRow, Row};
use crate::storage::schema::COMPACT_REV_KEY;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Outcome of one compaction pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactionReport {
    /// Floor before the pass.
    pub from: i64,
    /// Floor after the pass.
    pub compact_revision: i64,
    /// Current revision when the pass started.
    pub current_revision: i64,
    /// Rows deleted.
    pub deleted: u64,
}

impl CompactionReport {
    /// True if the pass changed nothing.
    pub fn is_noop(&self) -> bool {
        self.from == self.compact_revision && self.deleted == 0
    }
}

/// Make sure exactly one sentinel row exists.
///
/// Returns the revision of a newly created sentinel, if one was created.
pub async fn compact_start(dialect: &dyn Dialect) -> StoreResult<Option<i64>> {
    let sentinels = dialect.after_prefix(COMPACT_REV_KEY, 0, 0).await?.rows;
    match sentinels.len() {
        0 => {
            let row = NewRow {
                name: COMPACT_REV_KEY.to_string(),
                created: true,
                ..NewRow::default()
            };
            match dialect.insert(row).await {
                Ok(revision) => {
                    tracing::info!(revision, "created compaction sentinel");
                    Ok(Some(revision))
                }
                // Another starter created it first.
                Err(StoreError::KeyExists { .. }) => Ok(None),
                Err(e) => Err(e),
            }
        }
        1 => Ok(None),
        n => {
            let keep = sentinel_to_keep(&sentinels);
            tracing::warn!(rows = n, keep, "repairing duplicate compaction sentinel");
            for row in sentinels.iter().filter(|row| row.id != keep) {
                dialect.delete_revision(row.id).await?;
            }
            Ok(None)
        }
    }
}

/// The sentinel that carries the furthest floor, or the newest one if none
/// has recorded a floor yet.
pub fn sentinel_to_keep(sentinels: &[Row]) -> i64 {
    sentinels
        .iter()
        .filter(|row| row.prev_revision > 0)
        .max_by_key(|row| (row.prev_revision, row.id))
        .or_else(|| sentinels.iter().max_by_key(|row| row.id))
        .map_or(0, |row| row.id)
}

/// Run one compaction pass.
pub async fn do_compact(
    dialect: &dyn Dialect,
    metrics: &StoreMetrics,
) -> StoreResult<CompactionReport> {
    let (compact, current) = dialect.get_compact_revision().await?;
    let state = RevisionState::new(current, compact);
    let end = state.compaction_end();

    let mut report = CompactionReport {
        from: compact,
        compact_revision: compact,
        current_revision: current,
        deleted: 0,
    };
    if compact > end {
        metrics.set_revisions(current, compact);
        return Ok(report);
    }

    let mut saved = compact;
    let mut cursor = compact;
    while cursor <= end {
        let Some(row) = dialect.get_revision(cursor).await?.rows.into_iter().next() else {
            cursor += 1;
            continue;
        };
        if row.name == COMPACT_REV_KEY {
            cursor += 1;
            continue;
        }

        let event = Event::from(row);
        let prev = event.prev_revision();
        if prev != 0 {
            if saved != cursor {
                dialect.set_compact_revision(cursor).await?;
                saved = cursor;
            }
            dialect.delete_revision(prev).await?;
            report.deleted += 1;
        }
        if event.delete {
            if saved != cursor {
                dialect.set_compact_revision(cursor).await?;
                saved = cursor;
            }
            dialect.delete_revision(cursor).await?;
            report.deleted += 1;
        }
        cursor += 1;
    }

    if saved != cursor {
        dialect.set_compact_revision(cursor).await?;
    }
    report.compact_revision = cursor;
    metrics.record_compaction_deleted(report.deleted);
    metrics.set_revisions(current, cursor);
    tracing::info!(
        from = report.from,
        to = cursor,
        deleted = report.deleted,
        "compaction pass complete"
    );
    Ok(report)
}

/// Periodic compaction until `cancel` fires.
pub(crate) async fn run_compactor(
    dialect: Arc<dyn Dialect>,
    metrics: Arc<StoreMetrics>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        if let Err(e) = do_compact(dialect.as_ref(), &metrics).await {
            tracing::error!(error = %e, "compaction failed");
        }
    }
    tracing::debug!("compactor stopped");
}
