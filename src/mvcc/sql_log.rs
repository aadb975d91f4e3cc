//! The SQL log.
//!
//! Etcd-style List/Watch/Count/Append/Compact on top of any [`Dialect`].
//! The log owns two background tasks, both parented to the store-lifetime
//! cancellation token:
//!
//! - the watch poller, started by the first `watch` call
//! - the compactor, started by `start` or the first `watch` call
//!
//! Appends and lists push the latest revision onto a bounded notification
//! queue so the poller wakes early. The queue is best-effort; the poll
//! tick is what guarantees progress.

use crate::core::config::LogConfig;
use crate::core::error::StoreResult;
use crate::mvcc::broadcaster::Broadcaster;
use crate::mvcc::compaction::{self, CompactionReport};
use crate::mvcc::event::{rows_to_events, Event};
use crate::mvcc::revision::RevisionState;
use crate::mvcc::watch::{PollSettings, Poller, WatchFilter};
use crate::ops::observability::StoreMetrics;
use crate::storage::dialect::{Dialect, RowSet};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A stream of event batches for one watch.
pub type WatchStream = mpsc::Receiver<Vec<Event>>;

struct LogInner {
    dialect: Arc<dyn Dialect>,
    metrics: Arc<StoreMetrics>,
    config: LogConfig,
    cancel: CancellationToken,
    notify_tx: mpsc::Sender<i64>,
    notify_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<i64>>>,
    broadcaster: Broadcaster<Arc<[Event]>>,
    compactor_started: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Revisioned key-value log over a SQL table.
#[derive(Clone)]
pub struct SqlLog {
    inner: Arc<LogInner>,
}

impl std::fmt::Debug for SqlLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlLog")
            .field("config", &self.inner.config)
            .field("cancelled", &self.inner.cancel.is_cancelled())
            .finish()
    }
}

impl SqlLog {
    /// Create a log. Background tasks stop when `cancel` fires.
    pub fn new(
        dialect: Arc<dyn Dialect>,
        config: LogConfig,
        metrics: Arc<StoreMetrics>,
        cancel: CancellationToken,
    ) -> Self {
        let (notify_tx, notify_rx) = mpsc::channel(config.notify_queue_capacity.max(1));
        Self {
            inner: Arc::new(LogInner {
                broadcaster: Broadcaster::new(config.subscriber_buffer),
                dialect,
                metrics,
                config,
                cancel,
                notify_tx,
                notify_rx: Arc::new(tokio::sync::Mutex::new(notify_rx)),
                compactor_started: AtomicBool::new(false),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn dialect(&self) -> &Arc<dyn Dialect> {
        &self.inner.dialect
    }

    pub fn metrics(&self) -> &Arc<StoreMetrics> {
        &self.inner.metrics
    }

    /// Ensure the compaction sentinel exists and start the compactor.
    pub async fn start(&self) -> StoreResult<()> {
        self.compact_start().await?;
        self.spawn_compactor();
        Ok(())
    }

    /// Highest assigned revision.
    pub async fn current_revision(&self) -> StoreResult<i64> {
        self.inner.dialect.current_revision().await
    }

    /// Events under `prefix` with revision greater than `revision`.
    ///
    /// Returns the current revision alongside the events.
    pub async fn after(
        &self,
        prefix: &str,
        revision: i64,
        limit: i64,
    ) -> StoreResult<(i64, Vec<Event>)> {
        let set = self.inner.dialect.after_prefix(prefix, revision, limit).await?;
        let (state, events) = self.resolve(set).await?;
        state.check(revision)?;
        Ok((state.current, events))
    }

    /// Key versions under `prefix` as of `revision` (0 for current).
    ///
    /// A prefix ending in `/` lists a directory starting at `start_key`
    /// (inclusive); a `start_key` equal to the prefix means "from the
    /// beginning". Any other prefix names a single key and `start_key` is
    /// ignored.
    pub async fn list(
        &self,
        prefix: &str,
        start_key: &str,
        limit: i64,
        revision: i64,
        include_deleted: bool,
    ) -> StoreResult<(i64, Vec<Event>)> {
        let start_key = if prefix.ends_with('/') && start_key != prefix {
            start_key
        } else {
            ""
        };

        let dialect = &self.inner.dialect;
        let set = if revision == 0 {
            dialect.list_current(prefix, limit, include_deleted).await?
        } else {
            dialect
                .list(prefix, start_key, limit, revision, include_deleted)
                .await?
        };
        let (state, events) = self.resolve(set).await?;
        state.check(revision)?;

        let _ = self.inner.notify_tx.try_send(state.current);
        Ok((state.current, events))
    }

    /// Live keys under `prefix` as of `revision` (0 for current).
    pub async fn count(&self, prefix: &str, revision: i64) -> StoreResult<(i64, i64)> {
        if revision > 0 {
            let (compact, current) = self.inner.dialect.get_compact_revision().await?;
            RevisionState::new(current, compact).check(revision)?;
        }
        self.inner.dialect.count(prefix, revision).await
    }

    /// Append `event` and return its revision.
    pub async fn append(&self, event: &Event) -> StoreResult<i64> {
        let revision = self.inner.dialect.insert(event.to_new_row()).await?;
        let _ = self.inner.notify_tx.try_send(revision);
        Ok(revision)
    }

    /// Database size in bytes.
    pub async fn db_size(&self) -> StoreResult<i64> {
        self.inner.dialect.get_size().await
    }

    /// Run one compaction pass now.
    ///
    /// Creates the sentinel first if the log was never started, so the
    /// floor is always recorded.
    pub async fn do_compact(&self) -> StoreResult<CompactionReport> {
        self.compact_start().await?;
        compaction::do_compact(self.inner.dialect.as_ref(), &self.inner.metrics).await
    }

    /// Watch `prefix` until `cancel` fires.
    ///
    /// The first watch starts the poller at the compaction floor, so early
    /// subscribers see every retained revision.
    pub async fn watch(&self, prefix: &str, cancel: &CancellationToken) -> StoreResult<WatchStream> {
        let values = self
            .inner
            .broadcaster
            .subscribe(cancel, || self.start_watch())
            .await?;

        let filter = WatchFilter::new(prefix);
        let (tx, rx) = mpsc::channel(self.inner.config.subscriber_buffer.max(1));
        tokio::spawn(forward(values, filter, tx));
        Ok(rx)
    }

    /// Cancel background tasks and wait for them to exit.
    pub async fn stop(&self) {
        self.inner.cancel.cancel();
        let tasks: Vec<_> = self.inner.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "log task ended abnormally");
            }
        }
    }

    // ========================================================================
    // Internals
    // ========================================================================

    async fn compact_start(&self) -> StoreResult<()> {
        if let Some(revision) = compaction::compact_start(self.inner.dialect.as_ref()).await? {
            let _ = self.inner.notify_tx.try_send(revision);
        }
        Ok(())
    }

    async fn start_watch(&self) -> StoreResult<mpsc::Receiver<Arc<[Event]>>> {
        self.compact_start().await?;
        let (poll_start, _) = self.inner.dialect.get_compact_revision().await?;

        let (tx, rx) = mpsc::channel(1);
        let poller = Poller::new(
            self.inner.dialect.clone(),
            self.inner.metrics.clone(),
            self.inner.notify_tx.clone(),
            self.inner.notify_rx.clone(),
            tx,
            self.inner.cancel.clone(),
            PollSettings {
                interval: self.inner.dialect.poll_interval(),
                batch_size: self.inner.config.poll_batch_size,
                gap_threshold: self.inner.config.gap_fill_threshold(),
            },
            poll_start,
        );
        self.spawn_compactor();
        self.track(tokio::spawn(poller.run()));
        Ok(rx)
    }

    fn spawn_compactor(&self) {
        if self.inner.compactor_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let task = tokio::spawn(compaction::run_compactor(
            self.inner.dialect.clone(),
            self.inner.metrics.clone(),
            self.inner.dialect.compact_interval(),
            self.inner.cancel.clone(),
        ));
        self.track(task);
    }

    /// Keep `task` for `stop`, forgetting tasks that already exited.
    fn track(&self, task: JoinHandle<()>) {
        let mut tasks = self.inner.tasks.lock();
        tasks.retain(|t| !t.is_finished());
        tasks.push(task);
    }

    /// Events plus revision bookkeeping. Empty results carry no
    /// bookkeeping columns, so those are read separately.
    async fn resolve(&self, set: RowSet) -> StoreResult<(RevisionState, Vec<Event>)> {
        let state = if set.rows.is_empty() {
            let (compact, current) = self.inner.dialect.get_compact_revision().await?;
            RevisionState::new(current, compact)
        } else {
            RevisionState::new(set.current_revision, set.compact_revision)
        };
        self.inner.metrics.set_revisions(state.current, state.compact);
        Ok((state, rows_to_events(set.rows)))
    }
}

async fn forward(
    mut values: mpsc::Receiver<Arc<[Event]>>,
    filter: WatchFilter,
    tx: mpsc::Sender<Vec<Event>>,
) {
    while let Some(batch) = values.recv().await {
        let events = filter.filter(&batch);
        if events.is_empty() {
            continue;
        }
        if tx.send(events).await.is_err() {
            break;
        }
    }
}
