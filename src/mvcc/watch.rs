//! Watch polling.
//!
//! A single poll task owns the delivery cursor. It wakes on the earliest of
//! {poll tick, append notification, cancellation}, reads rows after the
//! cursor, and publishes the contiguous prefix of them as one batch.
//!
//! Revisions must arrive as `last + 1`. A missing revision is usually a
//! writer that has been assigned an id but not yet committed; the poller
//! retries quickly, then waits, and once the hole has persisted past the
//! gap threshold writes a placeholder row so delivery can move on.
//! Placeholders advance the cursor but are never published.

use crate::mvcc::event::{rows_to_events, Event};
use crate::ops::observability::StoreMetrics;
use crate::storage::dialect::Dialect;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Key interest of one watch subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchFilter {
    key: String,
    prefix: bool,
}

impl WatchFilter {
    /// A key ending in `/` watches everything below it; anything else
    /// watches exactly that key.
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        let prefix = key.ends_with('/');
        Self { key, prefix }
    }

    pub fn matches_key(&self, key: &str) -> bool {
        if self.prefix {
            key.starts_with(&self.key)
        } else {
            key == self.key
        }
    }

    /// Events of interest, in order.
    pub fn filter(&self, events: &[Event]) -> Vec<Event> {
        events
            .iter()
            .filter(|e| self.matches_key(&e.kv.key))
            .cloned()
            .collect()
    }
}

/// What to do about a missing revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GapAction {
    /// First sighting: poll again right away.
    Retry,
    /// Still within the threshold: wait for the writer to commit.
    Wait,
    /// The hole has persisted: write a placeholder.
    Fill,
}

/// Tracks the single revision the poller is currently stuck on.
#[derive(Debug, Clone)]
pub struct GapTracker {
    threshold: Duration,
    pending: Option<(i64, Instant)>,
}

impl GapTracker {
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            pending: None,
        }
    }

    /// Record that `missing` was expected but not found.
    pub fn observe(&mut self, missing: i64, now: Instant) -> GapAction {
        match self.pending {
            Some((revision, since)) if revision == missing => {
                if now.saturating_duration_since(since) >= self.threshold {
                    GapAction::Fill
                } else {
                    GapAction::Wait
                }
            }
            _ => {
                self.pending = Some((missing, now));
                GapAction::Retry
            }
        }
    }

    /// The cursor reached `revision`; forget gaps at or below it.
    pub fn advance(&mut self, revision: i64) {
        if matches!(self.pending, Some((missing, _)) if missing <= revision) {
            self.pending = None;
        }
    }

    /// Revision currently being waited on.
    pub fn pending(&self) -> Option<i64> {
        self.pending.map(|(revision, _)| revision)
    }
}

/// Poll loop settings.
#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    pub interval: Duration,
    pub batch_size: i64,
    pub gap_threshold: Duration,
}

/// The poll task. Owns the delivery cursor.
pub(crate) struct Poller {
    dialect: Arc<dyn Dialect>,
    metrics: Arc<StoreMetrics>,
    notify_tx: mpsc::Sender<i64>,
    notify_rx: Arc<Mutex<mpsc::Receiver<i64>>>,
    output: mpsc::Sender<Arc<[Event]>>,
    cancel: CancellationToken,
    settings: PollSettings,
    gaps: GapTracker,
    last: i64,
}

impl Poller {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        dialect: Arc<dyn Dialect>,
        metrics: Arc<StoreMetrics>,
        notify_tx: mpsc::Sender<i64>,
        notify_rx: Arc<Mutex<mpsc::Receiver<i64>>>,
        output: mpsc::Sender<Arc<[Event]>>,
        cancel: CancellationToken,
        settings: PollSettings,
        start: i64,
    ) -> Self {
        Self {
            dialect,
            metrics,
            notify_tx,
            notify_rx,
            output,
            cancel,
            gaps: GapTracker::new(settings.gap_threshold),
            settings,
            last: start,
        }
    }

    pub(crate) async fn run(mut self) {
        let mut notify = self.notify_rx.clone().lock_owned().await;
        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::debug!(start = self.last, "watch poller started");

        let mut wait_for_more = true;
        loop {
            if wait_for_more {
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    check = notify.recv() => match check {
                        Some(revision) if revision <= self.last => continue,
                        Some(_) => {}
                        None => break,
                    },
                    _ = ticker.tick() => {}
                }
            }
            if self.cancel.is_cancelled() {
                break;
            }

            wait_for_more = true;
            let rows = match self.dialect.after(self.last, self.settings.batch_size).await {
                Ok(set) => set.rows,
                Err(e) => {
                    tracing::error!(revision = self.last, error = %e, "failed to list latest changes");
                    continue;
                }
            };
            let full_batch = rows.len() as i64 >= self.settings.batch_size;

            let (batch, stalled) = self.sequence(rows_to_events(rows)).await;
            wait_for_more = stalled || !full_batch;

            if !batch.is_empty() && self.output.send(batch.into()).await.is_err() {
                break;
            }
        }
        tracing::debug!(last = self.last, "watch poller stopped");
    }

    /// Advance the cursor over the contiguous prefix of `events`.
    ///
    /// Returns the deliverable events and whether a gap stopped the walk.
    async fn sequence(&mut self, events: Vec<Event>) -> (Vec<Event>, bool) {
        let mut revision = self.last;
        let mut deliver = Vec::with_capacity(events.len());
        let mut stalled = false;

        for event in events {
            let next = revision + 1;
            if event.revision() != next {
                stalled = true;
                self.on_gap(next, event.revision()).await;
                break;
            }
            revision = next;
            if self.dialect.is_fill(&event.kv.key) {
                tracing::trace!(revision, "skipping gap placeholder");
            } else {
                deliver.push(event);
            }
        }

        if revision > self.last {
            self.last = revision;
            self.gaps.advance(revision);
        }
        (deliver, stalled)
    }

    async fn on_gap(&mut self, missing: i64, seen: i64) {
        match self.gaps.observe(missing, Instant::now()) {
            GapAction::Retry => {
                tracing::debug!(expected = missing, got = seen, "revision gap, retrying");
                let _ = self.notify_tx.try_send(missing);
            }
            GapAction::Wait => {
                tracing::trace!(expected = missing, got = seen, "waiting on revision gap");
            }
            GapAction::Fill => match self.dialect.fill(missing).await {
                Ok(()) => {
                    tracing::debug!(revision = missing, "filled revision gap");
                    self.metrics.record_gap_fill();
                    let _ = self.notify_tx.try_send(missing);
                }
                Err(e) => {
                    tracing::debug!(revision = missing, error = %e, "gap fill failed");
                }
            },
        }
    }
}
