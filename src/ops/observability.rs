//! Metrics registry and store metrics.
//!
//! Metric namespaces:
//! - kine.sql.* (driver and admission control, labelled by operation name)
//! - kine.log.* (revision gauges, gap fills, compaction)
//!
//! Labels are rendered as dotted suffixes, e.g.
//! `kine.sql.operation_result_total.insert.success`.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

/// Stable metric names consumed by operational tooling.
pub mod metrics {
    /// Per-attempt SQL result counter (`.<op>.<success|fail>`).
    pub const SQL_TRANSACTION_RESULT: &str = "kine.sql.transaction_result_total";
    /// Per-call operation result counter (`.<op>.<success|fail>`).
    pub const SQL_OPERATION_RESULT: &str = "kine.sql.operation_result_total";
    /// Per-call latency histogram in milliseconds (`.<op>`).
    pub const SQL_OPERATION_LATENCY_MS: &str = "kine.sql.operation_latency_ms";
    /// Admitted-but-unreleased operations gauge (`.<op>`).
    pub const ADMISSION_IN_FLIGHT: &str = "kine.sql.admission_in_flight";
    /// Admission decisions counter (`.<op>.<accepted|denied>`).
    pub const ADMISSION_TOTAL: &str = "kine.sql.admission_total";
    /// Current revision gauge.
    pub const LOG_CURRENT_REVISION: &str = "kine.log.current_revision";
    /// Compaction floor gauge.
    pub const LOG_COMPACT_REVISION: &str = "kine.log.compact_revision";
    /// Gap placeholder rows written by the poller.
    pub const LOG_GAP_FILLS: &str = "kine.log.gap_fills_total";
    /// Rows removed by compaction.
    pub const LOG_COMPACTION_DELETED: &str = "kine.log.compaction_deleted_total";
}

/// Metrics registry.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    counters: RwLock<HashMap<String, AtomicU64>>,
    gauges: RwLock<HashMap<String, AtomicI64>>,
    histograms: RwLock<HashMap<String, HistogramData>>,
}

impl MetricsRegistry {
    /// Create a new metrics registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment a counter.
    pub fn counter_inc(&self, name: &str) {
        self.counter_add(name, 1);
    }

    /// Add to a counter.
    pub fn counter_add(&self, name: &str, value: u64) {
        {
            let counters = self.counters.read();
            if let Some(counter) = counters.get(name) {
                counter.fetch_add(value, Ordering::Relaxed);
                return;
            }
        }

        self.counters
            .write()
            .entry(name.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(value, Ordering::Relaxed);
    }

    /// Get counter value.
    pub fn counter_get(&self, name: &str) -> u64 {
        self.counters
            .read()
            .get(name)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Set a gauge value.
    pub fn gauge_set(&self, name: &str, value: i64) {
        {
            let gauges = self.gauges.read();
            if let Some(gauge) = gauges.get(name) {
                gauge.store(value, Ordering::Relaxed);
                return;
            }
        }

        self.gauges
            .write()
            .entry(name.to_string())
            .or_insert_with(|| AtomicI64::new(0))
            .store(value, Ordering::Relaxed);
    }

    /// Add a (possibly negative) delta to a gauge.
    pub fn gauge_add(&self, name: &str, delta: i64) {
        {
            let gauges = self.gauges.read();
            if let Some(gauge) = gauges.get(name) {
                gauge.fetch_add(delta, Ordering::Relaxed);
                return;
            }
        }

        self.gauges
            .write()
            .entry(name.to_string())
            .or_insert_with(|| AtomicI64::new(0))
            .fetch_add(delta, Ordering::Relaxed);
    }

    /// Get gauge value.
    pub fn gauge_get(&self, name: &str) -> i64 {
        self.gauges
            .read()
            .get(name)
            .map(|g| g.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Record a histogram observation.
    pub fn histogram_observe(&self, name: &str, value: f64) {
        {
            let histograms = self.histograms.read();
            if let Some(data) = histograms.get(name) {
                data.observe(value);
                return;
            }
        }

        self.histograms
            .write()
            .entry(name.to_string())
            .or_default()
            .observe(value);
    }

    /// Get histogram data.
    pub fn histogram_get(&self, name: &str) -> Option<HistogramSnapshot> {
        self.histograms.read().get(name).map(|h| h.snapshot())
    }

    /// Export metrics in Prometheus text format.
    pub fn export_prometheus(&self) -> String {
        let mut output = String::new();

        let mut counters: Vec<_> = self
            .counters
            .read()
            .iter()
            .map(|(name, v)| (prometheus_name(name), v.load(Ordering::Relaxed)))
            .collect();
        counters.sort();
        for (name, value) in counters {
            output.push_str(&format!("# TYPE {name} counter\n{name} {value}\n"));
        }

        let mut gauges: Vec<_> = self
            .gauges
            .read()
            .iter()
            .map(|(name, v)| (prometheus_name(name), v.load(Ordering::Relaxed)))
            .collect();
        gauges.sort();
        for (name, value) in gauges {
            output.push_str(&format!("# TYPE {name} gauge\n{name} {value}\n"));
        }

        let histograms = self.histograms.read();
        let mut names: Vec<_> = histograms.keys().collect();
        names.sort();
        for name in names {
            let snapshot = histograms[name].snapshot();
            let name = prometheus_name(name);
            output.push_str(&format!(
                "# TYPE {name} histogram\n{name}_count {}\n{name}_sum {}\n",
                snapshot.count, snapshot.sum
            ));
        }

        output
    }
}

fn prometheus_name(name: &str) -> String {
    name.replace(['.', '-'], "_")
}

#[derive(Debug)]
struct HistogramData {
    count: AtomicU64,
    stats: Mutex<HistogramStats>,
}

#[derive(Debug, Clone, Copy)]
struct HistogramStats {
    sum: f64,
    min: f64,
    max: f64,
}

impl Default for HistogramData {
    fn default() -> Self {
        Self {
            count: AtomicU64::new(0),
            stats: Mutex::new(HistogramStats {
                sum: 0.0,
                min: f64::MAX,
                max: f64::MIN,
            }),
        }
    }
}

impl HistogramData {
    fn observe(&self, value: f64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        let mut stats = self.stats.lock();
        stats.sum += value;
        stats.min = stats.min.min(value);
        stats.max = stats.max.max(value);
    }

    fn snapshot(&self) -> HistogramSnapshot {
        let stats = *self.stats.lock();
        HistogramSnapshot {
            count: self.count.load(Ordering::Relaxed),
            sum: stats.sum,
            min: stats.min,
            max: stats.max,
        }
    }
}

/// Histogram snapshot.
#[derive(Debug, Clone)]
pub struct HistogramSnapshot {
    /// Number of observations.
    pub count: u64,
    /// Sum of all observations.
    pub sum: f64,
    /// Minimum value observed.
    pub min: f64,
    /// Maximum value observed.
    pub max: f64,
}

impl HistogramSnapshot {
    /// Calculate mean.
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}

fn result_label(ok: bool) -> &'static str {
    if ok {
        "success"
    } else {
        "fail"
    }
}

/// Store metrics written by the driver, admission control and the SQL log.
///
/// One instance per store; nothing here is process-global.
#[derive(Debug, Default)]
pub struct StoreMetrics {
    registry: MetricsRegistry,
}

impl StoreMetrics {
    /// Create a new metrics collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the underlying registry.
    pub fn registry(&self) -> &MetricsRegistry {
        &self.registry
    }

    // === Driver ===

    /// Record the outcome of one SQL attempt.
    pub fn record_transaction(&self, op: &str, ok: bool) {
        let metric = format!(
            "{}.{}.{}",
            metrics::SQL_TRANSACTION_RESULT,
            op,
            result_label(ok)
        );
        self.registry.counter_inc(&metric);
    }

    /// Record the outcome and latency of one driver call.
    pub fn record_operation(&self, op: &str, ok: bool, elapsed: Duration) {
        let metric = format!(
            "{}.{}.{}",
            metrics::SQL_OPERATION_RESULT,
            op,
            result_label(ok)
        );
        self.registry.counter_inc(&metric);
        let latency = format!("{}.{}", metrics::SQL_OPERATION_LATENCY_MS, op);
        self.registry
            .histogram_observe(&latency, elapsed.as_secs_f64() * 1_000.0);
    }

    // === Admission control ===

    /// Record an admission decision.
    pub fn record_admission(&self, op: &str, accepted: bool) {
        let outcome = if accepted { "accepted" } else { "denied" };
        let metric = format!("{}.{}.{}", metrics::ADMISSION_TOTAL, op, outcome);
        self.registry.counter_inc(&metric);
    }

    /// Adjust the in-flight gauge for an op.
    pub fn add_in_flight(&self, op: &str, delta: i64) {
        let metric = format!("{}.{}", metrics::ADMISSION_IN_FLIGHT, op);
        self.registry.gauge_add(&metric, delta);
    }

    /// Current in-flight count for an op.
    pub fn in_flight(&self, op: &str) -> i64 {
        self.registry
            .gauge_get(&format!("{}.{}", metrics::ADMISSION_IN_FLIGHT, op))
    }

    // === SQL log ===

    /// Update revision gauges.
    pub fn set_revisions(&self, current: i64, compact: i64) {
        self.registry
            .gauge_set(metrics::LOG_CURRENT_REVISION, current);
        self.registry
            .gauge_set(metrics::LOG_COMPACT_REVISION, compact);
    }

    /// Record a gap placeholder insert.
    pub fn record_gap_fill(&self) {
        self.registry.counter_inc(metrics::LOG_GAP_FILLS);
    }

    /// Record rows removed by a compaction pass.
    pub fn record_compaction_deleted(&self, rows: u64) {
        self.registry
            .counter_add(metrics::LOG_COMPACTION_DELETED, rows);
    }

    /// Export all metrics.
    pub fn export(&self) -> String {
        self.registry.export_prometheus()
    }
}
