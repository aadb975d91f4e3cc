//! Admission control.
//!
//! Every driver call passes through [`AdmissionControl::admit`] before any
//! SQL is issued. Acquisition never waits: when the configured limit is
//! reached the call fails immediately with [`StoreError::Denied`] and the
//! caller surfaces it as resource exhaustion.
//!
//! The returned [`AdmissionGuard`] releases its slot on drop, so release is
//! unconditional on every exit path of the caller.

use crate::core::error::{StoreError, StoreResult};
use crate::ops::observability::StoreMetrics;
use crate::storage::schema::op;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Operation names that mutate the database.
///
/// Under `only_write_queries`, everything else bypasses the limit.
pub const WRITE_OPS: &[&str] = &[
    op::UPDATE_COMPACT,
    op::DELETE_REVISION,
    op::FILL,
    op::INSERT,
    op::INSERT_LAST_INSERT_ID,
];

/// Returns true if `op_name` is on the write allow-list.
pub fn is_write_op(op_name: &str) -> bool {
    WRITE_OPS.contains(&op_name)
}

/// Concurrency policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionPolicy {
    /// Admit everything; in-flight counts are still tracked.
    AllowAll,
    /// Fixed-size counting semaphore.
    Limit {
        max_concurrent: usize,
        only_write_queries: bool,
    },
}

/// Admission gate shared by every driver call of one store.
#[derive(Debug)]
pub struct AdmissionControl {
    policy: AdmissionPolicy,
    semaphore: Option<Arc<Semaphore>>,
    metrics: Arc<StoreMetrics>,
}

impl AdmissionControl {
    /// Create a gate for the given policy.
    pub fn new(policy: AdmissionPolicy, metrics: Arc<StoreMetrics>) -> Self {
        let semaphore = match policy {
            AdmissionPolicy::AllowAll => None,
            AdmissionPolicy::Limit { max_concurrent, .. } => {
                Some(Arc::new(Semaphore::new(max_concurrent)))
            }
        };
        Self {
            policy,
            semaphore,
            metrics,
        }
    }

    /// Allow-all gate.
    pub fn allow_all(metrics: Arc<StoreMetrics>) -> Self {
        Self::new(AdmissionPolicy::AllowAll, metrics)
    }

    /// Get the configured policy.
    pub fn policy(&self) -> AdmissionPolicy {
        self.policy
    }

    /// Slots currently free under the limit policy (None for allow-all).
    pub fn available(&self) -> Option<usize> {
        self.semaphore.as_ref().map(|s| s.available_permits())
    }

    /// Try to admit one operation.
    pub fn admit(&self, op_name: &'static str) -> StoreResult<AdmissionGuard> {
        let permit = match (self.policy, &self.semaphore) {
            (
                AdmissionPolicy::Limit {
                    max_concurrent,
                    only_write_queries,
                },
                Some(semaphore),
            ) if !only_write_queries || is_write_op(op_name) => {
                match semaphore.clone().try_acquire_owned() {
                    Ok(permit) => Some(permit),
                    Err(_) => {
                        self.metrics.record_admission(op_name, false);
                        tracing::debug!(op = op_name, limit = max_concurrent, "admission denied");
                        return Err(StoreError::Denied {
                            op: op_name,
                            limit: max_concurrent,
                        });
                    }
                }
            }
            _ => None,
        };

        self.metrics.record_admission(op_name, true);
        self.metrics.add_in_flight(op_name, 1);
        Ok(AdmissionGuard {
            op: op_name,
            metrics: self.metrics.clone(),
            _permit: permit,
        })
    }
}

/// An admitted operation. Dropping it frees the slot.
#[derive(Debug)]
pub struct AdmissionGuard {
    op: &'static str,
    metrics: Arc<StoreMetrics>,
    _permit: Option<OwnedSemaphorePermit>,
}

impl AdmissionGuard {
    /// Operation this guard was admitted for.
    pub fn op(&self) -> &'static str {
        self.op
    }

    /// Release the slot now.
    pub fn release(self) {}
}

impl Drop for AdmissionGuard {
    fn drop(&mut self) {
        self.metrics.add_in_flight(self.op, -1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limit(n: usize, only_writes: bool) -> AdmissionControl {
        AdmissionControl::new(
            AdmissionPolicy::Limit {
                max_concurrent: n,
                only_write_queries: only_writes,
            },
            Arc::new(StoreMetrics::new()),
        )
    }

    #[test]
    fn limit_denies_past_capacity() {
        let gate = limit(2, false);
        let a = gate.admit(op::GET_REVISION).unwrap();
        let _b = gate.admit(op::INSERT).unwrap();

        let err = gate.admit(op::LIST_CURRENT).unwrap_err();
        assert!(err.is_denied());
        assert!(err.to_string().contains('2'));

        a.release();
        assert!(gate.admit(op::LIST_CURRENT).is_ok());
    }

    #[test]
    fn reads_bypass_when_only_writes_are_gated() {
        let gate = limit(1, true);
        let _w = gate.admit(op::INSERT).unwrap();

        assert!(gate.admit(op::FILL).is_err());
        let reads: Vec<_> = (0..10).map(|_| gate.admit(op::AFTER).unwrap()).collect();
        assert_eq!(reads.len(), 10);
    }

    #[test]
    fn in_flight_tracks_guards() {
        let metrics = Arc::new(StoreMetrics::new());
        let gate = AdmissionControl::allow_all(metrics.clone());

        let g1 = gate.admit(op::COUNT).unwrap();
        let g2 = gate.admit(op::COUNT).unwrap();
        assert_eq!(metrics.in_flight(op::COUNT), 2);
        drop(g1);
        assert_eq!(metrics.in_flight(op::COUNT), 1);
        g2.release();
        assert_eq!(metrics.in_flight(op::COUNT), 0);
    }

    #[test]
    fn denial_does_not_leak_in_flight() {
        let metrics = Arc::new(StoreMetrics::new());
        let gate = AdmissionControl::new(
            AdmissionPolicy::Limit {
                max_concurrent: 1,
                only_write_queries: false,
            },
            metrics.clone(),
        );
        let held = gate.admit(op::INSERT).unwrap();
        assert!(gate.admit(op::INSERT).is_err());
        assert_eq!(metrics.in_flight(op::INSERT), 1);
        drop(held);
        assert_eq!(metrics.in_flight(op::INSERT), 0);
        assert_eq!(
            metrics
                .registry()
                .counter_get("kine.sql.admission_total.insert.denied"),
            1
        );
    }
}
