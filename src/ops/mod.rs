//! Operations and observability.
//!
//! - [`observability`] - Metrics registry and store metrics

pub mod observability;
