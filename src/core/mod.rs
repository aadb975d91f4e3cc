//! Core runtime infrastructure.
//!
//! This module contains the essential components for running kinestore:
//! - [`config`] - Configuration parsing and validation
//! - [`runtime`] - Store lifecycle
//! - [`error`] - Error types and etcd-facing mapping

pub mod config;
pub mod error;
pub mod runtime;
