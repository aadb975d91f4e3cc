//! Store lifecycle.
//!
//! The runtime owns the store-lifetime cancellation token. Every background
//! task (watch poller, compactor) is parented to it, so cancelling it stops
//! them together.
//!
//! - Start order: driver (connect, schema) → SQL log (sentinel, compactor)
//! - Shutdown order: cancel → join log tasks → close the pool

use crate::core::config::Config;
use crate::core::error::StoreResult;
use crate::mvcc::SqlLog;
use crate::ops::observability::StoreMetrics;
use crate::storage::{Engine, GenericDriver};
use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Component health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentHealth {
    /// Component is starting.
    Starting,
    /// Component is healthy and operational.
    Healthy,
    /// Component has failed.
    Failed,
    /// Component is stopping.
    Stopping,
    /// Component has stopped.
    Stopped,
}

/// Open the driver and build a log on top of it.
///
/// The log is not started; callers decide whether background tasks run.
pub async fn open_log(
    config: &Config,
    metrics: Arc<StoreMetrics>,
    cancel: &CancellationToken,
) -> StoreResult<(Arc<GenericDriver>, SqlLog)> {
    let driver = Arc::new(GenericDriver::open(config, Engine::sqlite(), metrics.clone(), cancel).await?);
    let log = SqlLog::new(
        driver.clone(),
        config.log.clone(),
        metrics,
        cancel.child_token(),
    );
    Ok((driver, log))
}

/// kinestore runtime holding the store handles.
pub struct Runtime {
    /// Configuration.
    config: Arc<Config>,

    /// Per-store metrics.
    metrics: Arc<StoreMetrics>,

    /// Store-lifetime cancellation.
    cancel: CancellationToken,

    /// Driver handle (after start).
    driver: Option<Arc<GenericDriver>>,

    /// Log handle (after start).
    log: Option<SqlLog>,

    /// Store health.
    health: ComponentHealth,

    /// Whether the runtime is running.
    running: Arc<AtomicBool>,
}

impl Runtime {
    /// Create a new runtime with the given configuration.
    pub fn new(config: Config) -> Result<Self> {
        config.validate().context("invalid configuration")?;
        Ok(Self {
            config: Arc::new(config),
            metrics: Arc::new(StoreMetrics::new()),
            cancel: CancellationToken::new(),
            driver: None,
            log: None,
            health: ComponentHealth::Starting,
            running: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Get the configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get the store metrics.
    pub fn metrics(&self) -> &Arc<StoreMetrics> {
        &self.metrics
    }

    /// Get the SQL log (if started).
    pub fn log(&self) -> Option<&SqlLog> {
        self.log.as_ref()
    }

    /// Get the current health status.
    pub fn health(&self) -> ComponentHealth {
        self.health
    }

    /// Check if the runtime is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Token cancelled on shutdown.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Open the database and start the log.
    pub async fn start(&mut self) -> Result<()> {
        tracing::info!(
            database = %self.config.database.path,
            admission = ?self.config.admission.resolve(),
            "starting kinestore"
        );

        let (driver, log) = match open_log(&self.config, self.metrics.clone(), &self.cancel).await {
            Ok(opened) => opened,
            Err(e) => {
                self.health = ComponentHealth::Failed;
                return Err(e).context("failed to open database");
            }
        };
        if let Err(e) = log.start().await {
            self.health = ComponentHealth::Failed;
            return Err(e).context("failed to start log");
        }

        let revision = log.current_revision().await.unwrap_or_default();
        self.driver = Some(driver);
        self.log = Some(log);
        self.health = ComponentHealth::Healthy;
        self.running.store(true, Ordering::Release);
        tracing::info!(revision, "kinestore started");
        Ok(())
    }

    /// Trigger graceful shutdown.
    pub fn shutdown(&self) {
        tracing::info!("shutdown requested");
        self.cancel.cancel();
    }

    /// Run until Ctrl-C or [`Runtime::shutdown`].
    pub async fn run(&mut self) -> Result<()> {
        self.start().await?;

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("shutdown signal received (SIGINT)");
            }
            _ = self.cancel.cancelled() => {
                tracing::info!("shutdown requested by component");
            }
        }

        self.stop().await;
        Ok(())
    }

    /// Stop background tasks and release the database.
    pub async fn stop(&mut self) {
        tracing::info!("stopping kinestore");
        self.health = ComponentHealth::Stopping;
        self.running.store(false, Ordering::Release);
        self.cancel.cancel();

        if let Some(log) = self.log.take() {
            log.stop().await;
        }
        if let Some(driver) = self.driver.take() {
            driver.close();
        }

        self.health = ComponentHealth::Stopped;
        tracing::info!("kinestore stopped");
    }
}
