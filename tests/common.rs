//! Common test utilities.
//!
//! This module contains shared helpers for integration tests.
//! Import with `mod common;` in test files.

#![allow(dead_code)]

use kinestore::core::config::Config;
use kinestore::mvcc::{Event, KeyValue, SqlLog};
use kinestore::ops::observability::StoreMetrics;
use kinestore::storage::{Engine, GenericDriver};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Configuration tuned for tests: fast polling, short gap threshold, no
/// background compaction within a test's lifetime.
pub fn test_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.database.path = dir.path().join("kine.db").display().to_string();
    config.database.open_attempts = 3;
    config.database.open_retry_interval_ms = 10;
    config.log.poll_interval_ms = 20;
    config.log.gap_fill_threshold_ms = 200;
    config.log.compact_interval_seconds = 3_600;
    config
}

/// A driver over a fresh database.
pub struct TestDriver {
    pub dir: TempDir,
    pub config: Config,
    pub metrics: Arc<StoreMetrics>,
    pub driver: Arc<GenericDriver>,
}

pub async fn open_driver() -> TestDriver {
    open_driver_with(|_| {}).await
}

pub async fn open_driver_with(tweak: impl FnOnce(&mut Config)) -> TestDriver {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let mut config = test_config(&dir);
    tweak(&mut config);
    let metrics = Arc::new(StoreMetrics::new());
    let driver = GenericDriver::open(
        &config,
        Engine::sqlite(),
        metrics.clone(),
        &CancellationToken::new(),
    )
    .await
    .expect("Failed to open driver");
    TestDriver {
        dir,
        config,
        metrics,
        driver: Arc::new(driver),
    }
}

/// A started log over a fresh database.
pub struct TestStore {
    pub dir: TempDir,
    pub config: Config,
    pub metrics: Arc<StoreMetrics>,
    pub driver: Arc<GenericDriver>,
    pub log: SqlLog,
    pub cancel: CancellationToken,
}

impl TestStore {
    /// A second connection to the same database file, bypassing the driver.
    pub fn raw_connection(&self) -> rusqlite::Connection {
        let conn = rusqlite::Connection::open(&self.config.database.path)
            .expect("Failed to open raw connection");
        conn.busy_timeout(Duration::from_secs(5))
            .expect("Failed to set busy timeout");
        conn
    }
}

pub async fn open_store() -> TestStore {
    open_store_with(|_| {}).await
}

pub async fn open_store_with(tweak: impl FnOnce(&mut Config)) -> TestStore {
    let TestDriver {
        dir,
        config,
        metrics,
        driver,
    } = open_driver_with(tweak).await;
    let cancel = CancellationToken::new();
    let log = SqlLog::new(
        driver.clone(),
        config.log.clone(),
        metrics.clone(),
        cancel.clone(),
    );
    log.start().await.expect("Failed to start log");
    TestStore {
        dir,
        config,
        metrics,
        driver,
        log,
        cancel,
    }
}

/// Create or update `key`, returning the written version.
pub async fn put(log: &SqlLog, key: &str, value: &str, prev: Option<&KeyValue>) -> KeyValue {
    let event = match prev {
        Some(prev) => Event::update(prev, value.to_string()),
        None => Event::create(key, value.to_string()),
    };
    let revision = log.append(&event).await.expect("append failed");
    KeyValue {
        key: key.to_string(),
        value: value.to_string().into(),
        create_revision: if prev.is_some() {
            event.kv.create_revision
        } else {
            revision
        },
        mod_revision: revision,
        lease: 0,
    }
}

/// Tombstone `prev`, returning the tombstone revision.
pub async fn delete(log: &SqlLog, prev: &KeyValue) -> i64 {
    log.append(&Event::delete(prev)).await.expect("delete failed")
}

/// Receive one batch or fail after `secs`.
pub async fn recv_within(
    stream: &mut kinestore::mvcc::WatchStream,
    secs: u64,
) -> Option<Vec<Event>> {
    tokio::time::timeout(Duration::from_secs(secs), stream.recv())
        .await
        .expect("timed out waiting for watch events")
}
