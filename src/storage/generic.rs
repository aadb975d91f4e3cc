//! Generic SQL driver.
//!
//! Implements [`Dialect`] by issuing the statements in
//! [`crate::storage::schema`] through a bounded connection pool. Each call:
//!
//! 1. passes admission control (fail-fast, no SQL on denial),
//! 2. takes the coarse write lock when the engine requires it,
//! 3. runs the statement on a blocking thread, retrying transient engine
//!    errors in place with jittered backoff,
//! 4. records per-attempt and per-call metrics.
//!
//! Engine differences come in through [`Engine`]; nothing in this file
//! names a specific engine's error codes.

use crate::core::config::Config;
use crate::core::error::{StoreError, StoreResult};
use crate::ops::observability::StoreMetrics;
use crate::storage::admission::AdmissionControl;
use crate::storage::dialect::{Dialect, NewRow, Row, RowSet};
use crate::storage::engine::{Engine, RetryPredicate};
use crate::storage::pool::{ConnectionPool, Opener, PoolLimits};
use crate::storage::retry::{RetryError, RetryPolicy};
use crate::storage::schema::{self, op};
use async_trait::async_trait;
use bytes::Bytes;
use rusqlite::{params, Connection, Params};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Failure of a single attempt.
#[derive(Debug)]
enum AttemptError {
    /// The engine rejected the statement.
    Sql(rusqlite::Error),
    /// The attempt never reached the engine.
    Store(StoreError),
}

impl AttemptError {
    fn is_transient(&self, retry: RetryPredicate) -> bool {
        match self {
            Self::Sql(e) => retry(e),
            Self::Store(_) => false,
        }
    }
}

/// SQL implementation of the log's storage contract.
pub struct GenericDriver {
    engine: Engine,
    pool: ConnectionPool,
    admission: AdmissionControl,
    metrics: Arc<StoreMetrics>,
    retry: RetryPolicy,
    write_lock: tokio::sync::Mutex<()>,
    poll_interval: Duration,
    compact_interval: Duration,
}

impl std::fmt::Debug for GenericDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenericDriver")
            .field("engine", &self.engine)
            .field("pool", &self.pool)
            .field("admission", &self.admission.policy())
            .finish()
    }
}

impl GenericDriver {
    /// Connect, wait for the engine to answer, and create the schema.
    ///
    /// The engine is pinged up to `database.open_attempts` times, spaced by
    /// `database.open_retry_interval_ms`. Cancelling `cancel` abandons the
    /// wait with [`StoreError::Cancelled`].
    pub async fn open(
        config: &Config,
        engine: Engine,
        metrics: Arc<StoreMetrics>,
        cancel: &CancellationToken,
    ) -> StoreResult<Self> {
        let db = &config.database;
        let engine = engine
            .with_last_insert_id(engine.last_insert_id || db.last_insert_id)
            .with_lock_writes(db.lock_writes);

        let path = PathBuf::from(&db.path);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Unavailable {
                message: format!("creating {}: {e}", parent.display()),
            })?;
        }

        let setup = engine.setup;
        let busy_timeout = Duration::from_millis(db.busy_timeout_ms);
        let opener: Opener = Arc::new(move || {
            let conn = Connection::open(&path)?;
            setup(&conn, busy_timeout)?;
            Ok(conn)
        });
        let pool = ConnectionPool::new(
            opener,
            PoolLimits {
                max_open: db.max_open_connections,
                max_idle: db.max_idle_connections,
                max_lifetime: db.connection_max_lifetime(),
            },
        );

        let driver = Self {
            engine,
            pool,
            admission: AdmissionControl::new(config.admission.resolve(), metrics.clone()),
            metrics,
            retry: RetryPolicy::with_attempts(db.max_retries),
            write_lock: tokio::sync::Mutex::new(()),
            poll_interval: config.log.poll_interval(),
            compact_interval: config.log.compact_interval(),
        };

        let interval = Duration::from_millis(db.open_retry_interval_ms);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match driver.ping().await {
                Ok(()) => break,
                Err(e) if attempt >= db.open_attempts => {
                    return Err(StoreError::Unavailable {
                        message: format!("{} after {attempt} attempts: {e}", db.path),
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        engine = engine.name,
                        attempt,
                        error = %e,
                        "failed to ping database, retrying"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(StoreError::Cancelled),
                        _ = tokio::time::sleep(interval) => {}
                    }
                }
            }
        }

        driver
            .execute(op::SCHEMA, true, |conn| conn.execute_batch(schema::SCHEMA_SQL))
            .await?;
        tracing::info!(
            engine = engine.name,
            path = %db.path,
            attempts = attempt,
            "database opened"
        );
        Ok(driver)
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn admission(&self) -> &AdmissionControl {
        &self.admission
    }

    pub fn metrics(&self) -> &Arc<StoreMetrics> {
        &self.metrics
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Stop handing out connections.
    pub fn close(&self) {
        self.pool.close();
    }

    async fn ping(&self) -> StoreResult<()> {
        let check = Arc::new(|conn: &mut Connection| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .map(|_| ())
        });
        self.attempt(check).await.map_err(|e| match e {
            AttemptError::Sql(e) => (self.engine.translate)("ping", e),
            AttemptError::Store(e) => e,
        })
    }

    /// One attempt on a pooled connection.
    async fn attempt<T, F>(&self, f: Arc<F>) -> Result<T, AttemptError>
    where
        T: Send + 'static,
        F: Fn(&mut Connection) -> rusqlite::Result<T> + Send + Sync + 'static,
    {
        let mut pooled = self.pool.get().await.map_err(AttemptError::Store)?;
        tokio::task::spawn_blocking(move || {
            let result = pooled.connection().and_then(|conn| f(conn));
            if let Err(rusqlite::Error::SqliteFailure(ref e, _)) = result {
                if e.code == rusqlite::ErrorCode::CannotOpen {
                    pooled.discard();
                }
            }
            result
        })
        .await
        .map_err(|e| AttemptError::Store(StoreError::internal(format!("blocking task failed: {e}"))))?
        .map_err(AttemptError::Sql)
    }

    /// Admit, lock if writing, run with retry, record metrics.
    async fn execute<T, F>(&self, op_name: &'static str, write: bool, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: Fn(&mut Connection) -> rusqlite::Result<T> + Send + Sync + 'static,
    {
        let _admitted = self.admission.admit(op_name)?;
        let started = Instant::now();
        let _write_guard = if write && self.engine.lock_writes {
            Some(self.write_lock.lock().await)
        } else {
            None
        };

        let f = Arc::new(f);
        let retry = self.engine.retry;
        let outcome = self
            .retry
            .run(
                |e: &AttemptError| e.is_transient(retry),
                |attempt| {
                    let f = f.clone();
                    async move {
                        let result = self.attempt(f).await;
                        self.metrics.record_transaction(op_name, result.is_ok());
                        if let Err(AttemptError::Sql(ref e)) = result {
                            tracing::trace!(op = op_name, attempt, error = %e, "statement failed");
                        }
                        result
                    }
                },
            )
            .await;

        let result = outcome.map_err(|failure| self.translate(op_name, failure));
        self.metrics
            .record_operation(op_name, result.is_ok(), started.elapsed());
        result
    }

    fn translate(&self, op_name: &'static str, failure: RetryError<AttemptError>) -> StoreError {
        match failure.error {
            AttemptError::Store(e) => e,
            AttemptError::Sql(e) if failure.exhausted => {
                tracing::warn!(
                    op = op_name,
                    attempts = failure.attempts,
                    error = %e,
                    "transient error persisted past retry budget"
                );
                StoreError::RetriesExhausted {
                    op: op_name,
                    attempts: failure.attempts,
                    message: e.to_string(),
                }
            }
            AttemptError::Sql(e) => (self.engine.translate)(op_name, e),
        }
    }
}

// ============================================================================
// Row decoding
// ============================================================================

fn decode_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Row> {
    Ok(Row {
        id: row.get(2)?,
        name: row.get(3)?,
        created: row.get(4)?,
        deleted: row.get(5)?,
        create_revision: row.get(6)?,
        prev_revision: row.get(7)?,
        lease: row.get(8)?,
        value: Bytes::from(row.get::<_, Option<Vec<u8>>>(9)?.unwrap_or_default()),
        old_value: Bytes::from(row.get::<_, Option<Vec<u8>>>(10)?.unwrap_or_default()),
    })
}

fn query_rows(conn: &Connection, sql: &str, params: impl Params) -> rusqlite::Result<RowSet> {
    let mut stmt = conn.prepare_cached(sql)?;
    let mut rows = stmt.query(params)?;
    let mut set = RowSet::default();
    while let Some(row) = rows.next()? {
        set.current_revision = row.get::<_, Option<i64>>(0)?.unwrap_or(0);
        set.compact_revision = row.get::<_, Option<i64>>(1)?.unwrap_or(0);
        set.rows.push(decode_row(row)?);
    }
    Ok(set)
}

/// Non-positive limits mean "no limit".
fn sql_limit(limit: i64) -> i64 {
    if limit > 0 {
        limit
    } else {
        -1
    }
}

#[async_trait]
impl Dialect for GenericDriver {
    async fn list_current(
        &self,
        prefix: &str,
        limit: i64,
        include_deleted: bool,
    ) -> StoreResult<RowSet> {
        let (start, end) = schema::prefix_range(prefix);
        let limit = sql_limit(limit);
        self.execute(op::LIST_CURRENT, false, move |conn| {
            query_rows(
                conn,
                schema::LIST_CURRENT_SQL,
                params![start, end, include_deleted, limit],
            )
        })
        .await
    }

    async fn list(
        &self,
        prefix: &str,
        start_key: &str,
        limit: i64,
        revision: i64,
        include_deleted: bool,
    ) -> StoreResult<RowSet> {
        let (mut start, end) = schema::prefix_range(prefix);
        if start_key > start.as_str() {
            start = start_key.to_string();
        }
        let limit = sql_limit(limit);
        self.execute(op::LIST_REVISION, false, move |conn| {
            query_rows(
                conn,
                schema::LIST_REVISION_SQL,
                params![start, end, revision, include_deleted, limit],
            )
        })
        .await
    }

    async fn count(&self, prefix: &str, revision: i64) -> StoreResult<(i64, i64)> {
        let (start, end) = schema::prefix_range(prefix);
        let revision = if revision > 0 { revision } else { i64::MAX };
        self.execute(op::COUNT, false, move |conn| {
            conn.prepare_cached(schema::COUNT_SQL)?
                .query_row(params![start, end, revision], |row| {
                    Ok((row.get::<_, Option<i64>>(0)?.unwrap_or(0), row.get(1)?))
                })
        })
        .await
    }

    async fn current_revision(&self) -> StoreResult<i64> {
        self.execute(op::CURRENT_REVISION, false, |conn| {
            conn.prepare_cached(schema::CURRENT_REVISION_SQL)?
                .query_row([], |row| row.get::<_, Option<i64>>(0))
                .map(|rev| rev.unwrap_or(0))
        })
        .await
    }

    async fn after_prefix(&self, prefix: &str, revision: i64, limit: i64) -> StoreResult<RowSet> {
        let (start, end) = schema::prefix_range(prefix);
        let limit = sql_limit(limit);
        self.execute(op::AFTER_PREFIX, false, move |conn| {
            query_rows(
                conn,
                schema::AFTER_PREFIX_SQL,
                params![start, end, revision, limit],
            )
        })
        .await
    }

    async fn after(&self, revision: i64, limit: i64) -> StoreResult<RowSet> {
        let limit = sql_limit(limit);
        self.execute(op::AFTER, false, move |conn| {
            query_rows(conn, schema::AFTER_SQL, params![revision, limit])
        })
        .await
    }

    async fn insert(&self, row: NewRow) -> StoreResult<i64> {
        if self.engine.last_insert_id {
            return self
                .execute(op::INSERT_LAST_INSERT_ID, true, move |conn| {
                    conn.prepare_cached(schema::INSERT_LAST_INSERT_ID_SQL)?
                        .execute(params![
                            row.name,
                            row.created,
                            row.deleted,
                            row.create_revision,
                            row.prev_revision,
                            row.lease,
                            row.value.as_ref(),
                            row.old_value.as_ref(),
                        ])?;
                    Ok(conn.last_insert_rowid())
                })
                .await;
        }

        self.execute(op::INSERT, true, move |conn| {
            conn.prepare_cached(schema::INSERT_SQL)?.query_row(
                params![
                    row.name,
                    row.created,
                    row.deleted,
                    row.create_revision,
                    row.prev_revision,
                    row.lease,
                    row.value.as_ref(),
                    row.old_value.as_ref(),
                ],
                |r| r.get(0),
            )
        })
        .await
    }

    async fn get_revision(&self, revision: i64) -> StoreResult<RowSet> {
        self.execute(op::GET_REVISION, false, move |conn| {
            query_rows(conn, schema::GET_REVISION_SQL, params![revision])
        })
        .await
    }

    async fn delete_revision(&self, revision: i64) -> StoreResult<()> {
        self.execute(op::DELETE_REVISION, true, move |conn| {
            conn.prepare_cached(schema::DELETE_REVISION_SQL)?
                .execute(params![revision])
                .map(|_| ())
        })
        .await
    }

    async fn get_compact_revision(&self) -> StoreResult<(i64, i64)> {
        self.execute(op::GET_COMPACT_REVISION, false, |conn| {
            conn.prepare_cached(schema::GET_COMPACT_REVISION_SQL)?
                .query_row([], |row| {
                    Ok((
                        row.get::<_, Option<i64>>(0)?.unwrap_or(0),
                        row.get::<_, Option<i64>>(1)?.unwrap_or(0),
                    ))
                })
        })
        .await
    }

    async fn set_compact_revision(&self, revision: i64) -> StoreResult<()> {
        let updated = self
            .execute(op::UPDATE_COMPACT, true, move |conn| {
                conn.prepare_cached(schema::UPDATE_COMPACT_SQL)?
                    .execute(params![revision])
            })
            .await?;
        // Without the sentinel the floor would silently stay at 0.
        if updated == 0 {
            return Err(StoreError::database(
                op::UPDATE_COMPACT,
                format!("no {} row to record compaction floor {revision}", schema::COMPACT_REV_KEY),
            ));
        }
        Ok(())
    }

    async fn fill(&self, revision: i64) -> StoreResult<()> {
        let name = schema::gap_key(revision);
        self.execute(op::FILL, true, move |conn| {
            conn.prepare_cached(schema::FILL_SQL)?
                .execute(params![revision, name, &[] as &[u8], &[] as &[u8]])
                .map(|_| ())
        })
        .await
    }

    fn is_fill(&self, key: &str) -> bool {
        schema::is_gap_key(key)
    }

    async fn get_size(&self) -> StoreResult<i64> {
        self.execute(op::GET_SIZE, false, |conn| {
            conn.prepare_cached(schema::GET_SIZE_SQL)?
                .query_row([], |row| row.get(0))
        })
        .await
    }

    fn compact_interval(&self) -> Duration {
        self.compact_interval
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}
