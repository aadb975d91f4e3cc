//! Per-engine strategies.
//!
//! The generic driver is engine-neutral; everything that differs between
//! backing engines (which errors are transient, how errors are translated,
//! how a fresh connection is prepared, how inserts report their id) is
//! supplied here as plain function values at construction time.

use crate::core::error::StoreError;
use rusqlite::{Connection, ErrorCode};
use std::time::Duration;

/// Decides whether an engine error is worth retrying in place.
pub type RetryPredicate = fn(&rusqlite::Error) -> bool;

/// Converts an engine error into the store's vocabulary.
pub type ErrorTranslator = fn(&'static str, rusqlite::Error) -> StoreError;

/// Prepares a freshly opened connection.
pub type ConnectionSetup = fn(&Connection, Duration) -> rusqlite::Result<()>;

/// Strategy bundle for one backing engine.
#[derive(Clone, Copy)]
pub struct Engine {
    /// Engine name for logs.
    pub name: &'static str,
    pub retry: RetryPredicate,
    pub translate: ErrorTranslator,
    pub setup: ConnectionSetup,
    /// Inserts report their id through last-insert-id rather than
    /// `RETURNING id`.
    pub last_insert_id: bool,
    /// Serialize every write behind one coarse lock.
    pub lock_writes: bool,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("name", &self.name)
            .field("last_insert_id", &self.last_insert_id)
            .field("lock_writes", &self.lock_writes)
            .finish()
    }
}

impl Engine {
    /// SQLite defaults: single writer, `RETURNING id` inserts.
    pub fn sqlite() -> Self {
        Self {
            name: "sqlite",
            retry: sqlite_retry,
            translate: sqlite_translate,
            setup: sqlite_setup,
            last_insert_id: false,
            lock_writes: true,
        }
    }

    pub fn with_last_insert_id(mut self, enabled: bool) -> Self {
        self.last_insert_id = enabled;
        self
    }

    pub fn with_lock_writes(mut self, enabled: bool) -> Self {
        self.lock_writes = enabled;
        self
    }
}

/// Busy and locked databases clear up once the other writer commits.
pub fn sqlite_retry(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked)
    )
}

pub fn sqlite_translate(op: &'static str, err: rusqlite::Error) -> StoreError {
    match err.sqlite_error_code() {
        Some(ErrorCode::ConstraintViolation) => StoreError::KeyExists { op },
        Some(ErrorCode::CannotOpen) | Some(ErrorCode::NotADatabase) => StoreError::Unavailable {
            message: format!("{op}: {err}"),
        },
        _ => StoreError::database(op, err.to_string()),
    }
}

pub fn sqlite_setup(conn: &Connection, busy_timeout: Duration) -> rusqlite::Result<()> {
    conn.busy_timeout(busy_timeout)?;
    conn.set_prepared_statement_cache_capacity(32);
    // journal_mode answers with the mode now in effect.
    conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
        row.get::<_, String>(0)
    })?;
    conn.pragma_update(None, "synchronous", "NORMAL")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::ffi;

    fn sqlite_err(code: i32) -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(ffi::Error::new(code), None)
    }

    #[test]
    fn busy_and_locked_are_transient() {
        assert!(sqlite_retry(&sqlite_err(ffi::SQLITE_BUSY)));
        assert!(sqlite_retry(&sqlite_err(ffi::SQLITE_LOCKED)));
        assert!(!sqlite_retry(&sqlite_err(ffi::SQLITE_CONSTRAINT)));
        assert!(!sqlite_retry(&rusqlite::Error::QueryReturnedNoRows));
    }

    #[test]
    fn constraint_translates_to_key_exists() {
        let err = sqlite_translate("insert", sqlite_err(ffi::SQLITE_CONSTRAINT_UNIQUE));
        assert!(matches!(err, StoreError::KeyExists { op: "insert" }));

        let err = sqlite_translate("get_size", sqlite_err(ffi::SQLITE_IOERR));
        assert!(matches!(err, StoreError::Database { op: "get_size", .. }));
    }
}
