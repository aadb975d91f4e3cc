//! The `kine` table and the statements the generic driver issues.
//!
//! Every row-returning statement selects the same leading columns:
//! `(current revision, compact revision, id, name, created, deleted,
//! create_revision, prev_revision, lease, value, old_value)` so one row
//! decoder serves all of them.

/// Name of the compaction sentinel row.
pub const COMPACT_REV_KEY: &str = "compact_rev_key";

/// Name prefix of gap placeholder rows.
pub const GAP_KEY_PREFIX: &str = "gap-";

/// Operation names, used for admission control and metric labels.
pub mod op {
    pub const LIST_CURRENT: &str = "list_current";
    pub const LIST_REVISION: &str = "list_revision";
    pub const COUNT: &str = "count";
    pub const CURRENT_REVISION: &str = "current_revision";
    pub const AFTER: &str = "after";
    pub const AFTER_PREFIX: &str = "after_prefix";
    pub const INSERT: &str = "insert";
    pub const INSERT_LAST_INSERT_ID: &str = "insert_last_insert_id";
    pub const GET_REVISION: &str = "get_revision";
    pub const DELETE_REVISION: &str = "delete_revision";
    pub const GET_COMPACT_REVISION: &str = "get_compact_revision";
    pub const UPDATE_COMPACT: &str = "update_compact";
    pub const FILL: &str = "fill";
    pub const GET_SIZE: &str = "get_size";
    pub const SCHEMA: &str = "schema";
}

/// Table and index definitions. Idempotent.
///
/// `AUTOINCREMENT` keeps ids from being reused after compaction deletes
/// the highest row.
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS kine (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    created INTEGER NOT NULL,
    deleted INTEGER NOT NULL,
    create_revision INTEGER NOT NULL,
    prev_revision INTEGER NOT NULL,
    lease INTEGER NOT NULL,
    value BLOB,
    old_value BLOB
);
CREATE INDEX IF NOT EXISTS kine_name_index ON kine (name);
CREATE INDEX IF NOT EXISTS kine_name_id_index ON kine (name, id);
CREATE INDEX IF NOT EXISTS kine_id_deleted_index ON kine (id, deleted);
CREATE INDEX IF NOT EXISTS kine_prev_revision_index ON kine (prev_revision);
CREATE UNIQUE INDEX IF NOT EXISTS kine_name_prev_revision_uindex ON kine (name, prev_revision);
"#;

macro_rules! revision_columns {
    () => {
        "SELECT (SELECT MAX(rkv.id) FROM kine AS rkv), \
         (SELECT MAX(crkv.prev_revision) FROM kine AS crkv WHERE crkv.name = 'compact_rev_key'), \
         kv.id, kv.name, kv.created, kv.deleted, kv.create_revision, kv.prev_revision, \
         kv.lease, kv.value, kv.old_value FROM kine AS kv "
    };
}

/// Latest version of every key in `[?1, ?2)`; `?3` includes tombstones,
/// `?4` is the limit (-1 for none).
pub const LIST_CURRENT_SQL: &str = concat!(
    revision_columns!(),
    "JOIN (SELECT MAX(mkv.id) AS id FROM kine AS mkv \
     WHERE mkv.name >= ?1 AND mkv.name < ?2 GROUP BY mkv.name) AS maxkv ON maxkv.id = kv.id \
     WHERE kv.deleted = 0 OR ?3 \
     ORDER BY kv.name ASC LIMIT ?4"
);

/// Version of every key in `[?1, ?2)` as of revision `?3`; `?4` includes
/// tombstones, `?5` is the limit (-1 for none).
pub const LIST_REVISION_SQL: &str = concat!(
    revision_columns!(),
    "JOIN (SELECT MAX(mkv.id) AS id FROM kine AS mkv \
     WHERE mkv.name >= ?1 AND mkv.name < ?2 AND mkv.id <= ?3 GROUP BY mkv.name) AS maxkv \
     ON maxkv.id = kv.id \
     WHERE kv.deleted = 0 OR ?4 \
     ORDER BY kv.name ASC LIMIT ?5"
);

/// Live keys in `[?1, ?2)` as of revision `?3`, with the current revision.
pub const COUNT_SQL: &str = "SELECT (SELECT MAX(rkv.id) FROM kine AS rkv), COUNT(c.id) \
     FROM (SELECT kv.id FROM kine AS kv \
     JOIN (SELECT MAX(mkv.id) AS id FROM kine AS mkv \
     WHERE mkv.name >= ?1 AND mkv.name < ?2 AND mkv.id <= ?3 GROUP BY mkv.name) AS maxkv \
     ON maxkv.id = kv.id WHERE kv.deleted = 0) AS c";

pub const CURRENT_REVISION_SQL: &str = "SELECT MAX(id) FROM kine";

/// Rows with `id > ?1`, oldest first, limit `?2`.
pub const AFTER_SQL: &str = concat!(
    revision_columns!(),
    "WHERE kv.id > ?1 ORDER BY kv.id ASC LIMIT ?2"
);

/// Rows in `[?1, ?2)` with `id > ?3`, oldest first, limit `?4`.
pub const AFTER_PREFIX_SQL: &str = concat!(
    revision_columns!(),
    "WHERE kv.name >= ?1 AND kv.name < ?2 AND kv.id > ?3 ORDER BY kv.id ASC LIMIT ?4"
);

pub const INSERT_SQL: &str = "INSERT INTO kine(name, created, deleted, create_revision, \
     prev_revision, lease, value, old_value) VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) RETURNING id";

pub const INSERT_LAST_INSERT_ID_SQL: &str = "INSERT INTO kine(name, created, deleted, \
     create_revision, prev_revision, lease, value, old_value) \
     VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)";

pub const GET_REVISION_SQL: &str = concat!(revision_columns!(), "WHERE kv.id = ?1");

pub const DELETE_REVISION_SQL: &str = "DELETE FROM kine WHERE id = ?1";

/// `(compact revision, current revision)`.
pub const GET_COMPACT_REVISION_SQL: &str = "SELECT \
     (SELECT MAX(crkv.prev_revision) FROM kine AS crkv WHERE crkv.name = 'compact_rev_key'), \
     (SELECT MAX(rkv.id) FROM kine AS rkv)";

pub const UPDATE_COMPACT_SQL: &str =
    "UPDATE kine SET prev_revision = ?1 WHERE name = 'compact_rev_key'";

/// Placeholder row at an explicit id: created = 0, deleted = 1.
pub const FILL_SQL: &str = "INSERT INTO kine(id, name, created, deleted, create_revision, \
     prev_revision, lease, value, old_value) VALUES(?1, ?2, 0, 1, 0, 0, 0, ?3, ?4)";

/// Bytes in use by the database file.
pub const GET_SIZE_SQL: &str = "SELECT (page_count - freelist_count) * page_size \
     FROM pragma_page_count(), pragma_freelist_count(), pragma_page_size()";

/// Name of the gap placeholder for `revision`.
pub fn gap_key(revision: i64) -> String {
    format!("{GAP_KEY_PREFIX}{revision}")
}

/// Returns true for gap placeholder names.
pub fn is_gap_key(key: &str) -> bool {
    key.starts_with(GAP_KEY_PREFIX)
}

/// Half-open `[start, end)` name range covering `prefix`.
///
/// A trailing `/` selects everything under that directory (its last byte
/// is replaced with `0`, the next byte up). Anything else selects exactly
/// one key by appending the lowest sentinel byte.
pub fn prefix_range(prefix: &str) -> (String, String) {
    match prefix.strip_suffix('/') {
        Some(dir) => (prefix.to_string(), format!("{dir}0")),
        None => (prefix.to_string(), format!("{prefix}\u{1}")),
    }
}
