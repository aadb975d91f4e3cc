//! Key-value events.
//!
//! An [`Event`] is the caller-facing view of one `kine` row: the key's
//! state at that revision plus, for updates and deletes, the version it
//! superseded.

use crate::storage::dialect::{NewRow, Row};
use bytes::Bytes;

/// One version of a key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyValue {
    /// The key.
    pub key: String,

    /// The value (empty for tombstones).
    pub value: Bytes,

    /// Revision at which the key was created.
    pub create_revision: i64,

    /// Revision of this version.
    pub mod_revision: i64,

    /// Associated lease, 0 for none.
    pub lease: i64,
}

/// Event type for watch notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    /// Key was created or updated.
    Put,
    /// Key was deleted.
    Delete,
}

/// A key-value event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Event {
    /// This version created the key.
    pub create: bool,

    /// This version is a tombstone.
    pub delete: bool,

    /// The key-value record at this revision.
    pub kv: KeyValue,

    /// The version this one superseded. Absent for creations.
    pub prev_kv: Option<KeyValue>,
}

impl Event {
    /// Create a key that does not currently exist.
    pub fn create(key: impl Into<String>, value: impl Into<Bytes>) -> Self {
        Self {
            create: true,
            delete: false,
            kv: KeyValue {
                key: key.into(),
                value: value.into(),
                ..KeyValue::default()
            },
            prev_kv: None,
        }
    }

    /// Create a key again after `tombstone` deleted it.
    ///
    /// The new row chains onto the tombstone so the `(name, prev_revision)`
    /// uniqueness still rejects a concurrent second creation.
    pub fn recreate(tombstone: &KeyValue, value: impl Into<Bytes>) -> Self {
        Self {
            prev_kv: Some(tombstone.clone()),
            ..Self::create(tombstone.key.clone(), value)
        }
    }

    /// Replace `prev` with a new value.
    pub fn update(prev: &KeyValue, value: impl Into<Bytes>) -> Self {
        Self {
            create: false,
            delete: false,
            kv: KeyValue {
                key: prev.key.clone(),
                value: value.into(),
                create_revision: prev.create_revision,
                mod_revision: 0,
                lease: prev.lease,
            },
            prev_kv: Some(prev.clone()),
        }
    }

    /// Tombstone for `prev`.
    pub fn delete(prev: &KeyValue) -> Self {
        Self {
            create: false,
            delete: true,
            kv: KeyValue {
                key: prev.key.clone(),
                value: prev.value.clone(),
                create_revision: prev.create_revision,
                mod_revision: 0,
                lease: 0,
            },
            prev_kv: Some(prev.clone()),
        }
    }

    /// Attach a lease.
    pub fn with_lease(mut self, lease: i64) -> Self {
        self.kv.lease = lease;
        self
    }

    /// Revision of this event.
    pub fn revision(&self) -> i64 {
        self.kv.mod_revision
    }

    pub fn event_type(&self) -> EventType {
        if self.delete {
            EventType::Delete
        } else {
            EventType::Put
        }
    }

    /// Revision of the superseded version, 0 if none.
    pub fn prev_revision(&self) -> i64 {
        self.prev_kv.as_ref().map_or(0, |prev| prev.mod_revision)
    }

    /// Row to append for this event. The engine assigns the id.
    pub(crate) fn to_new_row(&self) -> NewRow {
        let (prev_revision, old_value) = match &self.prev_kv {
            Some(prev) => (prev.mod_revision, prev.value.clone()),
            None => (0, Bytes::new()),
        };
        NewRow {
            name: self.kv.key.clone(),
            created: self.create,
            deleted: self.delete,
            create_revision: self.kv.create_revision,
            prev_revision,
            lease: self.kv.lease,
            value: self.kv.value.clone(),
            old_value,
        }
    }
}

impl From<Row> for Event {
    fn from(row: Row) -> Self {
        let mod_revision = row.id;
        if row.created {
            return Self {
                create: true,
                delete: row.deleted,
                kv: KeyValue {
                    key: row.name,
                    value: row.value,
                    create_revision: mod_revision,
                    mod_revision,
                    lease: row.lease,
                },
                prev_kv: None,
            };
        }

        let prev_kv = KeyValue {
            key: row.name.clone(),
            value: row.old_value,
            create_revision: row.create_revision,
            mod_revision: row.prev_revision,
            lease: row.lease,
        };
        Self {
            create: false,
            delete: row.deleted,
            kv: KeyValue {
                key: row.name,
                value: row.value,
                create_revision: row.create_revision,
                mod_revision,
                lease: row.lease,
            },
            prev_kv: Some(prev_kv),
        }
    }
}

/// Convert rows in order.
pub fn rows_to_events(rows: Vec<Row>) -> Vec<Event> {
    rows.into_iter().map(Event::from).collect()
}
