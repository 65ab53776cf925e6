//! Store layout shared by the gateway and the repository façade.
//!
//! Each object store holds JSON record documents keyed by their entity id.
//! Indexed fields are mirrored into dedicated columns at write time so
//! secondary lookups never have to scan documents.

use std::fmt;

use rusqlite::types::Value;
use serde::de::DeserializeOwned;
use serde::Serialize;

pub mod blob;
pub mod gateway;
pub mod prefs;
pub mod repo;

/// Key column type of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Text,
    Integer,
}

/// A secondary index over one extracted record field.
#[derive(Debug, Clone, Copy)]
pub struct IndexDef {
    pub name: &'static str,
}

/// Static description of one object store.
#[derive(Debug)]
pub struct StoreDef {
    pub name: &'static str,
    pub key: KeyKind,
    pub indexes: &'static [IndexDef],
}

/// The submissions store: one record per generation request.
pub const SUBMISSIONS: StoreDef = StoreDef {
    name: "submissions",
    key: KeyKind::Text,
    indexes: &[
        IndexDef { name: "user_id" },
        IndexDef { name: "status" },
        IndexDef { name: "priority" },
    ],
};

/// The staging rows store, keyed by the small positional row id.
pub const USER_ROWS: StoreDef = StoreDef {
    name: "userRows",
    key: KeyKind::Integer,
    indexes: &[IndexDef { name: "user_id" }],
};

/// The image metadata store, indexed by owning submission.
pub const IMAGES: StoreDef = StoreDef {
    name: "images",
    key: KeyKind::Text,
    indexes: &[IndexDef { name: "submission_id" }],
};

pub(crate) const OBJECT_STORES: [&StoreDef; 3] = [&SUBMISSIONS, &USER_ROWS, &IMAGES];

/// A primary key value for any store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StoreKey {
    Text(String),
    Integer(i64),
}

impl StoreKey {
    pub fn text(value: impl Into<String>) -> Self {
        StoreKey::Text(value.into())
    }

    pub(crate) fn to_sql(&self) -> Value {
        match self {
            StoreKey::Text(s) => Value::Text(s.clone()),
            StoreKey::Integer(i) => Value::Integer(*i),
        }
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreKey::Text(s) => write!(f, "'{s}'"),
            StoreKey::Integer(i) => write!(f, "{i}"),
        }
    }
}

impl From<u32> for StoreKey {
    fn from(id: u32) -> Self {
        StoreKey::Integer(id as i64)
    }
}

/// A record that lives in one of the object stores.
///
/// The repository façade derives everything from this: which table to hit,
/// how to bind the key, and which index columns to fill.
pub trait StoreRecord: Serialize + DeserializeOwned {
    const STORE: &'static StoreDef;

    /// Primary key of this record.
    fn key(&self) -> StoreKey;

    /// Indexed field values, in the order declared by [`StoreDef::indexes`].
    /// `None` leaves the index column NULL, excluding the record from that
    /// index.
    fn index_values(&self) -> Vec<Option<String>>;
}

/// A typed partial update applied to a record inside the update transaction.
///
/// `None` fields keep the stored value, so concurrent patches to disjoint
/// fields both land instead of the later write resurrecting stale state.
pub trait RecordPatch<T>: Send + 'static {
    fn apply_to(&self, record: &mut T);
}
