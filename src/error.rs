//! Error types for the storage core and the staging flows built on it.

use thiserror::Error;

use crate::store::StoreKey;

/// Errors surfaced by the object store gateway and the repository façade.
///
/// Nothing below this layer swallows a failure: every rejected operation
/// carries one of these to the caller. The lifecycle handle additionally
/// records the latest value for observability before re-throwing.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// The host has no usable storage location, so persistence is off the
    /// table entirely (headless environments, or a gateway constructed as
    /// unavailable on purpose).
    #[error("persistent storage is not available in this environment")]
    UnsupportedEnvironment,

    /// The engine failed to open or set up the database: unreadable file,
    /// exhausted quota, or a schema on disk newer than this build supports.
    #[error("failed to open the studio database: {message}")]
    OpenError { message: String },

    /// An operation ran without successful initialization, and the one lazy
    /// re-initialization attempt failed as well. Carries the cause.
    #[error("store not initialized: {0}")]
    NotInitialized(#[source] Box<StoreError>),

    /// `add` refused to overwrite an existing record. The record already
    /// stored under this key is left untouched.
    #[error("duplicate key {key} in store '{store}'")]
    DuplicateKey {
        store: &'static str,
        key: StoreKey,
    },

    /// The record an `update` targeted does not exist.
    #[error("no record with key {key} in store '{store}'")]
    NotFound {
        store: &'static str,
        key: StoreKey,
    },

    /// Generic engine or serialization failure on a transaction.
    #[error("{op} failed: {message}")]
    OperationFailed {
        op: &'static str,
        message: String,
    },
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Errors from the staging-table flows (uploads and submits), layered over
/// the storage taxonomy.
#[derive(Error, Debug)]
pub enum StudioError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The staging table has no row with this id.
    #[error("row {0} does not exist in the staging table")]
    RowNotFound(u32),

    /// Submit needs at least one inspiration image and one area image.
    #[error("row {row_id} is not ready to submit ({inspiration} inspiration / {area} area images)")]
    NotEligible {
        row_id: u32,
        inspiration: usize,
        area: usize,
    },

    /// The uploaded bytes could not be decoded as an image.
    #[error("'{name}' is not a readable image: {message}")]
    UnreadableImage { name: String, message: String },
}
