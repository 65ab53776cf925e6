//! Object store gateway: owns the embedded database and its schema.
//!
//! One gateway wraps one SQLite database, either a file under the user data
//! directory or an in-memory database for tests and demos. The schema is
//! created idempotently on open and stamped with [`SCHEMA_VERSION`];
//! reopening an existing database at the same version touches nothing.
//!
//! All database work runs on the blocking pool. Callers only ever see
//! `async` methods, so every durable operation is a suspension point.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use tokio::task;
use tracing::{debug, info, warn};

use crate::config::StudioConfig;
use crate::error::{StoreError, StoreResult};
use crate::store::{KeyKind, StoreDef, OBJECT_STORES};

/// Database file name inside the profile directory.
const DB_FILE: &str = "decor_studio.db";

/// Directory under the platform data dir that holds the database.
const DB_DIR: &str = "decor-studio";

/// Current schema version, stamped into `PRAGMA user_version`.
const SCHEMA_VERSION: i64 = 1;

/// Where a gateway keeps its data, if anywhere.
#[derive(Debug, Clone)]
enum Location {
    OnDisk(PathBuf),
    InMemory,
    /// No usable storage on this host. Every durable operation fails with
    /// [`StoreError::UnsupportedEnvironment`].
    Unavailable,
}

/// Owns the single connection to the studio database.
///
/// Cloning is cheap and shares the connection. [`initialize`] is idempotent,
/// so several owners may call it without coordination.
///
/// [`initialize`]: StoreGateway::initialize
#[derive(Clone)]
pub struct StoreGateway {
    inner: Arc<GatewayInner>,
}

struct GatewayInner {
    location: Location,
    conn: Mutex<Option<Connection>>,
}

impl StoreGateway {
    /// Gateway at the platform-default location.
    ///
    /// The database lands under the user data directory (falling back to the
    /// home directory), or under `config.data_dir` when set. A host with
    /// neither yields a gateway without persistence capability rather than
    /// an error; the failure surfaces on first use.
    pub fn open_default(config: &StudioConfig) -> Self {
        let base = config
            .data_dir
            .clone()
            .or_else(|| dirs::data_dir())
            .or_else(|| dirs::home_dir());
        match base {
            Some(mut path) => {
                path.push(DB_DIR);
                path.push(DB_FILE);
                Self::at_path(path)
            }
            None => {
                warn!("no data directory on this host, persistence disabled");
                Self::unavailable()
            }
        }
    }

    /// Gateway backed by an explicit database file.
    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self::with_location(Location::OnDisk(path.into()))
    }

    /// Gateway backed by a transient in-memory database. Closing it discards
    /// all data.
    pub fn in_memory() -> Self {
        Self::with_location(Location::InMemory)
    }

    /// Gateway for hosts without any usable storage.
    pub fn unavailable() -> Self {
        Self::with_location(Location::Unavailable)
    }

    fn with_location(location: Location) -> Self {
        StoreGateway {
            inner: Arc::new(GatewayInner {
                location,
                conn: Mutex::new(None),
            }),
        }
    }

    /// Whether this host can persist at all.
    pub fn is_supported(&self) -> bool {
        !matches!(self.inner.location, Location::Unavailable)
    }

    /// True after a successful [`initialize`](Self::initialize) while the
    /// connection is still open.
    pub fn is_ready(&self) -> bool {
        self.is_supported()
            && self
                .inner
                .conn
                .lock()
                .expect("gateway lock poisoned")
                .is_some()
    }

    /// Path of the database file, when disk-backed.
    pub fn db_path(&self) -> Option<&Path> {
        match &self.inner.location {
            Location::OnDisk(path) => Some(path),
            _ => None,
        }
    }

    /// Open the database, creating it and its schema if absent.
    ///
    /// Idempotent: calling again while open is a no-op. Concurrent callers
    /// serialize on the connection slot, so the schema setup runs at most
    /// once per open.
    pub async fn initialize(&self) -> StoreResult<()> {
        let inner = Arc::clone(&self.inner);
        task::spawn_blocking(move || {
            let mut slot = inner.conn.lock().expect("gateway lock poisoned");
            if slot.is_some() {
                return Ok(());
            }
            open_into(&inner, &mut slot)
        })
        .await
        .map_err(join_error)?
    }

    /// Drop the connection, as the engine does on eviction. Later operations
    /// must re-initialize; nothing queues against a closed connection.
    pub fn close(&self) {
        let mut slot = self.inner.conn.lock().expect("gateway lock poisoned");
        if slot.take().is_some() {
            debug!("studio database connection closed");
        }
    }

    /// Run `f` against the open connection on the blocking pool.
    ///
    /// A missing connection gets one lazy open attempt first; if that fails
    /// the operation is rejected with [`StoreError::NotInitialized`] carrying
    /// the cause (or [`StoreError::UnsupportedEnvironment`] on incapable
    /// hosts).
    pub(crate) async fn with_conn<R, F>(&self, f: F) -> StoreResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut Connection) -> StoreResult<R> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        task::spawn_blocking(move || {
            let mut slot = inner.conn.lock().expect("gateway lock poisoned");
            if slot.is_none() {
                if let Err(err) = open_into(&inner, &mut slot) {
                    return Err(match err {
                        StoreError::UnsupportedEnvironment => StoreError::UnsupportedEnvironment,
                        other => StoreError::NotInitialized(Box::new(other)),
                    });
                }
            }
            let conn = slot.as_mut().expect("connection present after open");
            f(conn)
        })
        .await
        .map_err(join_error)?
    }
}

/// Open the database for `inner` and park the connection in `slot`.
fn open_into(inner: &GatewayInner, slot: &mut Option<Connection>) -> StoreResult<()> {
    let conn = match &inner.location {
        Location::Unavailable => return Err(StoreError::UnsupportedEnvironment),
        Location::InMemory => Connection::open_in_memory().map_err(open_error)?,
        Location::OnDisk(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| StoreError::OpenError {
                    message: format!("cannot create {}: {e}", parent.display()),
                })?;
            }
            Connection::open(path).map_err(open_error)?
        }
    };
    apply_schema(&conn)?;
    if let Location::OnDisk(path) = &inner.location {
        info!(path = %path.display(), "studio database ready");
    }
    *slot = Some(conn);
    Ok(())
}

/// Create every store, its indexes and the auxiliary tables, idempotently,
/// in one transaction.
///
/// A database stamped with a version newer than this build understands is
/// refused outright instead of being silently rewritten.
fn apply_schema(conn: &Connection) -> StoreResult<()> {
    let version: i64 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .map_err(open_error)?;
    if version > SCHEMA_VERSION {
        return Err(StoreError::OpenError {
            message: format!(
                "database schema version {version} is newer than supported version {SCHEMA_VERSION}"
            ),
        });
    }

    let mut ddl = String::from("BEGIN;\n");
    for store in OBJECT_STORES {
        ddl.push_str(&create_store_sql(store));
    }
    // Image bytes live out-of-band, keyed by upload id.
    ddl.push_str(
        "CREATE TABLE IF NOT EXISTS blobs (
            id              TEXT PRIMARY KEY,
            bytes           BLOB NOT NULL,
            created_at      INTEGER NOT NULL
        );\n",
    );
    // Best-effort scalar cache, last-write-wins.
    ddl.push_str(
        "CREATE TABLE IF NOT EXISTS prefs (
            key             TEXT PRIMARY KEY,
            value           TEXT NOT NULL
        );\n",
    );
    ddl.push_str(&format!("PRAGMA user_version = {SCHEMA_VERSION};\n"));
    ddl.push_str("COMMIT;");
    conn.execute_batch(&ddl).map_err(open_error)
}

/// DDL for one object store: key column, JSON record column, one column and
/// one index per secondary index.
fn create_store_sql(store: &StoreDef) -> String {
    let key_type = match store.key {
        KeyKind::Text => "TEXT",
        KeyKind::Integer => "INTEGER",
    };
    let mut sql = format!(
        "CREATE TABLE IF NOT EXISTS \"{}\" (\n    id {} PRIMARY KEY,\n    record TEXT NOT NULL",
        store.name, key_type
    );
    for index in store.indexes {
        sql.push_str(&format!(",\n    {} TEXT", index.name));
    }
    sql.push_str("\n);\n");
    for index in store.indexes {
        sql.push_str(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{}_{} ON \"{}\"({});\n",
            store.name, index.name, store.name, index.name
        ));
    }
    sql
}

fn open_error(err: rusqlite::Error) -> StoreError {
    StoreError::OpenError {
        message: err.to_string(),
    }
}

fn join_error(err: task::JoinError) -> StoreError {
    StoreError::OperationFailed {
        op: "storage task",
        message: err.to_string(),
    }
}
