//! Durable registry of clusters and the status rows that track their
//! processes.
//!
//! Both live in one SQLite database so cluster deletion can cascade to broker
//! and status rows through foreign keys. The store keeps no cache: every read
//! goes back to the database so concurrent invocations see each other's
//! writes.

mod clusters;
mod status;

use std::path::{Path, PathBuf};

use rusqlite::Connection;
use thiserror::Error;
use tracing::debug;

pub use clusters::CreateOutcome;

pub(crate) const STORE_TARGET: &str = "kcm::store";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS cluster (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    version TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS broker (
    id INTEGER NOT NULL,
    cluster_id INTEGER NOT NULL,
    addr TEXT NOT NULL,
    PRIMARY KEY (id, cluster_id),
    FOREIGN KEY (cluster_id) REFERENCES cluster (id) ON DELETE CASCADE
);
CREATE TABLE IF NOT EXISTS broker_status (
    process_id INTEGER PRIMARY KEY,
    cluster_id INTEGER NOT NULL,
    broker_id INTEGER NOT NULL,
    UNIQUE (cluster_id, broker_id),
    FOREIGN KEY (broker_id, cluster_id) REFERENCES broker (id, cluster_id) ON DELETE CASCADE
);
CREATE TABLE IF NOT EXISTS coordination_status (
    process_id INTEGER PRIMARY KEY
);
";

/// Handle to the registry and status tables.
#[derive(Debug)]
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Opens (creating when needed) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(|source| StoreError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|source| StoreError::Open {
                path: path.to_path_buf(),
                source,
            })?;
        debug!(target: STORE_TARGET, path = %path.display(), "opened database");
        Self::initialise(conn)
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|source| StoreError::Open {
            path: PathBuf::from(":memory:"),
            source,
        })?;
        Self::initialise(conn)
    }

    fn initialise(conn: Connection) -> Result<Self, StoreError> {
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(|source| StoreError::Schema { source })?;
        conn.execute_batch(SCHEMA)
            .map_err(|source| StoreError::Schema { source })?;
        Ok(Self { conn })
    }
}

/// Errors raised by the registry and status tables.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The database file could not be opened.
    #[error("failed to open database '{path}': {source}")]
    Open {
        /// Database location.
        path: PathBuf,
        /// Underlying SQLite error.
        #[source]
        source: rusqlite::Error,
    },
    /// Applying the schema failed.
    #[error("failed to prepare database schema: {source}")]
    Schema {
        /// Underlying SQLite error.
        #[source]
        source: rusqlite::Error,
    },
    /// A statement failed.
    #[error("database {operation} failed: {source}")]
    Query {
        /// Short description of the statement.
        operation: &'static str,
        /// Underlying SQLite error.
        #[source]
        source: rusqlite::Error,
    },
    /// A stored value could not be mapped back onto the model.
    #[error("stored {what} is out of range: {value}")]
    Corrupt {
        /// Column description.
        what: &'static str,
        /// Offending value.
        value: i64,
    },
}

impl StoreError {
    pub(crate) fn query(operation: &'static str) -> impl FnOnce(rusqlite::Error) -> Self {
        move |source| Self::Query { operation, source }
    }
}
