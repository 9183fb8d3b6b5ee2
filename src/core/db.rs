//! Database connection and initialization utilities.
//!
//! Low-level connection primitives plus the one-time schema bootstrap for a
//! project's `hive.db`. Mutations never go through this module directly;
//! callers serialize through `core::broker::DbBroker::with_conn`.
//!
//! - WAL mode enabled for better concurrency
//! - Foreign keys enforced
//! - 5-second busy timeout for lock contention

use crate::core::broker::DbBroker;
use crate::core::error::HiveError;
use crate::core::schemas;
use rusqlite::Connection;
use std::fs;
use std::path::{Path, PathBuf};

/// Establish a SQLite connection with hive-core's standard configuration.
pub fn db_connect(db_path: &Path) -> Result<Connection, HiveError> {
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))?;
    conn.execute("PRAGMA foreign_keys=ON;", [])?;
    Ok(conn)
}

pub fn hive_db_path(root: &Path) -> PathBuf {
    root.join(".hive").join(schemas::HIVE_DB_NAME)
}

/// Create the `.hive` directory (if missing) and apply the baseline schema.
/// Forward-only migrations beyond the baseline are applied separately by
/// `core::migration::check_and_migrate`.
pub fn initialize_hive_db(root: &Path) -> Result<(), HiveError> {
    let db_path = hive_db_path(root);
    let parent_dir = db_path
        .parent()
        .ok_or_else(|| HiveError::DatabaseInitialization("hive.db has no parent dir".into()))?;
    fs::create_dir_all(parent_dir)?;

    let broker = DbBroker::new(root);
    broker.with_conn(&db_path, "hive-core", None, "db.init", |conn| {
        for statement in schemas::ALL_STATEMENTS {
            conn.execute(statement, [])?;
        }
        Ok(())
    })?;

    Ok(())
}
