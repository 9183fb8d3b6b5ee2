//! Forward-only schema migration system.
//!
//! Every project database starts at the baseline schema (`core::schemas`)
//! and is brought up to the latest version at open time. Applied migration
//! ids are recorded in the `schema_migrations` table inside the project's
//! own `hive.db`, rather than a side JSON ledger file — hive-core has
//! exactly one database per project, so an in-db ledger is the natural home
//! for it (the teacher's multi-subsystem layout needed an external ledger
//! because it had many database files to track at once).

use crate::core::error::HiveError;
use crate::core::time;
use rusqlite::{Connection, OptionalExtension};

/// Current crate version, used only to annotate applied-migration rows.
pub const HIVE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// A single forward-only migration.
pub struct Migration {
    /// Stable identifier, durable across runs and recorded in the ledger.
    pub id: &'static str,
    /// Human-readable description.
    pub description: &'static str,
    /// Migration body. Runs inside the caller's transaction.
    pub up: fn(&Connection) -> Result<(), HiveError>,
}

/// All migrations beyond the baseline schema, in chronological order.
///
/// The baseline schema (`core::schemas::ALL_STATEMENTS`) is always applied
/// first and unconditionally; entries here run once each, in order, the
/// first time a database is opened at a version that hasn't seen them.
pub fn all_migrations() -> Vec<Migration> {
    vec![
        // Placeholder for the next schema change. No migrations have been
        // needed since the baseline schema; this list exists so a future
        // change has an established append point and ledger to land on.
    ]
}

/// Apply any pending migrations against an already-open connection.
/// Idempotent: safe to call on every `Facade::open`.
pub fn check_and_migrate(conn: &Connection) -> Result<(), HiveError> {
    conn.execute_batch("BEGIN")?;
    let result = run_migrations(conn);
    match result {
        Ok(()) => {
            conn.execute_batch("COMMIT")?;
            Ok(())
        }
        Err(err) => {
            conn.execute_batch("ROLLBACK")?;
            Err(err)
        }
    }
}

fn run_migrations(conn: &Connection) -> Result<(), HiveError> {
    for migration in all_migrations() {
        if is_applied(conn, migration.id)? {
            continue;
        }
        (migration.up)(conn)?;
        record_applied(conn, migration.id)?;
    }
    Ok(())
}

fn is_applied(conn: &Connection, id: &str) -> Result<bool, HiveError> {
    let applied: Option<String> = conn
        .query_row(
            "SELECT id FROM schema_migrations WHERE id = ?1",
            [id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(applied.is_some())
}

fn record_applied(conn: &Connection, id: &str) -> Result<(), HiveError> {
    conn.execute(
        "INSERT INTO schema_migrations (id, applied_at) VALUES (?1, ?2)",
        rusqlite::params![id, time::now_epoch_secs()],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schemas;

    fn fresh_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        for statement in schemas::ALL_STATEMENTS {
            conn.execute(statement, []).unwrap();
        }
        conn
    }

    #[test]
    fn test_check_and_migrate_is_idempotent() {
        let conn = fresh_conn();
        check_and_migrate(&conn).unwrap();
        check_and_migrate(&conn).unwrap();
    }

    #[test]
    fn test_is_applied_false_for_unknown_id() {
        let conn = fresh_conn();
        assert!(!is_applied(&conn, "nonexistent.v001").unwrap());
    }

    #[test]
    fn test_record_and_check_applied() {
        let conn = fresh_conn();
        record_applied(&conn, "test.v001").unwrap();
        assert!(is_applied(&conn, "test.v001").unwrap());
    }
}
