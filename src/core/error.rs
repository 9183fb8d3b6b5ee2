//! Error types for hive-core operations.
//!
//! This module defines the canonical error type used throughout hive-core.
//! All subsystems return `Result<T, HiveError>` for error handling.

use std::io;
use thiserror::Error;

/// Canonical error type for all hive-core operations.
///
/// Uses `thiserror` for automatic `Display` and `Error` trait implementations.
/// Many variants auto-convert from standard library errors via `#[from]`.
///
/// `Conflict` is deliberately absent here: a reservation conflict is a normal
/// result (see `reservation::ReserveOutcome`), not an exceptional condition.
#[derive(Error, Debug)]
pub enum HiveError {
    /// SQLite database error (auto-converts from `rusqlite::Error`)
    #[error("sqlite error: {0}")]
    Sql(#[from] rusqlite::Error),

    /// I/O error (auto-converts from `std::io::Error`)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON (de)serialization error (auto-converts from `serde_json::Error`)
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Database initialization or migration failure
    #[error("failed to initialize database: {0}")]
    DatabaseInitialization(String),

    /// Input failed validation (malformed request, unknown enum value, etc.)
    #[error("validation error: {0}")]
    Validation(String),

    /// Resource not found (no such agent, cell, message, reservation, ...)
    #[error("not found: {0}")]
    NotFound(String),

    /// A partial cell ID prefix matched more than one cell
    #[error("ambiguous id {prefix:?}: matches {candidates:?}")]
    Ambiguous {
        prefix: String,
        candidates: Vec<String>,
    },

    /// Lock acquisition exhausted its retry budget
    #[error("lock timeout on resource {resource:?} after {attempts} attempts")]
    LockTimeout { resource: String, attempts: u32 },

    /// Lock is currently held by another holder and the caller asked to fail fast
    #[error("resource {resource:?} is locked by {holder:?}")]
    LockContention { resource: String, holder: String },

    /// A derived projection disagreed with the event log it was built from
    #[error("integrity error: {0}")]
    Integrity(String),

    /// A multi-step write failed partway through and compensating rollback
    /// could not undo every already-applied step
    #[error("rollback failed for steps: {failed:?}")]
    RollbackFailure { failed: Vec<String> },
}

impl HiveError {
    /// Stable machine-readable tag for the facade JSON envelope
    /// (`{success: false, error: {code, message, details}}`, spec.md §7).
    pub fn code(&self) -> &'static str {
        match self {
            HiveError::Sql(_) => "io_error",
            HiveError::Io(_) => "io_error",
            HiveError::Json(_) => "validation_error",
            HiveError::DatabaseInitialization(_) => "io_error",
            HiveError::Validation(_) => "validation_error",
            HiveError::NotFound(_) => "not_found",
            HiveError::Ambiguous { .. } => "ambiguous",
            HiveError::LockTimeout { .. } => "lock_timeout",
            HiveError::LockContention { .. } => "lock_contention",
            HiveError::Integrity(_) => "integrity_error",
            HiveError::RollbackFailure { .. } => "rollback_failure",
        }
    }

    /// Structured `details` payload for the error envelope, empty object
    /// when a variant carries nothing beyond its message.
    pub fn details(&self) -> serde_json::Value {
        match self {
            HiveError::Ambiguous { prefix, candidates } => {
                serde_json::json!({ "prefix": prefix, "candidates": candidates })
            }
            HiveError::LockTimeout { resource, attempts } => {
                serde_json::json!({ "resource": resource, "attempts": attempts })
            }
            HiveError::LockContention { resource, holder } => {
                serde_json::json!({ "resource": resource, "holder": holder })
            }
            HiveError::RollbackFailure { failed } => serde_json::json!({ "failed": failed }),
            _ => serde_json::json!({}),
        }
    }

    /// The `{success: false, error: {...}}` envelope shape used by the CLI
    /// and any tool-dispatch caller — never mixed with a thrown error for
    /// the same call (spec.md §7's "never both" propagation policy).
    pub fn to_envelope(&self) -> serde_json::Value {
        serde_json::json!({
            "success": false,
            "error": {
                "code": self.code(),
                "message": self.to_string(),
                "details": self.details(),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        let err = HiveError::Validation("missing field".to_string());
        assert_eq!(format!("{}", err), "validation error: missing field");
    }

    #[test]
    fn test_not_found_error_display() {
        let err = HiveError::NotFound("cell abc123 not found".to_string());
        assert_eq!(format!("{}", err), "not found: cell abc123 not found");
    }

    #[test]
    fn test_ambiguous_error_display() {
        let err = HiveError::Ambiguous {
            prefix: "ab".to_string(),
            candidates: vec!["ab12".to_string(), "ab34".to_string()],
        };
        let msg = format!("{}", err);
        assert!(msg.contains("ambiguous id"));
        assert!(msg.contains("ab12"));
    }

    #[test]
    fn test_lock_timeout_display() {
        let err = HiveError::LockTimeout {
            resource: "src/main.rs".to_string(),
            attempts: 8,
        };
        assert_eq!(
            format!("{}", err),
            "lock timeout on resource \"src/main.rs\" after 8 attempts"
        );
    }

    #[test]
    fn test_rollback_failure_display() {
        let err = HiveError::RollbackFailure {
            failed: vec!["delete epic".to_string()],
        };
        assert!(format!("{}", err).contains("delete epic"));
    }
}
