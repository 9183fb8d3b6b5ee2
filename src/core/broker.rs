//! Database broker for serialized state access (the thin waist).
//!
//! Every mutating call into a project's `hive.db` goes through
//! `DbBroker::with_conn`, which serializes access per database path (an
//! in-process mutex keyed by the db's absolute path) and appends an audit
//! record to `<project>/.hive/broker.events.jsonl`. Read-only callers may
//! still route through the broker for audit visibility, but are not
//! required to.

use crate::core::db;
use crate::core::error::HiveError;
use crate::core::time;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

/// Thin-waist broker providing serialized access to a project's database.
pub struct DbBroker {
    audit_log_path: PathBuf,
}

/// Audit record for a single brokered database operation.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BrokerEvent {
    #[serde(default = "default_broker_schema_version")]
    pub schema_version: String,
    pub request_id: String,
    /// ISO 8601 timestamp (seconds since epoch + 'Z')
    pub ts: String,
    pub event_id: String,
    pub actor: String,
    pub intent_ref: Option<String>,
    pub op: String,
    pub db_id: String,
    pub status: String,
}

impl DbBroker {
    pub fn new(root: &Path) -> Self {
        Self {
            audit_log_path: root.join(".hive").join("broker.events.jsonl"),
        }
    }

    /// Execute a closure with the serialized connection for `db_path`.
    pub fn with_conn<F, R>(
        &self,
        db_path: &Path,
        actor: &str,
        intent_ref: Option<&str>,
        op_name: &str,
        f: F,
    ) -> Result<R, HiveError>
    where
        F: FnOnce(&Connection) -> Result<R, HiveError>,
    {
        let effective_intent = intent_ref.map(|s| s.to_string());

        // Serialize operations per database path instead of globally,
        // preserving same-db safety while allowing cross-project parallelism.
        let db_lock = get_db_lock(db_path)?;
        let _lock = db_lock
            .lock()
            .map_err(|_| HiveError::Integrity("db lock poisoned".into()))?;

        let db_id = db_path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();
        let conn = db::db_connect(db_path)?;

        let result = f(&conn);

        let status = if result.is_ok() { "success" } else { "error" };
        self.log_event(actor, effective_intent.as_deref(), op_name, &db_id, status)?;

        result
    }

    /// Append one audit record directly, bypassing `with_conn`, for callers
    /// (the Facade) that hold their own long-lived connection rather than
    /// reopening one per call. Same audit file, same format.
    pub fn audit(&self, actor: &str, op: &str, db_id: &str, status: &str) -> Result<(), HiveError> {
        self.log_event(actor, None, op, db_id, status)
    }

    fn log_event(
        &self,
        actor: &str,
        intent_ref: Option<&str>,
        op: &str,
        db_id: &str,
        status: &str,
    ) -> Result<(), HiveError> {
        use std::fs::OpenOptions;
        use std::io::Write;

        if let Some(parent) = self.audit_log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let ev = BrokerEvent {
            schema_version: default_broker_schema_version(),
            request_id: time::new_event_id(),
            ts: time::now_epoch_z(),
            event_id: time::new_event_id(),
            actor: actor.to_string(),
            intent_ref: intent_ref.map(|s| s.to_string()),
            op: op.to_string(),
            db_id: db_id.to_string(),
            status: status.to_string(),
        };

        let audit_lock = get_audit_lock();
        let _audit_guard = audit_lock
            .lock()
            .map_err(|_| HiveError::Integrity("audit lock poisoned".into()))?;

        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.audit_log_path)?;

        writeln!(f, "{}", serde_json::to_string(&ev)?)?;
        Ok(())
    }
}

fn db_lock_map() -> &'static Mutex<HashMap<PathBuf, Arc<Mutex<()>>>> {
    static DB_LOCKS: OnceLock<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> = OnceLock::new();
    DB_LOCKS.get_or_init(|| Mutex::new(HashMap::new()))
}

fn get_db_lock(db_path: &Path) -> Result<Arc<Mutex<()>>, HiveError> {
    let key = db_path.to_path_buf();
    let mut map = db_lock_map()
        .lock()
        .map_err(|_| HiveError::Integrity("db lock map poisoned".into()))?;
    Ok(map
        .entry(key)
        .or_insert_with(|| Arc::new(Mutex::new(())))
        .clone())
}

fn get_audit_lock() -> &'static Mutex<()> {
    static AUDIT_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    AUDIT_LOCK.get_or_init(|| Mutex::new(()))
}

fn default_broker_schema_version() -> String {
    "1.0.0".to_string()
}
