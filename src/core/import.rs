//! Legacy directory migration and JSONL import/merge.
//!
//! On first use of a project, hive-core renames a legacy `.beads/` directory
//! to `.hive/` (if `.hive/` does not already exist), merges
//! `beads.base.jsonl` into `issues.jsonl` (`issues.jsonl` wins on a per-`id`
//! conflict — see spec.md §6 and the Open Question resolution in
//! DESIGN.md), and imports the merged records into the project database as
//! `cells` rows. This is best-effort: a malformed JSONL line is skipped, not
//! fatal, consistent with spec.md §7's "non-core concerns are best-effort"
//! propagation policy.

use crate::core::cell::CellRecord;
use crate::core::error::HiveError;
use rusqlite::Connection;
use std::collections::BTreeMap;
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::Path;

const ISSUES_FILE: &str = "issues.jsonl";
const LEGACY_BASE_FILE: &str = "beads.base.jsonl";
const LEGACY_DIR: &str = ".beads";
const HIVE_DIR: &str = ".hive";

/// Rename `<root>/.beads` to `<root>/.hive` if the legacy directory exists
/// and `.hive` does not. No-op otherwise.
pub fn migrate_legacy_directory(root: &Path) -> Result<bool, HiveError> {
    let legacy = root.join(LEGACY_DIR);
    let current = root.join(HIVE_DIR);
    if legacy.is_dir() && !current.exists() {
        fs::rename(&legacy, &current)?;
        return Ok(true);
    }
    Ok(false)
}

/// Merge `beads.base.jsonl` into `issues.jsonl` in `hive_dir`, `issues.jsonl`
/// wins per-id on conflict, then rewrite `issues.jsonl` with the merged set.
/// Returns the merged records. No-op (reads `issues.jsonl` alone) if no
/// `beads.base.jsonl` is present.
pub fn merge_legacy_base(hive_dir: &Path) -> Result<Vec<CellRecord>, HiveError> {
    let issues_path = hive_dir.join(ISSUES_FILE);
    let base_path = hive_dir.join(LEGACY_BASE_FILE);

    let mut merged: BTreeMap<String, CellRecord> = BTreeMap::new();
    if base_path.exists() {
        for record in read_jsonl(&base_path)? {
            merged.insert(record.id.clone(), record);
        }
    }
    // issues.jsonl wins: insert after, overwriting any base entry with the same id.
    if issues_path.exists() {
        for record in read_jsonl(&issues_path)? {
            merged.insert(record.id.clone(), record);
        }
    }

    let records: Vec<CellRecord> = merged.into_values().collect();

    if base_path.exists() {
        write_jsonl(&issues_path, &records)?;
    }
    Ok(records)
}

/// Read a JSONL file of `CellRecord`s, skipping malformed lines.
pub fn read_jsonl(path: &Path) -> Result<Vec<CellRecord>, HiveError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = fs::File::open(path)?;
    let reader = BufReader::new(file);
    let mut records = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Ok(record) = serde_json::from_str::<CellRecord>(trimmed) {
            records.push(record);
        }
    }
    Ok(records)
}

fn write_jsonl(path: &Path, records: &[CellRecord]) -> Result<(), HiveError> {
    use std::io::Write;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = fs::File::create(path)?;
    for record in records {
        writeln!(file, "{}", serde_json::to_string(record)?)?;
    }
    Ok(())
}

/// Import merged JSONL records into the `cells` table for `project_key`.
/// Each record is inserted or updated by `id`; a `closed`/`tombstone`
/// status without a `closed_at` falls back to `updated_at` (spec.md §6).
/// Returns `(created, updated)` counts.
pub fn import_records(
    conn: &Connection,
    project_key: &str,
    records: &[CellRecord],
) -> Result<(usize, usize), HiveError> {
    let mut created = 0;
    let mut updated = 0;

    for record in records {
        let status = if record.status == "tombstone" {
            "closed"
        } else {
            record.status.as_str()
        };
        let closed_at = if matches!(status, "closed") {
            Some(record.closed_at.clone().unwrap_or_else(|| record.updated_at.clone()))
        } else {
            None
        };
        let dependencies = record.dependencies.clone().unwrap_or_default();
        let metadata = record
            .metadata
            .clone()
            .unwrap_or_else(|| serde_json::json!({}));

        let exists: bool = conn
            .query_row(
                "SELECT 1 FROM cells WHERE project_key = ?1 AND cell_id = ?2",
                rusqlite::params![project_key, record.id],
                |_| Ok(()),
            )
            .optional_exists()?;

        conn.execute(
            "INSERT INTO cells (cell_id, project_key, cell_type, title, description, status,
                priority, parent_id, assignee, dependencies, metadata, created_at, updated_at, closed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
             ON CONFLICT(cell_id) DO UPDATE SET
                cell_type = excluded.cell_type,
                title = excluded.title,
                description = excluded.description,
                status = excluded.status,
                priority = excluded.priority,
                parent_id = excluded.parent_id,
                assignee = excluded.assignee,
                dependencies = excluded.dependencies,
                metadata = excluded.metadata,
                updated_at = excluded.updated_at,
                closed_at = excluded.closed_at",
            rusqlite::params![
                record.id,
                project_key,
                record.issue_type,
                record.title,
                record.description,
                status,
                record.priority,
                record.parent_id,
                record.assignee,
                serde_json::to_string(&dependencies)?,
                metadata.to_string(),
                record.created_at,
                record.updated_at,
                closed_at,
            ],
        )?;

        if exists {
            updated += 1;
        } else {
            created += 1;
        }
    }

    Ok((created, updated))
}

/// Convenience adapter: `query_row` that only cares about row existence.
trait OptionalExists {
    fn optional_exists(self) -> Result<bool, HiveError>;
}

impl OptionalExists for Result<(), rusqlite::Error> {
    fn optional_exists(self) -> Result<bool, HiveError> {
        match self {
            Ok(()) => Ok(true),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(false),
            Err(err) => Err(HiveError::from(err)),
        }
    }
}

/// Run the full first-open sequence: legacy rename, base-file merge, DB
/// import. Safe to call on every open; each step is idempotent.
pub fn run_on_open(conn: &Connection, root: &Path, project_key: &str) -> Result<(usize, usize), HiveError> {
    migrate_legacy_directory(root)?;
    let hive_dir = root.join(HIVE_DIR);
    if !hive_dir.exists() {
        return Ok((0, 0));
    }
    let records = merge_legacy_base(&hive_dir)?;
    if records.is_empty() {
        return Ok((0, 0));
    }
    import_records(conn, project_key, &records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schemas;
    use std::io::Write;

    fn conn_with_schema() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        for statement in schemas::ALL_STATEMENTS {
            conn.execute(statement, []).unwrap();
        }
        conn
    }

    #[test]
    fn test_migrate_legacy_directory_renames_beads_to_hive() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join(".beads")).unwrap();
        let renamed = migrate_legacy_directory(dir.path()).unwrap();
        assert!(renamed);
        assert!(dir.path().join(".hive").is_dir());
        assert!(!dir.path().join(".beads").exists());
    }

    #[test]
    fn test_migrate_legacy_directory_noop_when_hive_exists() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join(".beads")).unwrap();
        fs::create_dir(dir.path().join(".hive")).unwrap();
        let renamed = migrate_legacy_directory(dir.path()).unwrap();
        assert!(!renamed);
        assert!(dir.path().join(".beads").is_dir());
    }

    fn sample_record(id: &str, status: &str) -> CellRecord {
        CellRecord {
            id: id.to_string(),
            title: format!("title-{id}"),
            description: None,
            status: status.to_string(),
            priority: 1,
            issue_type: "task".to_string(),
            created_at: "2026-01-01T00:00:00.000Z".to_string(),
            updated_at: "2026-01-02T00:00:00.000Z".to_string(),
            closed_at: None,
            parent_id: None,
            assignee: None,
            dependencies: None,
            metadata: None,
        }
    }

    #[test]
    fn test_merge_legacy_base_issues_wins_on_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let hive_dir = dir.path().join(".hive");
        fs::create_dir(&hive_dir).unwrap();

        let mut base_record = sample_record("bg-aaaaaa", "open");
        base_record.title = "from-base".to_string();
        let mut base_file = fs::File::create(hive_dir.join(LEGACY_BASE_FILE)).unwrap();
        writeln!(base_file, "{}", serde_json::to_string(&base_record).unwrap()).unwrap();

        let mut issues_record = sample_record("bg-aaaaaa", "open");
        issues_record.title = "from-issues".to_string();
        let mut issues_file = fs::File::create(hive_dir.join(ISSUES_FILE)).unwrap();
        writeln!(issues_file, "{}", serde_json::to_string(&issues_record).unwrap()).unwrap();

        let merged = merge_legacy_base(&hive_dir).unwrap();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].title, "from-issues");
    }

    #[test]
    fn test_import_records_closed_without_closed_at_falls_back_to_updated_at() {
        let conn = conn_with_schema();
        let record = sample_record("bg-bbbbbb", "tombstone");
        let (created, updated) = import_records(&conn, "p1", std::slice::from_ref(&record)).unwrap();
        assert_eq!(created, 1);
        assert_eq!(updated, 0);

        let (status, closed_at): (String, Option<String>) = conn
            .query_row(
                "SELECT status, closed_at FROM cells WHERE cell_id = ?1",
                ["bg-bbbbbb"],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(status, "closed");
        assert_eq!(closed_at.as_deref(), Some(record.updated_at.as_str()));
    }

    #[test]
    fn test_import_records_is_idempotent_on_reimport() {
        let conn = conn_with_schema();
        let record = sample_record("bg-cccccc", "open");
        import_records(&conn, "p1", std::slice::from_ref(&record)).unwrap();
        let (created, updated) = import_records(&conn, "p1", std::slice::from_ref(&record)).unwrap();
        assert_eq!(created, 0);
        assert_eq!(updated, 1);
    }
}
