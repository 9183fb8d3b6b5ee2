//! Cell tracker: work-item ("bead") lifecycle, atomic epic creation with
//! rollback, partial-ID resolution, dirty-set tracking, and JSONL flush.

use crate::core::error::HiveError;
use crate::core::event_store::{EventStore, EventType};
use rusqlite::{Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::Write;
use std::sync::{Arc, Mutex};
use ulid::Ulid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellType {
    Bug,
    Feature,
    Task,
    Epic,
    Chore,
}

impl CellType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CellType::Bug => "bug",
            CellType::Feature => "feature",
            CellType::Task => "task",
            CellType::Epic => "epic",
            CellType::Chore => "chore",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        Some(match s {
            "bug" => CellType::Bug,
            "feature" => CellType::Feature,
            "task" => CellType::Task,
            "epic" => CellType::Epic,
            "chore" => CellType::Chore,
            _ => return None,
        })
    }

    fn id_prefix(&self) -> &'static str {
        match self {
            CellType::Epic => "epic",
            CellType::Bug => "bg",
            CellType::Feature => "ft",
            CellType::Task => "tk",
            CellType::Chore => "ch",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellStatus {
    Open,
    InProgress,
    Blocked,
    Closed,
}

impl CellStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CellStatus::Open => "open",
            CellStatus::InProgress => "in_progress",
            CellStatus::Blocked => "blocked",
            CellStatus::Closed => "closed",
        }
    }

    /// `tombstone` is accepted on import and normalized to `closed` — see the
    /// Cell invariant in the data model.
    pub fn from_str_opt(s: &str) -> Option<Self> {
        Some(match s {
            "open" => CellStatus::Open,
            "in_progress" => CellStatus::InProgress,
            "blocked" => CellStatus::Blocked,
            "closed" | "tombstone" => CellStatus::Closed,
            _ => return None,
        })
    }

    fn can_transition_to(self, to: CellStatus) -> bool {
        use CellStatus::*;
        if to == Closed {
            return true;
        }
        matches!(
            (self, to),
            (Open, InProgress)
                | (InProgress, Open)
                | (Open, Blocked)
                | (Blocked, Open)
                | (InProgress, Blocked)
                | (Blocked, InProgress)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cell {
    pub id: String,
    pub project_key: String,
    pub cell_type: CellType,
    pub title: String,
    pub description: Option<String>,
    pub status: CellStatus,
    pub priority: i64,
    pub category: Option<String>,
    pub component: Option<String>,
    pub parent_id: Option<String>,
    pub assignee: Option<String>,
    pub dependencies: Vec<String>,
    pub metadata: JsonValue,
    pub created_at: String,
    pub updated_at: String,
    pub closed_at: Option<String>,
}

/// Arguments for creating one cell.
#[derive(Debug, Clone)]
pub struct CellArgs {
    pub cell_type: CellType,
    pub title: String,
    pub description: Option<String>,
    pub priority: i64,
    pub category: Option<String>,
    pub component: Option<String>,
    pub parent_id: Option<String>,
    pub assignee: Option<String>,
    pub dependencies: Vec<String>,
    pub metadata: JsonValue,
}

impl CellArgs {
    pub fn new(cell_type: CellType, title: impl Into<String>) -> Self {
        Self {
            cell_type,
            title: title.into(),
            description: None,
            priority: 2,
            category: None,
            component: None,
            parent_id: None,
            assignee: None,
            dependencies: Vec::new(),
            metadata: json!({}),
        }
    }
}

/// Patch applied by `update_cell`. `None` fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct CellPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<i64>,
    pub category: Option<String>,
    pub component: Option<String>,
    pub assignee: Option<String>,
    pub dependencies: Option<Vec<String>>,
    pub metadata: Option<JsonValue>,
}

#[derive(Debug, Clone, Default)]
pub struct CellQuery {
    pub status: Option<CellStatus>,
    pub cell_type: Option<CellType>,
    pub parent_id: Option<String>,
    pub ready: bool,
    pub limit: Option<i64>,
}

/// One JSONL record as read from / written to `.hive/issues.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellRecord {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub status: String,
    pub priority: i64,
    pub issue_type: String,
    pub created_at: String,
    pub updated_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<String>,
    pub parent_id: Option<String>,
    pub assignee: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<JsonValue>,
}

impl From<&Cell> for CellRecord {
    fn from(cell: &Cell) -> Self {
        Self {
            id: cell.id.clone(),
            title: cell.title.clone(),
            description: cell.description.clone(),
            status: cell.status.as_str().to_string(),
            priority: cell.priority,
            issue_type: cell.cell_type.as_str().to_string(),
            created_at: cell.created_at.clone(),
            updated_at: cell.updated_at.clone(),
            closed_at: cell.closed_at.clone(),
            parent_id: cell.parent_id.clone(),
            assignee: cell.assignee.clone(),
            dependencies: if cell.dependencies.is_empty() {
                None
            } else {
                Some(cell.dependencies.clone())
            },
            metadata: if cell.metadata.as_object().map(|o| o.is_empty()).unwrap_or(false) {
                None
            } else {
                Some(cell.metadata.clone())
            },
        }
    }
}

pub struct CellTracker {
    conn: Arc<Mutex<Connection>>,
    event_store: Arc<EventStore>,
    hive_dir: std::path::PathBuf,
    dirty: Mutex<HashMap<String, HashSet<String>>>,
}

impl CellTracker {
    pub fn new(
        conn: Arc<Mutex<Connection>>,
        event_store: Arc<EventStore>,
        hive_dir: std::path::PathBuf,
    ) -> Self {
        Self {
            conn,
            event_store,
            hive_dir,
            dirty: Mutex::new(HashMap::new()),
        }
    }

    fn generate_id(cell_type: CellType) -> String {
        let ulid = Ulid::new().to_string().to_lowercase();
        let short = &ulid[ulid.len() - 6..];
        format!("{}-{}", cell_type.id_prefix(), short)
    }

    fn cell_created_payload(cell_id: &str, parent_id: Option<&str>, args: &CellArgs) -> JsonValue {
        json!({
            "cell_id": cell_id,
            "cell_type": args.cell_type.as_str(),
            "title": args.title,
            "description": args.description,
            "priority": args.priority,
            "category": args.category,
            "component": args.component,
            "parent_id": parent_id,
            "assignee": args.assignee,
            "dependencies": args.dependencies,
            "metadata": args.metadata,
        })
    }

    /// Insert one cell; emits `cell_created`; marks it dirty.
    pub fn create_cell(
        &self,
        project_key: &str,
        actor: &str,
        args: CellArgs,
    ) -> Result<Cell, HiveError> {
        let cell_id = Self::generate_id(args.cell_type);
        let payload = Self::cell_created_payload(&cell_id, args.parent_id.as_deref(), &args);
        self.event_store
            .append(project_key, EventType::CellCreated, actor, payload)?;
        self.mark_dirty(project_key, &cell_id);
        self.get_cell_exact(project_key, &cell_id)
    }

    /// Atomically create an epic plus its subtasks: one transaction appends
    /// every `cell_created` event, so a failure partway through (e.g. a
    /// validation error on a subtask) leaves zero cells behind — no
    /// compensating deletes are needed because nothing has been committed.
    pub fn create_epic(
        &self,
        project_key: &str,
        actor: &str,
        epic_args: CellArgs,
        subtasks: Vec<CellArgs>,
    ) -> Result<(Cell, Vec<Cell>), HiveError> {
        let epic_id = Self::generate_id(CellType::Epic);
        let mut events = vec![(
            EventType::CellCreated,
            Self::cell_created_payload(&epic_id, None, &epic_args),
        )];

        let mut subtask_ids = Vec::with_capacity(subtasks.len());
        for subtask in &subtasks {
            let subtask_id = Self::generate_id(subtask.cell_type);
            events.push((
                EventType::CellCreated,
                Self::cell_created_payload(&subtask_id, Some(&epic_id), subtask),
            ));
            subtask_ids.push(subtask_id);
        }

        self.event_store.append_many(project_key, actor, events)?;

        self.mark_dirty(project_key, &epic_id);
        for id in &subtask_ids {
            self.mark_dirty(project_key, id);
        }
        self.flush(project_key)?;

        let epic = self.get_cell_exact(project_key, &epic_id)?;
        let children = subtask_ids
            .iter()
            .map(|id| self.get_cell_exact(project_key, id))
            .collect::<Result<Vec<_>, _>>()?;
        Ok((epic, children))
    }

    /// Resolve `id_or_prefix` (full id or unambiguous prefix) and fetch it.
    pub fn get_cell(&self, project_key: &str, id_or_prefix: &str) -> Result<Cell, HiveError> {
        let cell_id = self.resolve_partial_id(project_key, id_or_prefix)?;
        self.get_cell_exact(project_key, &cell_id)
    }

    fn get_cell_exact(&self, project_key: &str, cell_id: &str) -> Result<Cell, HiveError> {
        let conn = self.lock_conn()?;
        conn.query_row(
            "SELECT cell_id, project_key, cell_type, title, description, status, priority,
                    category, component, parent_id, assignee, dependencies, metadata,
                    created_at, updated_at, closed_at
             FROM cells WHERE project_key = ?1 AND cell_id = ?2",
            rusqlite::params![project_key, cell_id],
            row_to_cell,
        )
        .optional()?
        .ok_or_else(|| HiveError::NotFound(format!("cell {cell_id:?} not found")))?
    }

    fn all_cells(&self, project_key: &str) -> Result<Vec<Cell>, HiveError> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT cell_id, project_key, cell_type, title, description, status, priority,
                    category, component, parent_id, assignee, dependencies, metadata,
                    created_at, updated_at, closed_at
             FROM cells WHERE project_key = ?1",
        )?;
        let rows = stmt
            .query_map([project_key], row_to_cell)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().collect()
    }

    pub fn query_cells(&self, project_key: &str, query: CellQuery) -> Result<Vec<Cell>, HiveError> {
        let all = self.all_cells(project_key)?;

        if query.ready {
            let closed_ids: HashSet<&str> = all
                .iter()
                .filter(|c| c.status == CellStatus::Closed)
                .map(|c| c.id.as_str())
                .collect();
            let mut ready: Vec<Cell> = all
                .into_iter()
                .filter(|c| {
                    c.status != CellStatus::Closed
                        && c.dependencies.iter().all(|d| closed_ids.contains(d.as_str()))
                })
                .collect();
            ready.sort_by(|a, b| {
                a.priority
                    .cmp(&b.priority)
                    .then_with(|| a.created_at.cmp(&b.created_at))
                    .then_with(|| a.id.cmp(&b.id))
            });
            ready.truncate(query.limit.unwrap_or(1).max(0) as usize);
            return Ok(ready);
        }

        let mut filtered: Vec<Cell> = all
            .into_iter()
            .filter(|c| query.status.map_or(true, |s| c.status == s))
            .filter(|c| query.cell_type.map_or(true, |t| c.cell_type == t))
            .filter(|c| {
                query
                    .parent_id
                    .as_deref()
                    .map_or(true, |p| c.parent_id.as_deref() == Some(p))
            })
            .collect();

        if let Some(limit) = query.limit {
            filtered.truncate(limit.max(0) as usize);
        }
        Ok(filtered)
    }

    /// Deterministic `ready` selection: unblocked, highest priority
    /// (numerically lowest wins), ties broken by earliest `created_at` then
    /// lexicographic id.
    pub fn get_next_ready_cell(&self, project_key: &str) -> Result<Option<Cell>, HiveError> {
        let mut query = CellQuery::default();
        query.ready = true;
        query.limit = Some(1);
        Ok(self.query_cells(project_key, query)?.into_iter().next())
    }

    /// Resolve a full id or unambiguous prefix to a full cell id.
    pub fn resolve_partial_id(&self, project_key: &str, id_or_prefix: &str) -> Result<String, HiveError> {
        let conn = self.lock_conn()?;
        let exact: Option<String> = conn
            .query_row(
                "SELECT cell_id FROM cells WHERE project_key = ?1 AND cell_id = ?2",
                rusqlite::params![project_key, id_or_prefix],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(id) = exact {
            return Ok(id);
        }

        let mut stmt = conn.prepare(
            "SELECT cell_id FROM cells WHERE project_key = ?1 AND cell_id LIKE ?2 || '%'",
        )?;
        let candidates: Vec<String> = stmt
            .query_map(rusqlite::params![project_key, id_or_prefix], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;

        match candidates.len() {
            0 => Err(HiveError::NotFound(format!(
                "no cell matching {id_or_prefix:?}"
            ))),
            1 => Ok(candidates.into_iter().next().unwrap()),
            _ => Err(HiveError::Ambiguous {
                prefix: id_or_prefix.to_string(),
                candidates,
            }),
        }
    }

    /// Apply a status transition, validating against the state machine.
    /// Transitioning to `closed` is delegated to `close_cell`.
    pub fn change_cell_status(
        &self,
        project_key: &str,
        id_or_prefix: &str,
        actor: &str,
        new_status: CellStatus,
    ) -> Result<Cell, HiveError> {
        if new_status == CellStatus::Closed {
            return self.close_cell(project_key, id_or_prefix, actor, None);
        }

        let cell_id = self.resolve_partial_id(project_key, id_or_prefix)?;
        let current = self.get_cell_exact(project_key, &cell_id)?;
        if !current.status.can_transition_to(new_status) {
            return Err(HiveError::Validation(format!(
                "cannot transition cell {cell_id:?} from {:?} to {:?}",
                current.status, new_status
            )));
        }

        let payload = json!({ "cell_id": cell_id, "status": new_status.as_str() });
        self.event_store
            .append(project_key, EventType::CellStatusChanged, actor, payload)?;
        self.mark_dirty(project_key, &cell_id);
        self.get_cell_exact(project_key, &cell_id)
    }

    /// Closing an already-closed cell is a no-op success.
    pub fn close_cell(
        &self,
        project_key: &str,
        id_or_prefix: &str,
        actor: &str,
        reason: Option<&str>,
    ) -> Result<Cell, HiveError> {
        let cell_id = self.resolve_partial_id(project_key, id_or_prefix)?;
        let current = self.get_cell_exact(project_key, &cell_id)?;
        if current.status == CellStatus::Closed {
            return Ok(current);
        }

        let payload = json!({ "cell_id": cell_id, "reason": reason });
        self.event_store
            .append(project_key, EventType::CellClosed, actor, payload)?;
        self.mark_dirty(project_key, &cell_id);

        if current.cell_type == CellType::Epic {
            self.emit_epic_completion_summary(project_key, actor, &cell_id)?;
        }

        self.get_cell_exact(project_key, &cell_id)
    }

    fn emit_epic_completion_summary(
        &self,
        project_key: &str,
        actor: &str,
        epic_id: &str,
    ) -> Result<(), HiveError> {
        let subtasks = self.query_cells(
            project_key,
            CellQuery {
                parent_id: Some(epic_id.to_string()),
                ..Default::default()
            },
        )?;
        let subtask_count = subtasks.len();
        let closed_count = subtasks.iter().filter(|c| c.status == CellStatus::Closed).count();

        let conn = self.lock_conn()?;
        let files: JsonValue = conn
            .query_row(
                "SELECT files FROM swarm_contexts WHERE project_key = ?1 AND epic_id = ?2 ORDER BY checkpointed_at DESC LIMIT 1",
                rusqlite::params![project_key, epic_id],
                |row| row.get::<_, String>(0),
            )
            .optional()?
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_else(|| json!([]));
        drop(conn);

        let payload = json!({
            "epic_id": epic_id,
            "subtask_count": subtask_count,
            "closed_count": closed_count,
            "files": files,
        });
        self.event_store
            .append(project_key, EventType::SwarmCompleted, actor, payload)?;
        Ok(())
    }

    /// Apply a non-status patch directly (no dedicated event type exists for
    /// arbitrary field edits in the closed event taxonomy — see DESIGN.md).
    pub fn update_cell(
        &self,
        project_key: &str,
        id_or_prefix: &str,
        patch: CellPatch,
    ) -> Result<Cell, HiveError> {
        let cell_id = self.resolve_partial_id(project_key, id_or_prefix)?;
        let current = self.get_cell_exact(project_key, &cell_id)?;

        let title = patch.title.unwrap_or(current.title);
        let description = patch.description.or(current.description);
        let priority = patch.priority.unwrap_or(current.priority);
        let category = patch.category.or(current.category);
        let component = patch.component.or(current.component);
        let assignee = patch.assignee.or(current.assignee);
        let dependencies = patch.dependencies.unwrap_or(current.dependencies);
        let metadata = patch.metadata.unwrap_or(current.metadata);

        let conn = self.lock_conn()?;
        conn.execute(
            "UPDATE cells SET title = ?1, description = ?2, priority = ?3, category = ?4,
                component = ?5, assignee = ?6, dependencies = ?7, metadata = ?8, updated_at = ?9
             WHERE project_key = ?10 AND cell_id = ?11",
            rusqlite::params![
                title,
                description,
                priority,
                category,
                component,
                assignee,
                serde_json::to_string(&dependencies)?,
                metadata.to_string(),
                crate::core::time::now_iso8601(),
                project_key,
                cell_id,
            ],
        )?;
        drop(conn);

        self.mark_dirty(project_key, &cell_id);
        self.get_cell_exact(project_key, &cell_id)
    }

    /// Physical delete. Reserved for epic-rollback or administrative use —
    /// normal lifecycle transitions are logical (`closed`), never physical.
    pub fn delete_cell(&self, project_key: &str, cell_id: &str) -> Result<(), HiveError> {
        let conn = self.lock_conn()?;
        conn.execute(
            "DELETE FROM cells WHERE project_key = ?1 AND cell_id = ?2",
            rusqlite::params![project_key, cell_id],
        )?;
        Ok(())
    }

    pub fn mark_dirty(&self, project_key: &str, cell_id: &str) {
        if let Ok(mut dirty) = self.dirty.lock() {
            dirty
                .entry(project_key.to_string())
                .or_default()
                .insert(cell_id.to_string());
        }
    }

    /// Flush every cell of `project_key` to `<hive_dir>/issues.jsonl`, then
    /// clear the dirty set. The file always represents the full current
    /// cell set, not a diff, so siblings importing it observe a consistent
    /// snapshot regardless of which cells were actually dirty.
    pub fn flush(&self, project_key: &str) -> Result<usize, HiveError> {
        let cells = self.all_cells(project_key)?;
        fs::create_dir_all(&self.hive_dir)?;
        let path = self.hive_dir.join("issues.jsonl");
        let mut file = fs::File::create(&path)?;
        for cell in &cells {
            let record = CellRecord::from(cell);
            writeln!(file, "{}", serde_json::to_string(&record)?)?;
        }

        if let Ok(mut dirty) = self.dirty.lock() {
            dirty.remove(project_key);
        }
        Ok(cells.len())
    }

    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>, HiveError> {
        self.conn
            .lock()
            .map_err(|_| HiveError::Integrity("cell tracker connection poisoned".into()))
    }
}

fn row_to_cell(row: &Row) -> rusqlite::Result<Result<Cell, HiveError>> {
    let cell_id: String = row.get(0)?;
    let project_key: String = row.get(1)?;
    let cell_type_raw: String = row.get(2)?;
    let title: String = row.get(3)?;
    let description: Option<String> = row.get(4)?;
    let status_raw: String = row.get(5)?;
    let priority: i64 = row.get(6)?;
    let category: Option<String> = row.get(7)?;
    let component: Option<String> = row.get(8)?;
    let parent_id: Option<String> = row.get(9)?;
    let assignee: Option<String> = row.get(10)?;
    let dependencies_raw: String = row.get(11)?;
    let metadata_raw: String = row.get(12)?;
    let created_at: String = row.get(13)?;
    let updated_at: String = row.get(14)?;
    let closed_at: Option<String> = row.get(15)?;

    Ok((|| {
        let cell_type = CellType::from_str_opt(&cell_type_raw)
            .ok_or_else(|| HiveError::Integrity(format!("unknown cell type {cell_type_raw:?}")))?;
        let status = CellStatus::from_str_opt(&status_raw)
            .ok_or_else(|| HiveError::Integrity(format!("unknown cell status {status_raw:?}")))?;
        let dependencies: Vec<String> = serde_json::from_str(&dependencies_raw)?;
        let metadata: JsonValue = serde_json::from_str(&metadata_raw)?;
        Ok(Cell {
            id: cell_id,
            project_key,
            cell_type,
            title,
            description,
            status,
            priority,
            category,
            component,
            parent_id,
            assignee,
            dependencies,
            metadata,
            created_at,
            updated_at,
            closed_at,
        })
    })())
}
