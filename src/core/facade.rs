//! Per-project operation surface: the calls agents actually make.
//!
//! A `Facade` owns one project's `Connection` (wrapped once, kept for the
//! life of the process — see SPEC_FULL.md §4.1) plus the `EventStore`,
//! `ReservationManager` and `CellTracker` built on top of it. `Registry`
//! (see `core::registry`) is the only thing that constructs or drops one.

use crate::core::broker::DbBroker;
use crate::core::cell::{Cell, CellArgs, CellPatch, CellQuery, CellTracker};
use crate::core::db;
use crate::core::error::HiveError;
use crate::core::event_store::{EventStore, EventType, ReadFilter};
use crate::core::import;
use crate::core::migration;
use crate::core::reservation::{ReleaseFilter, ReleaseOutcome, ReservationManager, ReserveOutcome, ReserveRequest};
use crate::core::store::Project;
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::sync::{Arc, Mutex};
use ulid::Ulid;

const ADJECTIVES: &[&str] = &[
    "Blue", "Swift", "Calm", "Bright", "Quiet", "Bold", "Amber", "Crimson", "Golden", "Silver",
    "Violet", "Emerald", "Rapid", "Steady", "Gentle", "Fierce", "Hidden", "Lucky", "Noble",
    "Curious", "Rusty", "Frosty", "Sunny", "Shadow", "Polished", "Clever", "Eager", "Loyal",
    "Brave", "Sharp", "Vivid", "Mellow", "Humble", "Vast", "Keen", "Misty", "Ancient", "Crisp",
    "Wild", "Plain",
];

const NOUNS: &[&str] = &[
    "Lake", "Falcon", "River", "Harbor", "Summit", "Forest", "Meadow", "Raven", "Otter", "Ember",
    "Glacier", "Canyon", "Comet", "Beacon", "Willow", "Badger", "Heron", "Thistle", "Boulder",
    "Cedar", "Orchard", "Pelican", "Quarry", "Sparrow", "Terrace", "Valley", "Wren", "Anchor",
    "Bramble", "Cove", "Delta", "Echo", "Fjord", "Grove", "Hollow", "Islet", "Juniper", "Knoll",
    "Lantern", "Marsh",
];

#[derive(Debug, Clone, Default)]
pub struct RegisterAgentArgs {
    pub agent_name: Option<String>,
    pub program: Option<String>,
    pub model: Option<String>,
    pub task_description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInfo {
    pub name: String,
    pub program: Option<String>,
    pub model: Option<String>,
    pub task_description: Option<String>,
    pub registered_at: String,
    pub last_active_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Importance {
    Low,
    Normal,
    High,
    Urgent,
}

impl Importance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Importance::Low => "low",
            Importance::Normal => "normal",
            Importance::High => "high",
            Importance::Urgent => "urgent",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        Some(match s {
            "low" => Importance::Low,
            "normal" => Importance::Normal,
            "high" => Importance::High,
            "urgent" => Importance::Urgent,
            _ => return None,
        })
    }
}

impl Default for Importance {
    fn default() -> Self {
        Importance::Normal
    }
}

#[derive(Debug, Clone)]
pub struct SendMessageArgs {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
    pub thread_id: Option<String>,
    pub importance: Importance,
    pub ack_required: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageResult {
    pub success: bool,
    pub message_id: String,
    pub recipient_count: usize,
}

#[derive(Debug, Clone, Default)]
pub struct InboxArgs {
    pub agent: String,
    pub limit: Option<i64>,
    pub urgent_only: bool,
    pub unread_only: bool,
    pub include_bodies: bool,
}

/// Inbox hard cap (spec.md §4.7): deliberate context-preservation
/// constraint, never a performance knob. `inbox` enforces this regardless
/// of what the caller requests.
pub const INBOX_MAX_LIMIT: i64 = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboxEntry {
    pub message_id: String,
    pub from_agent: String,
    pub subject: String,
    pub body: Option<String>,
    pub thread_id: Option<String>,
    pub importance: String,
    pub ack_required: bool,
    pub created_at: String,
    pub read_at: Option<String>,
    pub acked_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageDetail {
    pub message_id: String,
    pub from_agent: String,
    pub subject: String,
    pub body: String,
    pub thread_id: Option<String>,
    pub importance: String,
    pub ack_required: bool,
    pub created_at: String,
    pub read_at: Option<String>,
    pub acked_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub database: String,
}

/// Per-project operation surface. One instance per `project_key`, owned and
/// cached by `core::registry::Registry`.
pub struct Facade {
    project: Project,
    conn: Arc<Mutex<Connection>>,
    broker: DbBroker,
    event_store: Arc<EventStore>,
    reservations: ReservationManager,
    cells: CellTracker,
}

impl Facade {
    /// Open (or create) `project`'s database: runs the baseline schema, any
    /// pending forward-only migrations, and the legacy `.beads`/JSONL
    /// import, all before returning — a caller never observes a
    /// partially-migrated database.
    pub fn open(project: Project) -> Result<Self, HiveError> {
        db::initialize_hive_db(&project.root)?;
        let db_path = db::hive_db_path(&project.root);
        let conn = db::db_connect(&db_path)?;
        migration::check_and_migrate(&conn)?;
        import::run_on_open(&conn, &project.root, &project.project_key)?;

        let conn = Arc::new(Mutex::new(conn));
        let event_store = Arc::new(EventStore::new(conn.clone()));
        let reservations = ReservationManager::new(conn.clone(), event_store.clone());
        let cells = CellTracker::new(conn.clone(), event_store.clone(), project.hive_dir());
        let broker = DbBroker::new(&project.root);

        Ok(Self {
            project,
            conn,
            broker,
            event_store,
            reservations,
            cells,
        })
    }

    pub fn project_key(&self) -> &str {
        &self.project.project_key
    }

    pub fn event_store(&self) -> &Arc<EventStore> {
        &self.event_store
    }

    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>, HiveError> {
        self.conn
            .lock()
            .map_err(|_| HiveError::Integrity("facade connection poisoned".into()))
    }

    fn audit(&self, actor: &str, op: &str, status: &str) {
        let _ = self.broker.audit(actor, op, &self.project.project_key, status);
    }

    // --- Agents ---------------------------------------------------------

    pub fn register_agent(&self, args: RegisterAgentArgs) -> Result<AgentInfo, HiveError> {
        let name = match args.agent_name {
            Some(n) => n,
            None => self.generate_agent_name()?,
        };

        let payload = json!({
            "name": name,
            "program": args.program,
            "model": args.model,
            "task_description": args.task_description,
        });
        let result = self
            .event_store
            .append(&self.project.project_key, EventType::AgentRegistered, &name, payload);
        self.audit(&name, "register_agent", if result.is_ok() { "success" } else { "error" });
        result?;

        self.get_agent(&name)
    }

    fn generate_agent_name(&self) -> Result<String, HiveError> {
        let seed = Ulid::new().0 as usize;
        for attempt in 0..2 {
            let idx = seed.wrapping_add(attempt * 7);
            let adjective = ADJECTIVES[idx % ADJECTIVES.len()];
            let noun = NOUNS[(idx / ADJECTIVES.len()) % NOUNS.len()];
            let candidate = format!("{adjective}{noun}");
            if !self.agent_exists(&candidate)? {
                return Ok(candidate);
            }
        }
        // Both fixed-list attempts collided; fall back to a short ULID suffix.
        let suffix = &Ulid::new().to_string().to_lowercase()[20..];
        Ok(format!("{}{}-{}", ADJECTIVES[seed % ADJECTIVES.len()], NOUNS[seed % NOUNS.len()], suffix))
    }

    fn agent_exists(&self, name: &str) -> Result<bool, HiveError> {
        let conn = self.lock_conn()?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM agents WHERE project_key = ?1 AND name = ?2",
                rusqlite::params![self.project.project_key, name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn get_agent(&self, name: &str) -> Result<AgentInfo, HiveError> {
        let conn = self.lock_conn()?;
        conn.query_row(
            "SELECT name, program, model, task_description, registered_at, last_active_at
             FROM agents WHERE project_key = ?1 AND name = ?2",
            rusqlite::params![self.project.project_key, name],
            |row| {
                Ok(AgentInfo {
                    name: row.get(0)?,
                    program: row.get(1)?,
                    model: row.get(2)?,
                    task_description: row.get(3)?,
                    registered_at: row.get(4)?,
                    last_active_at: row.get(5)?,
                })
            },
        )
        .optional()?
        .ok_or_else(|| HiveError::NotFound(format!("agent {name:?} not found")))
    }

    // --- Messaging -------------------------------------------------------

    pub fn send_message(&self, args: SendMessageArgs) -> Result<SendMessageResult, HiveError> {
        if args.to.is_empty() {
            return Err(HiveError::Validation("send_message requires at least one recipient".into()));
        }

        let message_id = format!("msg_{}", Ulid::new());
        let mut events = vec![(
            EventType::MessageSent,
            json!({
                "message_id": message_id,
                "from": args.from,
                "to": args.to,
                "subject": args.subject,
                "body": args.body,
                "thread_id": args.thread_id,
                "importance": args.importance.as_str(),
                "ack_required": args.ack_required,
            }),
        )];

        if let Some(thread_id) = &args.thread_id {
            let event_type = if self.thread_has_messages(thread_id)? {
                EventType::ThreadActivity
            } else {
                EventType::ThreadCreated
            };
            events.push((event_type, json!({ "thread_id": thread_id, "message_id": message_id })));
        }

        let recipient_count = args.to.len();
        self.event_store
            .append_many(&self.project.project_key, &args.from, events)?;

        if crate::core::debug_enabled("messages") {
            eprintln!(
                "[hive:messages] {} -> {:?} ({})",
                args.from, args.to, message_id
            );
        }

        Ok(SendMessageResult {
            success: true,
            message_id,
            recipient_count,
        })
    }

    fn thread_has_messages(&self, thread_id: &str) -> Result<bool, HiveError> {
        let conn = self.lock_conn()?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM messages WHERE project_key = ?1 AND thread_id = ?2 LIMIT 1",
                rusqlite::params![self.project.project_key, thread_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Returns at most `INBOX_MAX_LIMIT` rows regardless of the caller's
    /// requested `limit` — this cap is load-bearing (spec.md §4.7), not a
    /// default to be raised.
    pub fn inbox(&self, args: InboxArgs) -> Result<Vec<InboxEntry>, HiveError> {
        let limit = args.limit.unwrap_or(INBOX_MAX_LIMIT).clamp(0, INBOX_MAX_LIMIT);

        let conn = self.lock_conn()?;
        let mut sql = String::from(
            "SELECT m.message_id, m.from_agent, m.subject, m.body, m.thread_id, m.importance,
                    m.ack_required, m.created_at, r.read_at, r.acked_at
             FROM messages m
             JOIN message_recipients r ON r.message_id = m.message_id
             WHERE m.project_key = ?1 AND r.agent_name = ?2",
        );
        if args.urgent_only {
            sql.push_str(" AND m.importance = 'urgent'");
        }
        if args.unread_only {
            sql.push_str(" AND r.read_at IS NULL");
        }
        sql.push_str(" ORDER BY m.sequence DESC LIMIT ?3");

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(
                rusqlite::params![self.project.project_key, args.agent, limit],
                |row| {
                    let body: String = row.get(3)?;
                    Ok(InboxEntry {
                        message_id: row.get(0)?,
                        from_agent: row.get(1)?,
                        subject: row.get(2)?,
                        body: if args.include_bodies { Some(body) } else { None },
                        thread_id: row.get(4)?,
                        importance: row.get(5)?,
                        ack_required: row.get::<_, i64>(6)? != 0,
                        created_at: row.get(7)?,
                        read_at: row.get(8)?,
                        acked_at: row.get(9)?,
                    })
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn read_message(
        &self,
        message_id: &str,
        agent: Option<&str>,
        mark_as_read: bool,
    ) -> Result<MessageDetail, HiveError> {
        let detail = {
            let conn = self.lock_conn()?;
            conn.query_row(
                "SELECT m.message_id, m.from_agent, m.subject, m.body, m.thread_id, m.importance,
                        m.ack_required, m.created_at, r.read_at, r.acked_at
                 FROM messages m
                 LEFT JOIN message_recipients r
                   ON r.message_id = m.message_id AND r.agent_name = ?2
                 WHERE m.project_key = ?1 AND m.message_id = ?3",
                rusqlite::params![self.project.project_key, agent.unwrap_or(""), message_id],
                |row| {
                    Ok(MessageDetail {
                        message_id: row.get(0)?,
                        from_agent: row.get(1)?,
                        subject: row.get(2)?,
                        body: row.get(3)?,
                        thread_id: row.get(4)?,
                        importance: row.get(5)?,
                        ack_required: row.get::<_, i64>(6)? != 0,
                        created_at: row.get(7)?,
                        read_at: row.get(8)?,
                        acked_at: row.get(9)?,
                    })
                },
            )
            .optional()?
            .ok_or_else(|| HiveError::NotFound(format!("message {message_id:?} not found")))?
        };

        if mark_as_read {
            if let Some(agent) = agent {
                self.event_store.append(
                    &self.project.project_key,
                    EventType::MessageRead,
                    agent,
                    json!({ "message_id": message_id, "agent": agent }),
                )?;
                return self.read_message(message_id, Some(agent), false);
            }
        }

        Ok(detail)
    }

    pub fn acknowledge(&self, message_id: &str, agent: &str) -> Result<(), HiveError> {
        self.event_store.append(
            &self.project.project_key,
            EventType::MessageAcked,
            agent,
            json!({ "message_id": message_id, "agent": agent }),
        )?;
        Ok(())
    }

    // --- Reservations / locks --------------------------------------------

    pub fn reserve(&self, req: ReserveRequest) -> Result<ReserveOutcome, HiveError> {
        self.reservations.reserve(req)
    }

    pub fn release(&self, agent: &str, filter: ReleaseFilter) -> Result<ReleaseOutcome, HiveError> {
        self.reservations.release(&self.project.project_key, agent, filter)
    }

    pub fn check_conflicts(&self, agent: &str, paths: &[String]) -> Result<Vec<crate::core::reservation::Conflict>, HiveError> {
        self.reservations.check_conflicts(&self.project.project_key, agent, paths)
    }

    // --- Cells -------------------------------------------------------------

    pub fn create_cell(&self, actor: &str, args: CellArgs) -> Result<Cell, HiveError> {
        self.cells.create_cell(&self.project.project_key, actor, args)
    }

    pub fn create_epic(
        &self,
        actor: &str,
        epic_args: CellArgs,
        subtasks: Vec<CellArgs>,
    ) -> Result<(Cell, Vec<Cell>), HiveError> {
        self.cells.create_epic(&self.project.project_key, actor, epic_args, subtasks)
    }

    pub fn get_cell(&self, cell_id: &str) -> Result<Cell, HiveError> {
        self.cells.get_cell(&self.project.project_key, cell_id)
    }

    pub fn query_cells(&self, query: CellQuery) -> Result<Vec<Cell>, HiveError> {
        self.cells.query_cells(&self.project.project_key, query)
    }

    pub fn get_next_ready_cell(&self) -> Result<Option<Cell>, HiveError> {
        self.cells.get_next_ready_cell(&self.project.project_key)
    }

    pub fn update_cell(&self, id_or_prefix: &str, patch: CellPatch) -> Result<Cell, HiveError> {
        self.cells.update_cell(&self.project.project_key, id_or_prefix, patch)
    }

    pub fn change_cell_status(
        &self,
        id_or_prefix: &str,
        actor: &str,
        status: crate::core::cell::CellStatus,
    ) -> Result<Cell, HiveError> {
        self.cells.change_cell_status(&self.project.project_key, id_or_prefix, actor, status)
    }

    pub fn close_cell(&self, id_or_prefix: &str, actor: &str, reason: Option<&str>) -> Result<Cell, HiveError> {
        self.cells.close_cell(&self.project.project_key, id_or_prefix, actor, reason)
    }

    pub fn delete_cell(&self, cell_id: &str) -> Result<(), HiveError> {
        self.cells.delete_cell(&self.project.project_key, cell_id)
    }

    /// Flush every dirty cell of this project to `.hive/issues.jsonl`.
    /// Called by `create_epic`/`close_cell` internally and by
    /// `Registry::shutdown` on every cached project before exit.
    pub fn flush_cells(&self) -> Result<usize, HiveError> {
        self.cells.flush(&self.project.project_key)
    }

    // --- Reads / health ---------------------------------------------------

    pub fn read_events(&self, filter: &ReadFilter) -> Result<Vec<crate::core::event_store::Event>, HiveError> {
        self.event_store.read(filter)
    }

    pub fn latest_sequence(&self) -> Result<i64, HiveError> {
        self.event_store.latest_sequence(&self.project.project_key)
    }

    pub fn health(&self) -> HealthStatus {
        let connected = self
            .lock_conn()
            .and_then(|conn| conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0)).map_err(HiveError::from))
            .is_ok();
        HealthStatus {
            healthy: connected,
            database: if connected { "connected".to_string() } else { "disconnected".to_string() },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_facade() -> (tempfile::TempDir, Facade) {
        let dir = tempfile::tempdir().unwrap();
        let project = Project::new("p1", dir.path());
        let facade = Facade::open(project).unwrap();
        (dir, facade)
    }

    #[test]
    fn test_register_agent_generates_name_when_absent() {
        let (_dir, facade) = open_facade();
        let agent = facade.register_agent(RegisterAgentArgs::default()).unwrap();
        assert!(!agent.name.is_empty());
    }

    #[test]
    fn test_register_agent_twice_is_idempotent() {
        let (_dir, facade) = open_facade();
        let mut args = RegisterAgentArgs::default();
        args.agent_name = Some("BlueLake".to_string());
        args.program = Some("claude".to_string());
        facade.register_agent(args.clone()).unwrap();

        args.program = Some("codex".to_string());
        facade.register_agent(args).unwrap();

        let agent = facade.get_agent("BlueLake").unwrap();
        assert_eq!(agent.program.as_deref(), Some("codex"));
    }

    #[test]
    fn test_send_and_read_message_scenario() {
        let (_dir, facade) = open_facade();
        facade
            .register_agent(RegisterAgentArgs {
                agent_name: Some("BlueLake".into()),
                ..Default::default()
            })
            .unwrap();
        facade
            .register_agent(RegisterAgentArgs {
                agent_name: Some("Reader".into()),
                ..Default::default()
            })
            .unwrap();

        let sent = facade
            .send_message(SendMessageArgs {
                from: "BlueLake".into(),
                to: vec!["Reader".into()],
                subject: "Hi".into(),
                body: "World".into(),
                thread_id: None,
                importance: Importance::Normal,
                ack_required: false,
            })
            .unwrap();

        let inbox = facade
            .inbox(InboxArgs {
                agent: "Reader".into(),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].from_agent, "BlueLake");
        assert_eq!(inbox[0].subject, "Hi");
        assert!(inbox[0].body.is_none());

        let detail = facade
            .read_message(&sent.message_id, Some("Reader"), true)
            .unwrap();
        assert_eq!(detail.body, "World");

        let unread = facade
            .inbox(InboxArgs {
                agent: "Reader".into(),
                unread_only: true,
                ..Default::default()
            })
            .unwrap();
        assert!(unread.is_empty());
    }

    #[test]
    fn test_inbox_enforces_hard_cap_regardless_of_requested_limit() {
        let (_dir, facade) = open_facade();
        facade
            .register_agent(RegisterAgentArgs {
                agent_name: Some("Sender".into()),
                ..Default::default()
            })
            .unwrap();
        facade
            .register_agent(RegisterAgentArgs {
                agent_name: Some("Reader".into()),
                ..Default::default()
            })
            .unwrap();
        for i in 0..10 {
            facade
                .send_message(SendMessageArgs {
                    from: "Sender".into(),
                    to: vec!["Reader".into()],
                    subject: format!("msg{i}"),
                    body: "x".into(),
                    thread_id: None,
                    importance: Importance::Normal,
                    ack_required: false,
                })
                .unwrap();
        }
        let inbox = facade
            .inbox(InboxArgs {
                agent: "Reader".into(),
                limit: Some(1000),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(inbox.len(), INBOX_MAX_LIMIT as usize);
    }

    #[test]
    fn test_health_reports_connected() {
        let (_dir, facade) = open_facade();
        let status = facade.health();
        assert!(status.healthy);
        assert_eq!(status.database, "connected");
    }
}
