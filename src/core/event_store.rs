//! Append-only event log with per-project monotonic sequence numbers.

use crate::core::error::HiveError;
use crate::core::projections;
use crate::core::time;
use rusqlite::{Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::sync::{Arc, Mutex};

/// Closed tag set for every event type this core can append, grouped into
/// the families named in the data model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    AgentRegistered,
    AgentActive,
    MessageSent,
    MessageRead,
    MessageAcked,
    ThreadCreated,
    ThreadActivity,
    FileReserved,
    FileReleased,
    FileConflict,
    TaskStarted,
    TaskProgress,
    TaskCompleted,
    TaskBlocked,
    SwarmStarted,
    WorkerSpawned,
    WorkerCompleted,
    ReviewStarted,
    ReviewCompleted,
    SwarmCompleted,
    DecompositionGenerated,
    SubtaskOutcome,
    HumanFeedback,
    SwarmCheckpointed,
    SwarmRecovered,
    CheckpointCreated,
    ContextCompacted,
    ValidationStarted,
    ValidationIssue,
    ValidationCompleted,
    CellCreated,
    CellStatusChanged,
    CellClosed,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::AgentRegistered => "agent_registered",
            EventType::AgentActive => "agent_active",
            EventType::MessageSent => "message_sent",
            EventType::MessageRead => "message_read",
            EventType::MessageAcked => "message_acked",
            EventType::ThreadCreated => "thread_created",
            EventType::ThreadActivity => "thread_activity",
            EventType::FileReserved => "file_reserved",
            EventType::FileReleased => "file_released",
            EventType::FileConflict => "file_conflict",
            EventType::TaskStarted => "task_started",
            EventType::TaskProgress => "task_progress",
            EventType::TaskCompleted => "task_completed",
            EventType::TaskBlocked => "task_blocked",
            EventType::SwarmStarted => "swarm_started",
            EventType::WorkerSpawned => "worker_spawned",
            EventType::WorkerCompleted => "worker_completed",
            EventType::ReviewStarted => "review_started",
            EventType::ReviewCompleted => "review_completed",
            EventType::SwarmCompleted => "swarm_completed",
            EventType::DecompositionGenerated => "decomposition_generated",
            EventType::SubtaskOutcome => "subtask_outcome",
            EventType::HumanFeedback => "human_feedback",
            EventType::SwarmCheckpointed => "swarm_checkpointed",
            EventType::SwarmRecovered => "swarm_recovered",
            EventType::CheckpointCreated => "checkpoint_created",
            EventType::ContextCompacted => "context_compacted",
            EventType::ValidationStarted => "validation_started",
            EventType::ValidationIssue => "validation_issue",
            EventType::ValidationCompleted => "validation_completed",
            EventType::CellCreated => "cell_created",
            EventType::CellStatusChanged => "cell_status_changed",
            EventType::CellClosed => "cell_closed",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Self> {
        Some(match s {
            "agent_registered" => EventType::AgentRegistered,
            "agent_active" => EventType::AgentActive,
            "message_sent" => EventType::MessageSent,
            "message_read" => EventType::MessageRead,
            "message_acked" => EventType::MessageAcked,
            "thread_created" => EventType::ThreadCreated,
            "thread_activity" => EventType::ThreadActivity,
            "file_reserved" => EventType::FileReserved,
            "file_released" => EventType::FileReleased,
            "file_conflict" => EventType::FileConflict,
            "task_started" => EventType::TaskStarted,
            "task_progress" => EventType::TaskProgress,
            "task_completed" => EventType::TaskCompleted,
            "task_blocked" => EventType::TaskBlocked,
            "swarm_started" => EventType::SwarmStarted,
            "worker_spawned" => EventType::WorkerSpawned,
            "worker_completed" => EventType::WorkerCompleted,
            "review_started" => EventType::ReviewStarted,
            "review_completed" => EventType::ReviewCompleted,
            "swarm_completed" => EventType::SwarmCompleted,
            "decomposition_generated" => EventType::DecompositionGenerated,
            "subtask_outcome" => EventType::SubtaskOutcome,
            "human_feedback" => EventType::HumanFeedback,
            "swarm_checkpointed" => EventType::SwarmCheckpointed,
            "swarm_recovered" => EventType::SwarmRecovered,
            "checkpoint_created" => EventType::CheckpointCreated,
            "context_compacted" => EventType::ContextCompacted,
            "validation_started" => EventType::ValidationStarted,
            "validation_issue" => EventType::ValidationIssue,
            "validation_completed" => EventType::ValidationCompleted,
            "cell_created" => EventType::CellCreated,
            "cell_status_changed" => EventType::CellStatusChanged,
            "cell_closed" => EventType::CellClosed,
            _ => return None,
        })
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single row in the append-only log, as returned to readers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub sequence: i64,
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub project_key: String,
    pub timestamp: String,
    pub actor: String,
    #[serde(flatten)]
    pub payload: JsonValue,
}

/// Result of a successful append.
#[derive(Debug, Clone, Copy)]
pub struct AppendedEvent {
    pub sequence: i64,
}

/// Composable filter for `EventStore::read`.
#[derive(Debug, Clone, Default)]
pub struct ReadFilter {
    pub project_key: Option<String>,
    pub types: Option<Vec<EventType>>,
    pub after_sequence: Option<i64>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl ReadFilter {
    pub fn for_project(project_key: impl Into<String>) -> Self {
        Self {
            project_key: Some(project_key.into()),
            ..Default::default()
        }
    }

    pub fn after(mut self, sequence: i64) -> Self {
        self.after_sequence = Some(sequence);
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Subscriber notified with every event immediately after its append
/// transaction commits. Used by the Stream Server to feed its per-project
/// broadcast channel without the synchronous core depending on tokio.
pub type EventListener = Arc<dyn Fn(&Event) + Send + Sync>;

/// Append-only event log, backed by a single shared connection guarded by a
/// mutex. One `EventStore` is owned per project by its `Facade`.
pub struct EventStore {
    conn: Arc<Mutex<Connection>>,
    listener: Mutex<Option<EventListener>>,
}

impl EventStore {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self {
            conn,
            listener: Mutex::new(None),
        }
    }

    /// Register a listener invoked (after commit, outside the DB lock) for
    /// every event this store appends from now on. Only one listener is
    /// supported — the Stream Server's broadcast publisher.
    pub fn set_listener(&self, listener: EventListener) {
        if let Ok(mut slot) = self.listener.lock() {
            *slot = Some(listener);
        }
    }

    fn notify(&self, event: &Event) {
        if let Ok(slot) = self.listener.lock() {
            if let Some(listener) = slot.as_ref() {
                listener(event);
            }
        }
    }

    /// Append one event for `project_key`, applying its projection in the
    /// same transaction. Failure at any step rolls back the whole unit.
    pub fn append(
        &self,
        project_key: &str,
        event_type: EventType,
        actor: &str,
        payload: JsonValue,
    ) -> Result<AppendedEvent, HiveError> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| HiveError::Integrity("event store connection poisoned".into()))?;
        let tx = conn.transaction()?;

        let sequence: i64 = tx
            .query_row(
                "SELECT COALESCE(MAX(sequence), 0) + 1 FROM events WHERE project_key = ?1",
                [project_key],
                |row| row.get(0),
            )
            .unwrap_or(1);

        let event_id = time::new_event_id();
        let ts = time::now_iso8601();

        tx.execute(
            "INSERT INTO events (sequence, project_key, event_id, event_type, ts, actor, payload)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                sequence,
                project_key,
                event_id,
                event_type.as_str(),
                ts,
                actor,
                payload.to_string(),
            ],
        )?;

        projections::apply(&tx, project_key, sequence, event_type, &ts, actor, &payload)?;

        tx.commit()?;
        drop(conn);

        if crate::core::debug_enabled("events") {
            eprintln!("[hive:events] {project_key} #{sequence} {}", event_type.as_str());
        }

        let event = Event {
            sequence,
            id: event_id,
            event_type,
            project_key: project_key.to_string(),
            timestamp: ts,
            actor: actor.to_string(),
            payload,
        };
        self.notify(&event);
        Ok(AppendedEvent { sequence })
    }

    /// Read events matching `filter`, ordered by `sequence` ascending.
    pub fn read(&self, filter: &ReadFilter) -> Result<Vec<Event>, HiveError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| HiveError::Integrity("event store connection poisoned".into()))?;

        let mut sql = String::from(
            "SELECT sequence, project_key, event_id, event_type, ts, actor, payload FROM events WHERE 1=1",
        );
        if filter.project_key.is_some() {
            sql.push_str(" AND project_key = ?1");
        }
        if let Some(after) = filter.after_sequence {
            sql.push_str(&format!(" AND sequence > {}", after));
        }
        if let Some(types) = &filter.types {
            let list = types
                .iter()
                .map(|t| format!("'{}'", t.as_str()))
                .collect::<Vec<_>>()
                .join(",");
            sql.push_str(&format!(" AND event_type IN ({})", list));
        }
        sql.push_str(" ORDER BY sequence ASC");
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        if let Some(offset) = filter.offset {
            sql.push_str(&format!(" OFFSET {}", offset));
        }

        let mut stmt = conn.prepare(&sql)?;
        let rows = if let Some(project_key) = &filter.project_key {
            stmt.query_map([project_key], row_to_event)?
                .collect::<Result<Vec<_>, _>>()?
        } else {
            stmt.query_map([], row_to_event)?
                .collect::<Result<Vec<_>, _>>()?
        };
        rows.into_iter().collect::<Result<Vec<_>, _>>()
    }

    /// Append several events for `project_key` as one atomic unit: every
    /// row and every projection update lands in a single transaction, so a
    /// failure on event N rolls back events 1..N-1 as well. Used by
    /// `CellTracker::create_epic` so epic + subtask creation needs no
    /// compensating deletes (see DESIGN.md).
    pub fn append_many(
        &self,
        project_key: &str,
        actor: &str,
        events: Vec<(EventType, JsonValue)>,
    ) -> Result<Vec<AppendedEvent>, HiveError> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| HiveError::Integrity("event store connection poisoned".into()))?;
        let tx = conn.transaction()?;

        let mut next_sequence: i64 = tx
            .query_row(
                "SELECT COALESCE(MAX(sequence), 0) + 1 FROM events WHERE project_key = ?1",
                [project_key],
                |row| row.get(0),
            )
            .unwrap_or(1);

        let mut appended = Vec::with_capacity(events.len());
        let mut committed = Vec::with_capacity(events.len());
        for (event_type, payload) in events {
            let event_id = time::new_event_id();
            let ts = time::now_iso8601();

            tx.execute(
                "INSERT INTO events (sequence, project_key, event_id, event_type, ts, actor, payload)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    next_sequence,
                    project_key,
                    event_id,
                    event_type.as_str(),
                    ts,
                    actor,
                    payload.to_string(),
                ],
            )?;

            projections::apply(&tx, project_key, next_sequence, event_type, &ts, actor, &payload)?;

            appended.push(AppendedEvent {
                sequence: next_sequence,
            });
            committed.push(Event {
                sequence: next_sequence,
                id: event_id,
                event_type,
                project_key: project_key.to_string(),
                timestamp: ts,
                actor: actor.to_string(),
                payload,
            });
            next_sequence += 1;
        }

        tx.commit()?;
        drop(conn);

        for event in &committed {
            self.notify(event);
        }
        Ok(appended)
    }

    /// Highest sequence assigned so far for `project_key`, 0 if none.
    pub fn latest_sequence(&self, project_key: &str) -> Result<i64, HiveError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| HiveError::Integrity("event store connection poisoned".into()))?;
        let latest: Option<i64> = conn
            .query_row(
                "SELECT MAX(sequence) FROM events WHERE project_key = ?1",
                [project_key],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        Ok(latest.unwrap_or(0))
    }
}

fn row_to_event(row: &Row) -> rusqlite::Result<Result<Event, HiveError>> {
    let sequence: i64 = row.get(0)?;
    let project_key: String = row.get(1)?;
    let event_id: String = row.get(2)?;
    let event_type_raw: String = row.get(3)?;
    let ts: String = row.get(4)?;
    let actor: String = row.get(5)?;
    let payload_raw: String = row.get(6)?;

    Ok((|| {
        let event_type = EventType::from_str_opt(&event_type_raw)
            .ok_or_else(|| HiveError::Integrity(format!("unknown event type {event_type_raw:?}")))?;
        let payload: JsonValue = serde_json::from_str(&payload_raw)?;
        Ok(Event {
            sequence,
            id: event_id,
            event_type,
            project_key,
            timestamp: ts,
            actor,
            payload,
        })
    })())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schemas;

    fn store() -> EventStore {
        let conn = Connection::open_in_memory().unwrap();
        for statement in schemas::ALL_STATEMENTS {
            conn.execute(statement, []).unwrap();
        }
        EventStore::new(Arc::new(Mutex::new(conn)))
    }

    #[test]
    fn test_append_assigns_monotonic_sequence() {
        let store = store();
        let e1 = store
            .append("p1", EventType::AgentRegistered, "tester", serde_json::json!({}))
            .unwrap();
        let e2 = store
            .append("p1", EventType::AgentActive, "tester", serde_json::json!({}))
            .unwrap();
        assert_eq!(e1.sequence, 1);
        assert_eq!(e2.sequence, 2);
    }

    #[test]
    fn test_sequence_is_per_project() {
        let store = store();
        let a = store
            .append("p1", EventType::AgentRegistered, "tester", serde_json::json!({}))
            .unwrap();
        let b = store
            .append("p2", EventType::AgentRegistered, "tester", serde_json::json!({}))
            .unwrap();
        assert_eq!(a.sequence, 1);
        assert_eq!(b.sequence, 1);
    }

    #[test]
    fn test_read_after_sequence_boundary_is_empty() {
        let store = store();
        store
            .append("p1", EventType::AgentRegistered, "tester", serde_json::json!({}))
            .unwrap();
        let latest = store.latest_sequence("p1").unwrap();
        let events = store
            .read(&ReadFilter::for_project("p1").after(latest))
            .unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn test_read_orders_by_sequence_ascending() {
        let store = store();
        for _ in 0..5 {
            store
                .append("p1", EventType::TaskStarted, "tester", serde_json::json!({}))
                .unwrap();
        }
        let events = store.read(&ReadFilter::for_project("p1")).unwrap();
        let sequences: Vec<i64> = events.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_latest_sequence_zero_when_empty() {
        let store = store();
        assert_eq!(store.latest_sequence("nope").unwrap(), 0);
    }

    #[test]
    fn test_append_many_assigns_consecutive_sequences() {
        let store = store();
        let appended = store
            .append_many(
                "p1",
                "tester",
                vec![
                    (EventType::CellCreated, serde_json::json!({"cell_id": "epic-aaaaaa", "title": "E"})),
                    (EventType::CellCreated, serde_json::json!({"cell_id": "tk-bbbbbb", "title": "A", "parent_id": "epic-aaaaaa"})),
                ],
            )
            .unwrap();
        assert_eq!(appended[0].sequence, 1);
        assert_eq!(appended[1].sequence, 2);
    }

    #[test]
    fn test_append_many_rolls_back_on_failure() {
        let store = store();
        // cell_status_changed projection requires an existing cell row;
        // this one references a cell that is never created in this batch.
        let err = store.append_many(
            "p1",
            "tester",
            vec![
                (EventType::CellCreated, serde_json::json!({"cell_id": "tk-aaaaaa", "title": "A"})),
                (EventType::HumanFeedback, serde_json::json!({})),
            ],
        );
        assert!(err.is_err());
        let events = store.read(&ReadFilter::for_project("p1")).unwrap();
        assert!(events.is_empty());
    }
}
