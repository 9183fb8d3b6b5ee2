//! Synchronous, same-transaction projection updates.
//!
//! Each event type has exactly one handler, invoked inside the appender's
//! transaction immediately after the event row is inserted. If a handler
//! fails, the whole append fails and nothing becomes visible to readers.

use crate::core::error::HiveError;
use crate::core::event_store::EventType;
use rusqlite::Transaction;
use serde_json::Value as JsonValue;

pub fn apply(
    tx: &Transaction,
    project_key: &str,
    sequence: i64,
    event_type: EventType,
    ts: &str,
    actor: &str,
    payload: &JsonValue,
) -> Result<(), HiveError> {
    match event_type {
        EventType::AgentRegistered => agent_registered(tx, project_key, ts, payload),
        EventType::AgentActive => agent_active(tx, project_key, ts, payload),
        EventType::MessageSent => message_sent(tx, project_key, sequence, ts, payload),
        EventType::MessageRead => message_read(tx, payload, ts),
        EventType::MessageAcked => message_acked(tx, payload, ts),
        EventType::FileReserved => file_reserved(tx, project_key, ts, payload),
        EventType::FileReleased => file_released(tx, project_key, ts, payload),
        EventType::DecompositionGenerated => decomposition_generated(tx, project_key, ts, payload),
        EventType::SubtaskOutcome => subtask_outcome(tx, ts, payload),
        EventType::HumanFeedback => human_feedback(tx, ts, payload),
        EventType::SwarmCheckpointed => swarm_checkpointed(tx, project_key, ts, payload),
        EventType::SwarmRecovered => swarm_recovered(tx, project_key, ts, payload),
        EventType::CellCreated => cell_created(tx, project_key, ts, actor, payload),
        EventType::CellStatusChanged => cell_status_changed(tx, ts, payload),
        EventType::CellClosed => cell_closed(tx, ts, payload),
        // Task and swarm-lifecycle events, validation events, checkpoint
        // bookkeeping events and thread metadata events have no materialized
        // projection; they are queried directly from the log.
        EventType::ThreadCreated
        | EventType::ThreadActivity
        | EventType::FileConflict
        | EventType::TaskStarted
        | EventType::TaskProgress
        | EventType::TaskCompleted
        | EventType::TaskBlocked
        | EventType::SwarmStarted
        | EventType::WorkerSpawned
        | EventType::WorkerCompleted
        | EventType::ReviewStarted
        | EventType::ReviewCompleted
        | EventType::SwarmCompleted
        | EventType::CheckpointCreated
        | EventType::ContextCompacted
        | EventType::ValidationStarted
        | EventType::ValidationIssue
        | EventType::ValidationCompleted => Ok(()),
    }
}

fn str_field(payload: &JsonValue, field: &str) -> Option<String> {
    payload.get(field).and_then(|v| v.as_str()).map(str::to_string)
}

fn agent_registered(
    tx: &Transaction,
    project_key: &str,
    ts: &str,
    payload: &JsonValue,
) -> Result<(), HiveError> {
    let name = str_field(payload, "name")
        .ok_or_else(|| HiveError::Validation("agent_registered payload missing name".into()))?;
    let program = str_field(payload, "program");
    let model = str_field(payload, "model");
    let task_description = str_field(payload, "task_description");

    tx.execute(
        "INSERT INTO agents (project_key, name, program, model, task_description, registered_at, last_active_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
         ON CONFLICT(project_key, name) DO UPDATE SET
            program = excluded.program,
            model = excluded.model,
            task_description = excluded.task_description,
            last_active_at = excluded.last_active_at",
        rusqlite::params![project_key, name, program, model, task_description, ts],
    )?;
    Ok(())
}

fn agent_active(
    tx: &Transaction,
    project_key: &str,
    ts: &str,
    payload: &JsonValue,
) -> Result<(), HiveError> {
    let name = str_field(payload, "name")
        .ok_or_else(|| HiveError::Validation("agent_active payload missing name".into()))?;
    tx.execute(
        "UPDATE agents SET last_active_at = ?1 WHERE project_key = ?2 AND name = ?3",
        rusqlite::params![ts, project_key, name],
    )?;
    Ok(())
}

fn message_sent(
    tx: &Transaction,
    project_key: &str,
    sequence: i64,
    ts: &str,
    payload: &JsonValue,
) -> Result<(), HiveError> {
    let message_id = str_field(payload, "message_id")
        .ok_or_else(|| HiveError::Validation("message_sent payload missing message_id".into()))?;
    let from_agent = str_field(payload, "from")
        .ok_or_else(|| HiveError::Validation("message_sent payload missing from".into()))?;
    let subject = str_field(payload, "subject").unwrap_or_default();
    let body = str_field(payload, "body").unwrap_or_default();
    let thread_id = str_field(payload, "thread_id");
    let importance = str_field(payload, "importance").unwrap_or_else(|| "normal".to_string());
    let ack_required = payload
        .get("ack_required")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let recipients: Vec<String> = payload
        .get("to")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();
    tx.execute(
        "INSERT INTO messages (message_id, project_key, from_agent, subject, body, thread_id, importance, ack_required, created_at, sequence)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        rusqlite::params![
            message_id,
            project_key,
            from_agent,
            subject,
            body,
            thread_id,
            importance,
            ack_required as i64,
            ts,
            sequence,
        ],
    )?;

    for recipient in recipients {
        tx.execute(
            "INSERT INTO message_recipients (message_id, agent_name) VALUES (?1, ?2)",
            rusqlite::params![message_id, recipient],
        )?;
    }
    Ok(())
}

fn message_read(tx: &Transaction, payload: &JsonValue, ts: &str) -> Result<(), HiveError> {
    let message_id = str_field(payload, "message_id")
        .ok_or_else(|| HiveError::Validation("message_read payload missing message_id".into()))?;
    let agent = str_field(payload, "agent")
        .ok_or_else(|| HiveError::Validation("message_read payload missing agent".into()))?;
    tx.execute(
        "UPDATE message_recipients SET read_at = ?1 WHERE message_id = ?2 AND agent_name = ?3",
        rusqlite::params![ts, message_id, agent],
    )?;
    Ok(())
}

fn message_acked(tx: &Transaction, payload: &JsonValue, ts: &str) -> Result<(), HiveError> {
    let message_id = str_field(payload, "message_id")
        .ok_or_else(|| HiveError::Validation("message_acked payload missing message_id".into()))?;
    let agent = str_field(payload, "agent")
        .ok_or_else(|| HiveError::Validation("message_acked payload missing agent".into()))?;
    tx.execute(
        "UPDATE message_recipients SET acked_at = ?1 WHERE message_id = ?2 AND agent_name = ?3",
        rusqlite::params![ts, message_id, agent],
    )?;
    Ok(())
}

fn file_reserved(
    tx: &Transaction,
    project_key: &str,
    ts: &str,
    payload: &JsonValue,
) -> Result<(), HiveError> {
    let agent = str_field(payload, "agent")
        .ok_or_else(|| HiveError::Validation("file_reserved payload missing agent".into()))?;
    let exclusive = payload
        .get("exclusive")
        .and_then(|v| v.as_bool())
        .unwrap_or(true);
    let expires_at = payload
        .get("expires_at")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HiveError::Validation("file_reserved payload missing expires_at".into()))?;
    let reason = str_field(payload, "reason");
    let grants = payload
        .get("grants")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();

    for grant in grants {
        let path = grant
            .get("path")
            .and_then(|v| v.as_str())
            .ok_or_else(|| HiveError::Validation("file_reserved grant missing path".into()))?;
        let reservation_id = grant
            .get("reservation_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                HiveError::Validation("file_reserved grant missing reservation_id".into())
            })?;
        let holder_id = grant.get("holder_id").and_then(|v| v.as_str());

        // Clear any prior active row for this exact (agent, pattern) pair.
        tx.execute(
            "UPDATE reservations SET released_at = ?1
             WHERE project_key = ?2 AND agent_name = ?3 AND path_pattern = ?4 AND released_at IS NULL",
            rusqlite::params![ts, project_key, agent, path],
        )?;

        tx.execute(
            "INSERT INTO reservations (reservation_id, project_key, agent_name, path_pattern, exclusive, reason, created_at, expires_at, lock_holder_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            rusqlite::params![
                reservation_id,
                project_key,
                agent,
                path,
                exclusive as i64,
                reason,
                ts,
                expires_at,
                holder_id,
            ],
        )?;
    }
    Ok(())
}

fn file_released(
    tx: &Transaction,
    project_key: &str,
    ts: &str,
    payload: &JsonValue,
) -> Result<(), HiveError> {
    let agent = str_field(payload, "agent")
        .ok_or_else(|| HiveError::Validation("file_released payload missing agent".into()))?;
    let reservation_ids: Vec<String> = payload
        .get("reservation_ids")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default();

    if !reservation_ids.is_empty() {
        for id in reservation_ids {
            tx.execute(
                "UPDATE reservations SET released_at = ?1
                 WHERE project_key = ?2 AND agent_name = ?3 AND reservation_id = ?4 AND released_at IS NULL",
                rusqlite::params![ts, project_key, agent, id],
            )?;
        }
    } else {
        tx.execute(
            "UPDATE reservations SET released_at = ?1
             WHERE project_key = ?2 AND agent_name = ?3 AND released_at IS NULL",
            rusqlite::params![ts, project_key, agent],
        )?;
    }
    Ok(())
}

fn decomposition_generated(
    tx: &Transaction,
    project_key: &str,
    ts: &str,
    payload: &JsonValue,
) -> Result<(), HiveError> {
    let epic_id = str_field(payload, "epic_id").ok_or_else(|| {
        HiveError::Validation("decomposition_generated payload missing epic_id".into())
    })?;
    let subtasks = payload
        .get("subtasks")
        .cloned()
        .unwrap_or_else(|| JsonValue::Array(vec![]));

    tx.execute(
        "INSERT INTO eval_records (epic_id, project_key, subtasks, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?4)
         ON CONFLICT(epic_id) DO UPDATE SET subtasks = excluded.subtasks, updated_at = excluded.updated_at",
        rusqlite::params![epic_id, project_key, subtasks.to_string(), ts],
    )?;
    Ok(())
}

fn subtask_outcome(tx: &Transaction, ts: &str, payload: &JsonValue) -> Result<(), HiveError> {
    let epic_id = str_field(payload, "epic_id")
        .ok_or_else(|| HiveError::Validation("subtask_outcome payload missing epic_id".into()))?;
    let success = payload.get("success").and_then(|v| v.as_bool()).unwrap_or(false);

    let outcomes_raw: String = tx
        .query_row(
            "SELECT outcomes FROM eval_records WHERE epic_id = ?1",
            [&epic_id],
            |row| row.get(0),
        )
        .map_err(|_| HiveError::NotFound(format!("no eval_records row for epic {epic_id:?}")))?;
    let mut outcomes: Vec<JsonValue> = serde_json::from_str(&outcomes_raw)?;
    outcomes.push(payload.clone());

    tx.execute(
        "UPDATE eval_records SET
            outcomes = ?1,
            success_count = success_count + ?2,
            failure_count = failure_count + ?3,
            updated_at = ?4
         WHERE epic_id = ?5",
        rusqlite::params![
            serde_json::to_string(&outcomes)?,
            if success { 1 } else { 0 },
            if success { 0 } else { 1 },
            ts,
            epic_id,
        ],
    )?;
    Ok(())
}

fn human_feedback(tx: &Transaction, ts: &str, payload: &JsonValue) -> Result<(), HiveError> {
    let epic_id = str_field(payload, "epic_id")
        .ok_or_else(|| HiveError::Validation("human_feedback payload missing epic_id".into()))?;
    tx.execute(
        "UPDATE eval_records SET human_feedback = ?1, updated_at = ?2 WHERE epic_id = ?3",
        rusqlite::params![payload.to_string(), ts, epic_id],
    )?;
    Ok(())
}

fn swarm_checkpointed(
    tx: &Transaction,
    project_key: &str,
    ts: &str,
    payload: &JsonValue,
) -> Result<(), HiveError> {
    let bead_id = str_field(payload, "bead_id").ok_or_else(|| {
        HiveError::Validation("swarm_checkpointed payload missing bead_id".into())
    })?;
    let epic_id = str_field(payload, "epic_id");
    let strategy = str_field(payload, "strategy");
    let files = payload.get("files").cloned().unwrap_or_else(|| JsonValue::Array(vec![]));
    let dependencies = payload
        .get("dependencies")
        .cloned()
        .unwrap_or_else(|| JsonValue::Array(vec![]));
    let directives = payload
        .get("directives")
        .cloned()
        .unwrap_or_else(|| JsonValue::Object(Default::default()));

    tx.execute(
        "INSERT INTO swarm_contexts (project_key, bead_id, epic_id, strategy, files, dependencies, directives, checkpointed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(project_key, bead_id) DO UPDATE SET
            epic_id = excluded.epic_id,
            strategy = excluded.strategy,
            files = excluded.files,
            dependencies = excluded.dependencies,
            directives = excluded.directives,
            checkpointed_at = excluded.checkpointed_at",
        rusqlite::params![
            project_key,
            bead_id,
            epic_id,
            strategy,
            files.to_string(),
            dependencies.to_string(),
            directives.to_string(),
            ts,
        ],
    )?;
    if crate::core::debug_enabled("checkpoints") {
        eprintln!("[hive:checkpoints] {project_key} checkpointed bead {bead_id}");
    }
    Ok(())
}

fn swarm_recovered(
    tx: &Transaction,
    project_key: &str,
    ts: &str,
    payload: &JsonValue,
) -> Result<(), HiveError> {
    let bead_id = str_field(payload, "bead_id")
        .ok_or_else(|| HiveError::Validation("swarm_recovered payload missing bead_id".into()))?;
    let recovery = payload
        .get("recovery")
        .cloned()
        .unwrap_or_else(|| JsonValue::Object(Default::default()));
    tx.execute(
        "UPDATE swarm_contexts SET recovery = ?1, recovered_at = ?2 WHERE project_key = ?3 AND bead_id = ?4",
        rusqlite::params![recovery.to_string(), ts, project_key, bead_id],
    )?;
    Ok(())
}

fn cell_created(
    tx: &Transaction,
    project_key: &str,
    ts: &str,
    actor: &str,
    payload: &JsonValue,
) -> Result<(), HiveError> {
    let cell_id = str_field(payload, "cell_id")
        .ok_or_else(|| HiveError::Validation("cell_created payload missing cell_id".into()))?;
    let cell_type = str_field(payload, "cell_type").unwrap_or_else(|| "task".to_string());
    let title = str_field(payload, "title")
        .ok_or_else(|| HiveError::Validation("cell_created payload missing title".into()))?;
    let description = str_field(payload, "description");
    let priority = payload.get("priority").and_then(|v| v.as_i64()).unwrap_or(2);
    let category = str_field(payload, "category");
    let component = str_field(payload, "component");
    let parent_id = str_field(payload, "parent_id");
    let assignee = str_field(payload, "assignee").or_else(|| Some(actor.to_string()));
    let dependencies = payload
        .get("dependencies")
        .cloned()
        .unwrap_or_else(|| JsonValue::Array(vec![]));
    let metadata = payload
        .get("metadata")
        .cloned()
        .unwrap_or_else(|| JsonValue::Object(Default::default()));

    tx.execute(
        "INSERT INTO cells (cell_id, project_key, cell_type, title, description, priority, category, component, parent_id, assignee, dependencies, metadata, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13)",
        rusqlite::params![
            cell_id,
            project_key,
            cell_type,
            title,
            description,
            priority,
            category,
            component,
            parent_id,
            assignee,
            dependencies.to_string(),
            metadata.to_string(),
            ts,
        ],
    )?;
    Ok(())
}

fn cell_status_changed(tx: &Transaction, ts: &str, payload: &JsonValue) -> Result<(), HiveError> {
    let cell_id = str_field(payload, "cell_id").ok_or_else(|| {
        HiveError::Validation("cell_status_changed payload missing cell_id".into())
    })?;
    let status = str_field(payload, "status").ok_or_else(|| {
        HiveError::Validation("cell_status_changed payload missing status".into())
    })?;
    tx.execute(
        "UPDATE cells SET status = ?1, updated_at = ?2 WHERE cell_id = ?3",
        rusqlite::params![status, ts, cell_id],
    )?;
    Ok(())
}

fn cell_closed(tx: &Transaction, ts: &str, payload: &JsonValue) -> Result<(), HiveError> {
    let cell_id = str_field(payload, "cell_id")
        .ok_or_else(|| HiveError::Validation("cell_closed payload missing cell_id".into()))?;
    tx.execute(
        "UPDATE cells SET status = 'closed', closed_at = ?1, updated_at = ?1 WHERE cell_id = ?2",
        rusqlite::params![ts, cell_id],
    )?;
    Ok(())
}
