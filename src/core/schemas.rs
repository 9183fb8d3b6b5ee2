//! Centralized SQL schema definitions for the hive-core project database.
//!
//! Each project (`project_key`) owns exactly one SQLite file,
//! `<root>/.hive/hive.db`, holding the event log plus every projection table
//! derived from it. Keeping schema text as named constants, rather than
//! inline in migration closures, mirrors how the teacher crate centralizes
//! its per-subsystem DDL.

pub const HIVE_DB_NAME: &str = "hive.db";
pub const HIVE_DB_SCHEMA_VERSION: i64 = 1;

pub const SCHEMA_MIGRATIONS: &str = "
    CREATE TABLE IF NOT EXISTS schema_migrations (
        id TEXT PRIMARY KEY,
        applied_at INTEGER NOT NULL
    )
";

// --- Event log ---

pub const EVENTS: &str = "
    CREATE TABLE IF NOT EXISTS events (
        sequence INTEGER NOT NULL,
        project_key TEXT NOT NULL,
        event_id TEXT NOT NULL,
        event_type TEXT NOT NULL,
        ts TEXT NOT NULL,
        actor TEXT NOT NULL,
        payload TEXT NOT NULL,
        schema_version TEXT NOT NULL DEFAULT '1',
        PRIMARY KEY (project_key, sequence)
    )
";
pub const EVENTS_INDEX_TYPE: &str =
    "CREATE INDEX IF NOT EXISTS idx_events_type ON events(project_key, event_type)";
pub const EVENTS_INDEX_EVENT_ID: &str =
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_events_event_id ON events(event_id)";

// --- Agents projection ---

pub const AGENTS: &str = "
    CREATE TABLE IF NOT EXISTS agents (
        project_key TEXT NOT NULL,
        name TEXT NOT NULL,
        program TEXT,
        model TEXT,
        task_description TEXT,
        registered_at TEXT NOT NULL,
        last_active_at TEXT NOT NULL,
        PRIMARY KEY (project_key, name)
    )
";

// --- Messages / inbox projection ---

pub const MESSAGES: &str = "
    CREATE TABLE IF NOT EXISTS messages (
        message_id TEXT PRIMARY KEY,
        project_key TEXT NOT NULL,
        from_agent TEXT NOT NULL,
        subject TEXT NOT NULL,
        body TEXT NOT NULL,
        thread_id TEXT,
        importance TEXT NOT NULL DEFAULT 'normal',
        ack_required INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        sequence INTEGER NOT NULL
    )
";
pub const MESSAGES_INDEX_PROJECT: &str =
    "CREATE INDEX IF NOT EXISTS idx_messages_project ON messages(project_key, sequence)";

pub const MESSAGE_RECIPIENTS: &str = "
    CREATE TABLE IF NOT EXISTS message_recipients (
        message_id TEXT NOT NULL,
        agent_name TEXT NOT NULL,
        read_at TEXT,
        acked_at TEXT,
        PRIMARY KEY (message_id, agent_name),
        FOREIGN KEY (message_id) REFERENCES messages(message_id)
    )
";
pub const MESSAGE_RECIPIENTS_INDEX_AGENT: &str =
    "CREATE INDEX IF NOT EXISTS idx_msg_recipients_agent ON message_recipients(agent_name, read_at)";

// --- Reservations ---

pub const RESERVATIONS: &str = "
    CREATE TABLE IF NOT EXISTS reservations (
        reservation_id TEXT PRIMARY KEY,
        project_key TEXT NOT NULL,
        agent_name TEXT NOT NULL,
        path_pattern TEXT NOT NULL,
        exclusive INTEGER NOT NULL DEFAULT 1,
        reason TEXT,
        created_at TEXT NOT NULL,
        expires_at INTEGER NOT NULL,
        released_at TEXT,
        lock_holder_id TEXT
    )
";
pub const RESERVATIONS_INDEX_ACTIVE: &str =
    "CREATE INDEX IF NOT EXISTS idx_reservations_active ON reservations(project_key, released_at, expires_at)";

// --- Locks (CAS) ---

pub const LOCKS: &str = "
    CREATE TABLE IF NOT EXISTS locks (
        resource TEXT PRIMARY KEY,
        holder_id TEXT NOT NULL,
        expires_at INTEGER NOT NULL,
        cas_version INTEGER NOT NULL DEFAULT 0
    )
";

// --- Cells (work items) ---

pub const CELLS: &str = "
    CREATE TABLE IF NOT EXISTS cells (
        cell_id TEXT PRIMARY KEY,
        project_key TEXT NOT NULL,
        cell_type TEXT NOT NULL DEFAULT 'task',
        title TEXT NOT NULL,
        description TEXT,
        status TEXT NOT NULL DEFAULT 'open',
        priority INTEGER NOT NULL DEFAULT 2,
        category TEXT,
        component TEXT,
        parent_id TEXT,
        assignee TEXT,
        dependencies TEXT NOT NULL DEFAULT '[]',
        metadata TEXT NOT NULL DEFAULT '{}',
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        closed_at TEXT
    )
";
pub const CELLS_INDEX_STATUS: &str =
    "CREATE INDEX IF NOT EXISTS idx_cells_status ON cells(project_key, status)";
pub const CELLS_INDEX_PARENT: &str =
    "CREATE INDEX IF NOT EXISTS idx_cells_parent ON cells(parent_id)";

// The dirty set is kept in memory (see `core::cell::CellTracker`), not
// persisted — §5 of the coordination model requires it survive only for the
// life of a session, drained by `flush()` or the graceful-shutdown hook.

// --- Eval records (decomposition / subtask outcomes / human feedback) ---

pub const EVAL_RECORDS: &str = "
    CREATE TABLE IF NOT EXISTS eval_records (
        epic_id TEXT PRIMARY KEY,
        project_key TEXT NOT NULL,
        subtasks TEXT NOT NULL DEFAULT '[]',
        outcomes TEXT NOT NULL DEFAULT '[]',
        success_count INTEGER NOT NULL DEFAULT 0,
        failure_count INTEGER NOT NULL DEFAULT 0,
        human_feedback TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
";

// --- Swarm contexts ---

pub const SWARM_CONTEXTS: &str = "
    CREATE TABLE IF NOT EXISTS swarm_contexts (
        project_key TEXT NOT NULL,
        bead_id TEXT NOT NULL,
        epic_id TEXT,
        strategy TEXT,
        files TEXT NOT NULL DEFAULT '[]',
        dependencies TEXT NOT NULL DEFAULT '[]',
        directives TEXT NOT NULL DEFAULT '{}',
        recovery TEXT NOT NULL DEFAULT '{}',
        checkpointed_at TEXT NOT NULL,
        recovered_at TEXT,
        PRIMARY KEY (project_key, bead_id)
    )
";

/// All statements applied, in order, to build the schema from scratch.
/// Migrations beyond this baseline live in `core::migration`.
pub const ALL_STATEMENTS: &[&str] = &[
    SCHEMA_MIGRATIONS,
    EVENTS,
    EVENTS_INDEX_TYPE,
    EVENTS_INDEX_EVENT_ID,
    AGENTS,
    MESSAGES,
    MESSAGES_INDEX_PROJECT,
    MESSAGE_RECIPIENTS,
    MESSAGE_RECIPIENTS_INDEX_AGENT,
    RESERVATIONS,
    RESERVATIONS_INDEX_ACTIVE,
    LOCKS,
    CELLS,
    CELLS_INDEX_STATUS,
    CELLS_INDEX_PARENT,
    EVAL_RECORDS,
    SWARM_CONTEXTS,
];
