//! hive-core: a local, daemonless event-sourcing and coordination substrate
//! for concurrent multi-agent work.
//!
//! **hive-core is not a task queue or a CI system.** It is the shared state
//! agents working in the same workspace coordinate through: who's active,
//! who's talking to whom, who holds which file paths, and what work items
//! exist and in what state. Everything is derived from one append-only
//! event log per project, replayed into synchronous SQLite projections at
//! write time.
//!
//! # For AI Agents
//!
//! - Register once per session: `hive register`
//! - Check your inbox before starting work: `hive inbox --agent <name>`
//! - Reserve paths before editing them: `hive reserve --agent <name> --path <glob>`
//! - Track multi-step work as cells: `hive cell create` / `hive cell status`
//!
//! # Architecture
//!
//! - **Event Store** (`core::event_store`): append-only log, one monotonic
//!   `sequence` per `project_key`.
//! - **Projections** (`core::projections`): synchronous, same-transaction
//!   materialized views (agents, messages, reservations, cells, ...).
//! - **Facade** (`core::facade`): the operation surface every caller uses;
//!   one instance per project, cached by `core::registry::Registry`.
//! - **Stream Server** (`server`): an axum HTTP surface exposing `/cells`,
//!   `/events` and `/streams/{project_key}` over the same Facade/Registry,
//!   for dashboards and out-of-process consumers.
//!
//! # Crate Structure
//!
//! - [`core`]: event store, projections, reservations, cells, facade, registry
//! - [`server`]: Stream Server (axum, SSE)
//! - [`cli`]: command-line argument definitions

pub mod cli;
pub mod core;
pub mod server;

use crate::cli::{
    CellCommand, Command, ConflictsArgs, EventsArgs, InboxArgs, ReadArgs, RegisterArgs,
    ReleaseArgs, ReserveArgs, SendArgs, ServeArgs,
};
use crate::core::cell::{CellArgs, CellPatch, CellQuery, CellStatus, CellType};
use crate::core::error::HiveError;
use crate::core::facade::{Facade, Importance, InboxArgs as FacadeInboxArgs, RegisterAgentArgs, SendMessageArgs};
use crate::core::registry::Registry;
use crate::core::reservation::{ReleaseFilter, ReserveRequest};
use crate::core::time;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Resolve the workspace root a CLI invocation operates against: the given
/// `--project-path`, or the current directory if absent. Unlike the
/// teacher's `find_decapod_project_root`, this never walks up looking for
/// an existing `.hive` — a missing directory is created on first write
/// (see `core::db::initialize_hive_db`).
fn resolve_workspace_root(project_path: Option<PathBuf>) -> Result<PathBuf, HiveError> {
    let raw = match project_path {
        Some(p) => p,
        None => std::env::current_dir()?,
    };
    if !raw.exists() {
        std::fs::create_dir_all(&raw)?;
    }
    std::fs::canonicalize(&raw).map_err(HiveError::Io)
}

/// Derive a stable `project_key` from a canonicalized workspace root. One
/// process, one root, one key — distinct `project_key`s are only meaningful
/// across Stream Server `/streams/{project_key}` subscriptions within that
/// same root (see `server::state::AppState`).
fn project_key_for(root: &Path) -> String {
    root.to_string_lossy().into_owned()
}

fn print_envelope(value: serde_json::Value) {
    println!("{}", serde_json::to_string_pretty(&value).unwrap_or_default());
}

fn ok_envelope(cmd: &str, extra: serde_json::Value) {
    print_envelope(time::command_envelope(cmd, "ok", extra));
}

fn err_envelope(cmd: &str, err: &HiveError) {
    let mut envelope = err.to_envelope();
    if let Some(obj) = envelope.as_object_mut() {
        obj.insert("cmd".to_string(), serde_json::json!(cmd));
    }
    eprintln!("{}", serde_json::to_string_pretty(&envelope).unwrap_or_default());
}

pub fn run() -> Result<(), HiveError> {
    let cli = cli::Cli::parse();
    let root = resolve_workspace_root(cli.project_path)?;
    let project_key = project_key_for(&root);

    if let Command::Serve(args) = cli.command {
        return run_serve(args, project_key, root);
    }

    let registry = Registry::new();
    let facade = registry.get_or_create(&project_key, &root)?;
    let cmd_name = command_name(&cli.command);

    let result = dispatch(&facade, cli.command);
    match result {
        Ok(extra) => {
            ok_envelope(cmd_name, extra);
            Ok(())
        }
        Err(err) => {
            err_envelope(cmd_name, &err);
            Err(err)
        }
    }
}

fn command_name(command: &Command) -> &'static str {
    match command {
        Command::Register(_) => "register",
        Command::Send(_) => "send",
        Command::Inbox(_) => "inbox",
        Command::Read(_) => "read",
        Command::Ack(_) => "ack",
        Command::Reserve(_) => "reserve",
        Command::Release(_) => "release",
        Command::Conflicts(_) => "conflicts",
        Command::Cell(_) => "cell",
        Command::Events(_) => "events",
        Command::Health => "health",
        Command::Serve(_) => "serve",
    }
}

fn dispatch(facade: &Arc<Facade>, command: Command) -> Result<serde_json::Value, HiveError> {
    match command {
        Command::Register(args) => register(facade, args),
        Command::Send(args) => send(facade, args),
        Command::Inbox(args) => inbox(facade, args),
        Command::Read(args) => read(facade, args),
        Command::Ack(args) => ack(facade, args),
        Command::Reserve(args) => reserve(facade, args),
        Command::Release(args) => release(facade, args),
        Command::Conflicts(args) => conflicts(facade, args),
        Command::Cell(cli) => cell(facade, cli.command),
        Command::Events(args) => events(facade, args),
        Command::Health => health(facade),
        Command::Serve(_) => unreachable!("serve is handled before registry construction"),
    }
}

fn register(facade: &Arc<Facade>, args: RegisterArgs) -> Result<serde_json::Value, HiveError> {
    let info = facade.register_agent(RegisterAgentArgs {
        agent_name: args.agent_name,
        program: args.program,
        model: args.model,
        task_description: args.task_description,
    })?;
    Ok(serde_json::json!({ "agent": info }))
}

fn send(facade: &Arc<Facade>, args: SendArgs) -> Result<serde_json::Value, HiveError> {
    let importance = Importance::from_str_opt(&args.importance).ok_or_else(|| {
        HiveError::Validation(format!("unknown importance {:?}", args.importance))
    })?;
    let result = facade.send_message(SendMessageArgs {
        from: args.from,
        to: args.to,
        subject: args.subject,
        body: args.body,
        thread_id: args.thread_id,
        importance,
        ack_required: args.ack_required,
    })?;
    Ok(serde_json::json!({ "message": result }))
}

fn inbox(facade: &Arc<Facade>, args: InboxArgs) -> Result<serde_json::Value, HiveError> {
    let entries = facade.inbox(FacadeInboxArgs {
        agent: args.agent,
        limit: args.limit,
        urgent_only: args.urgent_only,
        unread_only: args.unread_only,
        include_bodies: args.include_bodies,
    })?;
    Ok(serde_json::json!({ "messages": entries }))
}

fn read(facade: &Arc<Facade>, args: ReadArgs) -> Result<serde_json::Value, HiveError> {
    let detail = facade.read_message(&args.message_id, args.agent.as_deref(), args.mark_as_read)?;
    Ok(serde_json::json!({ "message": detail }))
}

fn ack(facade: &Arc<Facade>, args: cli::AckArgs) -> Result<serde_json::Value, HiveError> {
    facade.acknowledge(&args.message_id, &args.agent)?;
    Ok(serde_json::json!({ "message_id": args.message_id, "agent": args.agent }))
}

fn reserve(facade: &Arc<Facade>, args: ReserveArgs) -> Result<serde_json::Value, HiveError> {
    let mut req = ReserveRequest::new(facade.project_key(), args.agent, args.paths);
    req.reason = args.reason;
    req.exclusive = !args.shared;
    req.ttl_seconds = args.ttl_seconds;
    req.force = args.force;
    let outcome = facade.reserve(req)?;
    Ok(serde_json::json!({
        "granted": outcome.granted.iter().map(|g| serde_json::json!({
            "reservation_id": g.reservation_id,
            "path": g.path,
            "expires_at": g.expires_at,
        })).collect::<Vec<_>>(),
        "conflicts": outcome.conflicts.iter().map(|c| serde_json::json!({
            "path": c.path,
            "holder": c.holder,
            "pattern": c.pattern,
        })).collect::<Vec<_>>(),
    }))
}

fn release(facade: &Arc<Facade>, args: ReleaseArgs) -> Result<serde_json::Value, HiveError> {
    let filter = if args.all {
        ReleaseFilter::All
    } else if !args.reservation_ids.is_empty() {
        ReleaseFilter::ReservationIds(args.reservation_ids)
    } else {
        ReleaseFilter::Paths(args.paths)
    };
    let outcome = facade.release(&args.agent, filter)?;
    Ok(serde_json::json!({ "released": outcome.released, "released_at": outcome.released_at }))
}

fn conflicts(facade: &Arc<Facade>, args: ConflictsArgs) -> Result<serde_json::Value, HiveError> {
    let conflicts = facade.check_conflicts(&args.agent, &args.paths)?;
    Ok(serde_json::json!({
        "conflicts": conflicts.iter().map(|c| serde_json::json!({
            "path": c.path,
            "holder": c.holder,
            "pattern": c.pattern,
        })).collect::<Vec<_>>(),
    }))
}

fn cell(facade: &Arc<Facade>, command: CellCommand) -> Result<serde_json::Value, HiveError> {
    match command {
        CellCommand::Create(args) => {
            let cell_type = CellType::from_str_opt(&args.cell_type)
                .ok_or_else(|| HiveError::Validation(format!("unknown cell type {:?}", args.cell_type)))?;
            let mut cell_args = CellArgs::new(cell_type, args.title);
            cell_args.description = args.description;
            cell_args.priority = args.priority;
            cell_args.category = args.category;
            cell_args.component = args.component;
            cell_args.parent_id = args.parent_id;
            cell_args.assignee = args.assignee;
            cell_args.dependencies = args.dependencies;
            let created = facade.create_cell(&args.actor, cell_args)?;
            Ok(serde_json::json!({ "cell": created }))
        }
        CellCommand::Get { id } => {
            let found = facade.get_cell(&id)?;
            Ok(serde_json::json!({ "cell": found }))
        }
        CellCommand::List(args) => {
            let status = match args.status.as_deref() {
                None => None,
                Some(s) => Some(
                    CellStatus::from_str_opt(s)
                        .ok_or_else(|| HiveError::Validation(format!("unknown cell status {s:?}")))?,
                ),
            };
            let query = CellQuery {
                status,
                cell_type: args
                    .cell_type
                    .as_deref()
                    .and_then(CellType::from_str_opt),
                parent_id: args.parent_id,
                ready: args.ready,
                limit: args.limit,
            };
            let cells = facade.query_cells(query)?;
            Ok(serde_json::json!({ "cells": cells }))
        }
        CellCommand::Next => {
            let next = facade.get_next_ready_cell()?;
            Ok(serde_json::json!({ "cell": next }))
        }
        CellCommand::Update(args) => {
            let patch = CellPatch {
                title: args.title,
                description: args.description,
                priority: args.priority,
                category: args.category,
                component: args.component,
                assignee: args.assignee,
                dependencies: None,
                metadata: None,
            };
            let updated = facade.update_cell(&args.id, patch)?;
            Ok(serde_json::json!({ "cell": updated }))
        }
        CellCommand::Status(args) => {
            let status = CellStatus::from_str_opt(&args.status)
                .ok_or_else(|| HiveError::Validation(format!("unknown cell status {:?}", args.status)))?;
            let updated = facade.change_cell_status(&args.id, &args.actor, status)?;
            Ok(serde_json::json!({ "cell": updated }))
        }
        CellCommand::Close(args) => {
            let closed = facade.close_cell(&args.id, &args.actor, args.reason.as_deref())?;
            Ok(serde_json::json!({ "cell": closed }))
        }
        CellCommand::CreateEpic(args) => {
            let mut epic_args = CellArgs::new(CellType::Epic, args.title);
            epic_args.description = args.description;
            epic_args.priority = args.priority;

            let raw: serde_json::Value = serde_json::from_str(&args.subtasks)
                .map_err(|e| HiveError::Validation(format!("invalid --subtasks JSON: {e}")))?;
            let items = raw
                .as_array()
                .ok_or_else(|| HiveError::Validation("--subtasks must be a JSON array".into()))?;
            let subtasks = items
                .iter()
                .map(|item| {
                    let cell_type_str = item
                        .get("cell_type")
                        .and_then(|v| v.as_str())
                        .unwrap_or("task");
                    let cell_type = CellType::from_str_opt(cell_type_str).ok_or_else(|| {
                        HiveError::Validation(format!("unknown cell type {cell_type_str:?}"))
                    })?;
                    let title = item
                        .get("title")
                        .and_then(|v| v.as_str())
                        .ok_or_else(|| HiveError::Validation("subtask missing \"title\"".into()))?;
                    let mut subtask_args = CellArgs::new(cell_type, title);
                    subtask_args.description = item
                        .get("description")
                        .and_then(|v| v.as_str())
                        .map(str::to_string);
                    Ok(subtask_args)
                })
                .collect::<Result<Vec<_>, HiveError>>()?;

            let (epic, children) = facade.create_epic(&args.actor, epic_args, subtasks)?;
            Ok(serde_json::json!({ "epic": epic, "subtasks": children }))
        }
    }
}

fn events(facade: &Arc<Facade>, args: EventsArgs) -> Result<serde_json::Value, HiveError> {
    let mut filter = crate::core::event_store::ReadFilter::for_project(facade.project_key());
    if let Some(after) = args.after_sequence {
        filter = filter.after(after);
    }
    if let Some(limit) = args.limit {
        filter = filter.limit(limit);
    }
    let events = facade.read_events(&filter)?;
    Ok(serde_json::json!({ "events": events }))
}

fn health(facade: &Arc<Facade>) -> Result<serde_json::Value, HiveError> {
    let status = facade.health();
    Ok(serde_json::json!({ "healthy": status.healthy, "database": status.database }))
}

/// `hive serve`: the only subcommand needing an async runtime. Everything
/// else in `run()` stays synchronous, matching the core's own design.
fn run_serve(args: ServeArgs, project_key: String, root: PathBuf) -> Result<(), HiveError> {
    let addr: std::net::SocketAddr = format!("{}:{}", args.host, args.port)
        .parse()
        .map_err(|e| HiveError::Validation(format!("invalid host/port: {e}")))?;

    let runtime = tokio::runtime::Runtime::new().map_err(HiveError::Io)?;
    runtime.block_on(server::serve(addr, project_key, root))
}
