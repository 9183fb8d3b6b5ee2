//! CLI struct definitions for the hive-core command-line interface.
//!
//! All clap-derived types live here. Dispatch logic lives in `lib::run`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "hive",
    version = env!("CARGO_PKG_VERSION"),
    about = "Local, daemonless event-sourcing and coordination substrate for concurrent multi-agent work.",
    disable_version_flag = true
)]
pub struct Cli {
    /// Workspace root containing (or to contain) `.hive/`. Defaults to the
    /// current directory.
    #[clap(long, global = true)]
    pub project_path: Option<PathBuf>,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Register an agent (or refresh its metadata if already registered).
    Register(RegisterArgs),
    /// Send a message to one or more agents.
    Send(SendArgs),
    /// List an agent's inbox (at most 5 rows).
    Inbox(InboxArgs),
    /// Read one message by id.
    Read(ReadArgs),
    /// Acknowledge a message requiring acknowledgment.
    Ack(AckArgs),
    /// Reserve one or more path patterns.
    Reserve(ReserveArgs),
    /// Release reservations.
    Release(ReleaseArgs),
    /// List active reservation conflicts for a set of paths.
    Conflicts(ConflictsArgs),
    /// Cell (work item) operations.
    Cell(CellCli),
    /// Read raw events from the log.
    Events(EventsArgs),
    /// Check database connectivity.
    Health,
    /// Run the Stream Server.
    Serve(ServeArgs),
}

#[derive(clap::Args, Debug)]
pub struct RegisterArgs {
    #[clap(long)]
    pub agent_name: Option<String>,
    #[clap(long)]
    pub program: Option<String>,
    #[clap(long)]
    pub model: Option<String>,
    #[clap(long)]
    pub task_description: Option<String>,
}

#[derive(clap::Args, Debug)]
pub struct SendArgs {
    #[clap(long)]
    pub from: String,
    #[clap(long = "to", required = true)]
    pub to: Vec<String>,
    #[clap(long)]
    pub subject: String,
    #[clap(long)]
    pub body: String,
    #[clap(long)]
    pub thread_id: Option<String>,
    /// One of low, normal, high, urgent.
    #[clap(long, default_value = "normal")]
    pub importance: String,
    #[clap(long)]
    pub ack_required: bool,
}

#[derive(clap::Args, Debug)]
pub struct InboxArgs {
    #[clap(long)]
    pub agent: String,
    #[clap(long)]
    pub limit: Option<i64>,
    #[clap(long)]
    pub urgent_only: bool,
    #[clap(long)]
    pub unread_only: bool,
    #[clap(long)]
    pub include_bodies: bool,
}

#[derive(clap::Args, Debug)]
pub struct ReadArgs {
    #[clap(long)]
    pub message_id: String,
    #[clap(long)]
    pub agent: Option<String>,
    #[clap(long)]
    pub mark_as_read: bool,
}

#[derive(clap::Args, Debug)]
pub struct AckArgs {
    #[clap(long)]
    pub message_id: String,
    #[clap(long)]
    pub agent: String,
}

#[derive(clap::Args, Debug)]
pub struct ReserveArgs {
    #[clap(long)]
    pub agent: String,
    #[clap(long = "path", required = true)]
    pub paths: Vec<String>,
    #[clap(long)]
    pub reason: Option<String>,
    #[clap(long)]
    pub shared: bool,
    #[clap(long, default_value_t = 3600)]
    pub ttl_seconds: i64,
    #[clap(long)]
    pub force: bool,
}

#[derive(clap::Args, Debug)]
pub struct ReleaseArgs {
    #[clap(long)]
    pub agent: String,
    #[clap(long = "reservation-id")]
    pub reservation_ids: Vec<String>,
    #[clap(long = "path")]
    pub paths: Vec<String>,
    #[clap(long)]
    pub all: bool,
}

#[derive(clap::Args, Debug)]
pub struct ConflictsArgs {
    #[clap(long)]
    pub agent: String,
    #[clap(long = "path", required = true)]
    pub paths: Vec<String>,
}

#[derive(clap::Args, Debug)]
pub struct CellCli {
    #[clap(subcommand)]
    pub command: CellCommand,
}

#[derive(Subcommand, Debug)]
pub enum CellCommand {
    Create(CellCreateArgs),
    Get { id: String },
    List(CellListArgs),
    /// Print the next ready cell (unblocked, highest priority), if any.
    Next,
    Update(CellUpdateArgs),
    /// Transition status (open, in_progress, blocked, closed).
    Status(CellStatusArgs),
    Close(CellCloseArgs),
    /// Atomically create an epic plus its subtasks.
    CreateEpic(CellCreateEpicArgs),
}

#[derive(clap::Args, Debug)]
pub struct CellCreateArgs {
    /// One of bug, feature, task, epic, chore.
    #[clap(long, default_value = "task")]
    pub cell_type: String,
    #[clap(long)]
    pub title: String,
    #[clap(long)]
    pub description: Option<String>,
    #[clap(long, default_value_t = 2)]
    pub priority: i64,
    #[clap(long)]
    pub category: Option<String>,
    #[clap(long)]
    pub component: Option<String>,
    #[clap(long)]
    pub parent_id: Option<String>,
    #[clap(long)]
    pub assignee: Option<String>,
    #[clap(long = "depends-on")]
    pub dependencies: Vec<String>,
    #[clap(long)]
    pub actor: String,
}

#[derive(clap::Args, Debug)]
pub struct CellCreateEpicArgs {
    #[clap(long)]
    pub title: String,
    #[clap(long)]
    pub description: Option<String>,
    #[clap(long, default_value_t = 2)]
    pub priority: i64,
    /// JSON array of subtask specs: `[{"cell_type": "task", "title": "..."}]`.
    #[clap(long)]
    pub subtasks: String,
    #[clap(long)]
    pub actor: String,
}

#[derive(clap::Args, Debug)]
pub struct CellListArgs {
    pub status: Option<String>,
    #[clap(long)]
    pub cell_type: Option<String>,
    #[clap(long)]
    pub parent_id: Option<String>,
    #[clap(long)]
    pub ready: bool,
    #[clap(long)]
    pub limit: Option<i64>,
}

#[derive(clap::Args, Debug)]
pub struct CellUpdateArgs {
    pub id: String,
    #[clap(long)]
    pub title: Option<String>,
    #[clap(long)]
    pub description: Option<String>,
    #[clap(long)]
    pub priority: Option<i64>,
    #[clap(long)]
    pub category: Option<String>,
    #[clap(long)]
    pub component: Option<String>,
    #[clap(long)]
    pub assignee: Option<String>,
}

#[derive(clap::Args, Debug)]
pub struct CellStatusArgs {
    pub id: String,
    pub status: String,
    #[clap(long)]
    pub actor: String,
}

#[derive(clap::Args, Debug)]
pub struct CellCloseArgs {
    pub id: String,
    #[clap(long)]
    pub actor: String,
    #[clap(long)]
    pub reason: Option<String>,
}

#[derive(clap::Args, Debug)]
pub struct EventsArgs {
    #[clap(long)]
    pub after_sequence: Option<i64>,
    #[clap(long)]
    pub limit: Option<i64>,
}

#[derive(clap::Args, Debug)]
pub struct ServeArgs {
    #[clap(long, default_value = "127.0.0.1")]
    pub host: String,
    #[clap(long, default_value_t = 8420)]
    pub port: u16,
}
