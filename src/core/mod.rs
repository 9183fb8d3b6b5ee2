//! Core modules for hive-core's event-sourced coordination substrate.
//!
//! This is the foundation of the coordination core. All subsystems and
//! shared primitives live here.
//!
//! # For AI Agents
//!
//! This is an **agent-first system**. Agents register, exchange messages,
//! reserve paths, and track work items (cells) via the Facade below.
//!
//! ## Module Overview
//!
//! - **`store`**: Project handle (project_key + workspace root)
//! - **`broker`**: Serialized state access control plane (the thin waist)
//! - **`db`**: Database connection and schema bootstrap
//! - **`schemas`**: Canonical SQL schemas for every subsystem
//! - **`migration`**: Forward-only schema migrations applied at open time
//! - **`error`**: Canonical error type for all hive-core operations
//! - **`time`**: Timestamp / event-id helpers
//! - **`glob`**: Glob-pattern path matching for reservation conflicts
//! - **`event_store`**: Append-only event log with per-project sequence
//! - **`projections`**: Synchronous, same-transaction projection handlers
//! - **`reservation`**: Glob-aware conflict detection and CAS-backed locks
//! - **`cell`**: Work-item tracker (cells/beads), epics, JSONL flush
//! - **`import`**: Legacy `.beads` migration and JSONL merge/import
//! - **`facade`**: Per-project operation surface agents actually call
//! - **`registry`**: Process-wide cache of `Facade` handles, by project_key

pub mod broker;
pub mod cell;
pub mod db;
pub mod error;
pub mod event_store;
pub mod facade;
pub mod glob;
pub mod import;
pub mod migration;
pub mod projections;
pub mod registry;
pub mod reservation;
pub mod schemas;
pub mod store;
pub mod time;

/// True if `tag` appears in the comma-separated `HIVE_DEBUG` env var, e.g.
/// `HIVE_DEBUG=events,reservations`. Debug lines gated on this go to
/// stderr via `eprintln!` only — never into a JSON response or the event
/// log itself.
pub fn debug_enabled(tag: &str) -> bool {
    std::env::var("HIVE_DEBUG")
        .map(|v| v.split(',').any(|t| t.trim() == tag))
        .unwrap_or(false)
}
