//! Project handle for hive-core's single-store-per-project architecture.
//!
//! Every coordinating agent process operates against exactly one project,
//! identified by a `project_key` and rooted at a workspace directory holding
//! `.hive/`. Unlike the teacher's dual-store (User/Repo) split, hive-core has
//! a single store kind: one project-scoped, event-sourced database.

use std::path::PathBuf;

/// Handle to a project's on-disk workspace.
#[derive(Debug, Clone)]
pub struct Project {
    /// Stable identifier used to key the process-wide `Registry`.
    pub project_key: String,
    /// Absolute path to the workspace root directory (parent of `.hive/`).
    pub root: PathBuf,
}

impl Project {
    pub fn new(project_key: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            project_key: project_key.into(),
            root: root.into(),
        }
    }

    pub fn hive_dir(&self) -> PathBuf {
        self.root.join(".hive")
    }
}
