//! Scheduler state snapshot
//!
//! The orchestrator persists its derived ready/blocked/running partition at
//! the end of every cycle and on shutdown, so a later run can report where it
//! left off without redoing completed work. The markers remain the source of
//! truth; the snapshot is the resume/reporting view.

use super::{foreman_dir, read_json_or_default, write_json, FileResult};
use crate::scheduler::TaskState;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Last-known partition of task ids by derived state
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerSnapshot {
    pub taken_at: String,
    #[serde(default)]
    pub blocked: Vec<String>,
    #[serde(default)]
    pub ready: Vec<String>,
    #[serde(default)]
    pub running: Vec<String>,
    #[serde(default)]
    pub completed: Vec<String>,
    #[serde(default)]
    pub approved: Vec<String>,
    #[serde(default)]
    pub conflict_retry: Vec<String>,
    #[serde(default)]
    pub merged: Vec<String>,
    #[serde(default)]
    pub failed: Vec<String>,
    #[serde(default)]
    pub needs_human_review: Vec<String>,
}

impl SchedulerSnapshot {
    /// Build a snapshot from (task id, derived state) pairs
    pub fn from_states<I>(states: I) -> Self
    where
        I: IntoIterator<Item = (String, TaskState)>,
    {
        let mut snapshot = Self {
            taken_at: chrono::Utc::now().to_rfc3339(),
            ..Self::default()
        };

        for (task_id, state) in states {
            let bucket = match state {
                TaskState::Blocked => &mut snapshot.blocked,
                TaskState::Ready => &mut snapshot.ready,
                TaskState::Running => &mut snapshot.running,
                TaskState::Completed => &mut snapshot.completed,
                TaskState::Approved => &mut snapshot.approved,
                TaskState::ConflictRetry => &mut snapshot.conflict_retry,
                TaskState::Merged => &mut snapshot.merged,
                TaskState::Failed => &mut snapshot.failed,
                TaskState::NeedsHumanReview => &mut snapshot.needs_human_review,
            };
            bucket.push(task_id);
        }

        snapshot
    }

    /// Total number of tasks captured
    pub fn total(&self) -> usize {
        self.blocked.len()
            + self.ready.len()
            + self.running.len()
            + self.completed.len()
            + self.approved.len()
            + self.conflict_retry.len()
            + self.merged.len()
            + self.failed.len()
            + self.needs_human_review.len()
    }
}

fn snapshot_path(project_path: &Path) -> std::path::PathBuf {
    foreman_dir(project_path).join("state.json")
}

/// Persist the snapshot (atomic)
pub fn save_snapshot(project_path: &Path, snapshot: &SchedulerSnapshot) -> FileResult<()> {
    write_json(&snapshot_path(project_path), snapshot)
}

/// Load the last-known snapshot, empty when none was ever written
pub fn load_snapshot(project_path: &Path) -> SchedulerSnapshot {
    read_json_or_default(&snapshot_path(project_path))
}
