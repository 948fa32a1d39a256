//! Assignment log
//!
//! Binds tasks to pooled agents. Assignments are append-only: they are
//! created by the dispatcher, accepted by the agent (via `await_assignment`),
//! and never deleted, preserving an audit trail of who worked on what.

use crate::store::{foreman_dir, locked_update, read_json_or_default, FileResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A task bound to a pooled agent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub id: String,
    pub agent_id: String,
    pub task_id: String,
    pub branch: String,
    pub description: String,
    pub assigned_at: String,
    /// Set by the agent when it picks the assignment up
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accepted_at: Option<String>,
}

impl Assignment {
    pub fn new(
        agent_id: impl Into<String>,
        task_id: impl Into<String>,
        branch: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            agent_id: agent_id.into(),
            task_id: task_id.into(),
            branch: branch.into(),
            description: description.into(),
            assigned_at: chrono::Utc::now().to_rfc3339(),
            accepted_at: None,
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.accepted_at.is_some()
    }
}

/// The complete assignments document
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentsFile {
    pub assignments: Vec<Assignment>,
    pub last_updated: String,
}

impl Default for AssignmentsFile {
    fn default() -> Self {
        Self {
            assignments: Vec::new(),
            last_updated: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Store wrapper for assignments.json
#[derive(Debug, Clone)]
pub struct AssignmentsStore {
    path: PathBuf,
}

impl AssignmentsStore {
    pub fn new(project_path: &Path) -> Self {
        Self {
            path: foreman_dir(project_path).join("assignments.json"),
        }
    }

    pub fn read(&self) -> AssignmentsFile {
        read_json_or_default(&self.path)
    }

    /// Append a new assignment
    pub fn append(&self, assignment: Assignment) -> FileResult<String> {
        let id = assignment.id.clone();
        locked_update::<AssignmentsFile, _, _>(&self.path, |file| {
            file.assignments.push(assignment);
            file.last_updated = chrono::Utc::now().to_rfc3339();
        })?;
        Ok(id)
    }

    /// Mark an assignment accepted, returning it. Returns None when the
    /// assignment does not exist or was already accepted.
    pub fn accept(&self, assignment_id: &str) -> FileResult<Option<Assignment>> {
        locked_update::<AssignmentsFile, _, _>(&self.path, |file| {
            let accepted = file
                .assignments
                .iter_mut()
                .find(|a| a.id == assignment_id && !a.is_accepted())
                .map(|a| {
                    a.accepted_at = Some(chrono::Utc::now().to_rfc3339());
                    a.clone()
                });
            if accepted.is_some() {
                file.last_updated = chrono::Utc::now().to_rfc3339();
            }
            accepted
        })
    }

    /// Unaccepted assignments waiting for an agent
    pub fn pending_for(&self, agent_id: &str) -> Vec<Assignment> {
        self.read()
            .assignments
            .into_iter()
            .filter(|a| a.agent_id == agent_id && !a.is_accepted())
            .collect()
    }

    /// The most recent assignment for a task, if any
    pub fn latest_for_task(&self, task_id: &str) -> Option<Assignment> {
        self.read()
            .assignments
            .into_iter()
            .rev()
            .find(|a| a.task_id == task_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_assignment_new() {
        let assignment = Assignment::new("agent-1", "T1", "task/t1", "Build the parser");
        assert_eq!(assignment.agent_id, "agent-1");
        assert_eq!(assignment.task_id, "T1");
        assert!(!assignment.is_accepted());
    }

    #[test]
    fn test_append_and_pending() {
        let temp_dir = TempDir::new().unwrap();
        let store = AssignmentsStore::new(temp_dir.path());

        store
            .append(Assignment::new("agent-1", "T1", "task/t1", "work"))
            .unwrap();
        store
            .append(Assignment::new("agent-2", "T2", "task/t2", "other work"))
            .unwrap();

        let pending = store.pending_for("agent-1");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].task_id, "T1");
    }

    #[test]
    fn test_accept_once() {
        let temp_dir = TempDir::new().unwrap();
        let store = AssignmentsStore::new(temp_dir.path());

        let id = store
            .append(Assignment::new("agent-1", "T1", "task/t1", "work"))
            .unwrap();

        let accepted = store.accept(&id).unwrap().unwrap();
        assert!(accepted.is_accepted());
        assert!(store.pending_for("agent-1").is_empty());

        // Accepting twice yields nothing
        assert!(store.accept(&id).unwrap().is_none());
    }

    #[test]
    fn test_latest_for_task() {
        let temp_dir = TempDir::new().unwrap();
        let store = AssignmentsStore::new(temp_dir.path());

        assert!(store.latest_for_task("T1").is_none());

        store
            .append(Assignment::new("agent-1", "T1", "task/t1", "first"))
            .unwrap();
        store
            .append(Assignment::new("agent-2", "T1", "task/t1", "second"))
            .unwrap();

        let latest = store.latest_for_task("T1").unwrap();
        assert_eq!(latest.agent_id, "agent-2");
    }
}
