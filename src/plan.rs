//! Task plan input
//!
//! The planning collaborator hands the orchestrator a JSON document with a
//! project name and a task list. Every task must declare `depends_on`
//! explicitly (an empty array when independent); a plan that is structurally
//! invalid (duplicate ids, self-dependencies, unknown dependency ids, cycles)
//! is rejected before any scheduling happens.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use thiserror::Error;

/// Kind of work a task represents
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Research,
    Setup,
    Implement,
    Test,
    Integrate,
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskType::Research => "research",
            TaskType::Setup => "setup",
            TaskType::Implement => "implement",
            TaskType::Test => "test",
            TaskType::Integrate => "integrate",
        };
        write!(f, "{}", s)
    }
}

/// One unit of work in the dependency graph
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSpec {
    pub id: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    /// Branch the assigned agent works on
    pub branch: String,
    /// Preferred agent capability for dispatch matching
    pub agent: String,
    pub description: String,
    /// Mandatory in the document; a missing field is a parse error
    pub depends_on: Vec<String>,
}

/// The complete plan document
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPlan {
    pub project_name: String,
    pub tasks: Vec<TaskSpec>,
}

/// Structural plan validation failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("Failed to parse task plan: {0}")]
    Parse(String),

    #[error("Duplicate task id '{0}'")]
    DuplicateTask(String),

    #[error("Task '{0}' cannot depend on itself")]
    SelfDependency(String),

    #[error("Task '{from}' depends on non-existent task '{to}'")]
    UnknownDependency { from: String, to: String },

    #[error("Dependency cycle detected: {}", .0.join(" -> "))]
    Cycle(Vec<String>),
}

impl TaskPlan {
    /// Parse a plan from JSON text
    pub fn from_json(content: &str) -> Result<Self, PlanError> {
        serde_json::from_str(content).map_err(|e| PlanError::Parse(e.to_string()))
    }

    /// Load a plan document from disk
    pub fn load(path: &Path) -> Result<Self, PlanError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| PlanError::Parse(format!("{:?}: {}", path, e)))?;
        Self::from_json(&content)
    }

    /// Look up a task by id
    pub fn get(&self, task_id: &str) -> Option<&TaskSpec> {
        self.tasks.iter().find(|t| t.id == task_id)
    }

    /// Validate the plan structure: unique ids, known dependencies, no cycles
    pub fn validate(&self) -> Result<(), PlanError> {
        let mut ids: HashSet<&str> = HashSet::new();
        for task in &self.tasks {
            if !ids.insert(task.id.as_str()) {
                return Err(PlanError::DuplicateTask(task.id.clone()));
            }
        }

        for task in &self.tasks {
            for dep in &task.depends_on {
                if dep == &task.id {
                    return Err(PlanError::SelfDependency(task.id.clone()));
                }
                if !ids.contains(dep.as_str()) {
                    return Err(PlanError::UnknownDependency {
                        from: task.id.clone(),
                        to: dep.clone(),
                    });
                }
            }
        }

        if let Some(cycle) = self.find_cycle() {
            return Err(PlanError::Cycle(cycle));
        }

        Ok(())
    }

    /// Detect a dependency cycle using DFS, returning the cycle path
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        let depends_on: HashMap<&str, &Vec<String>> = self
            .tasks
            .iter()
            .map(|t| (t.id.as_str(), &t.depends_on))
            .collect();

        let mut visited: HashSet<&str> = HashSet::new();
        let mut in_path: HashSet<&str> = HashSet::new();
        let mut path: Vec<&str> = Vec::new();

        for task in &self.tasks {
            if !visited.contains(task.id.as_str()) {
                if let Some(cycle) = dfs_cycle(
                    task.id.as_str(),
                    &depends_on,
                    &mut visited,
                    &mut in_path,
                    &mut path,
                ) {
                    return Some(cycle.into_iter().map(|s| s.to_string()).collect());
                }
            }
        }

        None
    }
}

/// DFS helper for cycle detection
fn dfs_cycle<'a>(
    node: &'a str,
    depends_on: &HashMap<&'a str, &'a Vec<String>>,
    visited: &mut HashSet<&'a str>,
    in_path: &mut HashSet<&'a str>,
    path: &mut Vec<&'a str>,
) -> Option<Vec<&'a str>> {
    visited.insert(node);
    in_path.insert(node);
    path.push(node);

    if let Some(deps) = depends_on.get(node) {
        for dep in deps.iter() {
            let dep = dep.as_str();
            if in_path.contains(dep) {
                // Found a cycle - extract it from the path
                if let Some(cycle_start) = path.iter().position(|&n| n == dep) {
                    let mut cycle: Vec<&str> = path[cycle_start..].to_vec();
                    cycle.push(dep);
                    return Some(cycle);
                }
            }

            // Unknown deps are caught by validate(); skip them here
            if depends_on.contains_key(dep) && !visited.contains(dep) {
                if let Some(cycle) = dfs_cycle(dep, depends_on, visited, in_path, path) {
                    return Some(cycle);
                }
            }
        }
    }

    in_path.remove(node);
    path.pop();
    None
}
