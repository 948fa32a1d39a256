//! Task graph scheduler
//!
//! A pure projection over the task plan and the on-disk markers: given the
//! same state it always produces the same classification, so the orchestrator
//! can recompute readiness every cycle. The scheduler holds no memory of its
//! own.
//!
//! A dependency is satisfied only once the dependency task is merged or
//! approved-pending-merge - PM approval, never raw agent completion, is what
//! unblocks downstream work.

use crate::plan::TaskPlan;
use crate::store::markers;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Derived lifecycle position of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Waiting on dependencies
    Blocked,
    /// All dependencies satisfied, not yet dispatched
    Ready,
    /// An agent is bound to the task
    Running,
    /// Agent finished; awaiting PM review
    Completed,
    /// PM approved; awaiting merge
    Approved,
    /// Merge conflicted; automated resolution still within its retry budget
    ConflictRetry,
    /// Terminal: landed on the main line
    Merged,
    /// Terminal: rejected or gave up
    Failed,
    /// Terminal: conflict retries exhausted, manual intervention required
    NeedsHumanReview,
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskState::Blocked => "blocked",
            TaskState::Ready => "ready",
            TaskState::Running => "running",
            TaskState::Completed => "completed",
            TaskState::Approved => "approved",
            TaskState::ConflictRetry => "conflict_retry",
            TaskState::Merged => "merged",
            TaskState::Failed => "failed",
            TaskState::NeedsHumanReview => "needs_human_review",
        };
        write!(f, "{}", s)
    }
}

/// Terminal states: the orchestrator never touches these tasks again
pub fn is_terminal(state: TaskState) -> bool {
    matches!(
        state,
        TaskState::Merged | TaskState::Failed | TaskState::NeedsHumanReview
    )
}

/// Whether a task in this state satisfies its dependents.
/// Approved-pending-merge counts; raw completion does not.
pub fn satisfies_dependents(state: TaskState) -> bool {
    matches!(
        state,
        TaskState::Merged | TaskState::Approved | TaskState::ConflictRetry
    )
}

/// Derive a task's state from its markers alone, before dependency analysis.
/// Returns None when no marker applies (the task is blocked or ready).
fn marker_state(project: &Path, task_id: &str) -> Option<TaskState> {
    // Terminal markers win over everything else
    if markers::read_merged(project, task_id).is_some() {
        return Some(TaskState::Merged);
    }
    if markers::read_needs_human_review(project, task_id).is_some() {
        return Some(TaskState::NeedsHumanReview);
    }
    if markers::read_failed(project, task_id).is_some() {
        return Some(TaskState::Failed);
    }

    if markers::read_approved(project, task_id).is_some() {
        let in_retry = markers::read_conflict_retries(project, task_id)
            .map(|c| c.retries > 0)
            .unwrap_or(false);
        return Some(if in_retry {
            TaskState::ConflictRetry
        } else {
            TaskState::Approved
        });
    }

    if markers::read_completed(project, task_id).is_some() {
        return Some(TaskState::Completed);
    }
    if markers::read_running(project, task_id).is_some() {
        return Some(TaskState::Running);
    }

    None
}

/// Classify every task in the plan. Pure function of plan + markers.
pub fn classify(plan: &TaskPlan, project: &Path) -> HashMap<String, TaskState> {
    // First pass: marker-derived states
    let mut states: HashMap<String, TaskState> = HashMap::new();
    for task in &plan.tasks {
        if let Some(state) = marker_state(project, &task.id) {
            states.insert(task.id.clone(), state);
        }
    }

    // Second pass: blocked/ready for tasks with no marker
    for task in &plan.tasks {
        if states.contains_key(&task.id) {
            continue;
        }

        let deps_satisfied = task.depends_on.iter().all(|dep| {
            states
                .get(dep)
                .copied()
                .map(satisfies_dependents)
                .unwrap_or(false)
        });

        let state = if deps_satisfied {
            TaskState::Ready
        } else {
            TaskState::Blocked
        };
        states.insert(task.id.clone(), state);
    }

    states
}

/// Tasks eligible for dispatch right now, in plan order
pub fn ready_set(plan: &TaskPlan, project: &Path) -> Vec<String> {
    let states = classify(plan, project);
    plan.tasks
        .iter()
        .filter(|t| states.get(&t.id) == Some(&TaskState::Ready))
        .map(|t| t.id.clone())
        .collect()
}

/// Whether every task reached a terminal state
pub fn all_terminal(plan: &TaskPlan, project: &Path) -> bool {
    classify(plan, project)
        .values()
        .all(|state| is_terminal(*state))
}

/// Whether the project can make no further progress: some tasks are not
/// terminal, but none of them is in a progressable state. Happens when the
/// remaining tasks are blocked behind failed or human-review dependencies;
/// the orchestrator must report partial success instead of spinning.
pub fn stalled(plan: &TaskPlan, project: &Path) -> bool {
    let states = classify(plan, project);

    let any_open = states.values().any(|state| !is_terminal(*state));
    let any_progressable = states.values().any(|state| {
        matches!(
            state,
            TaskState::Ready
                | TaskState::Running
                | TaskState::Completed
                | TaskState::Approved
                | TaskState::ConflictRetry
        )
    });

    any_open && !any_progressable
}

/// Final partition for the convergence report
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionSummary {
    pub merged: Vec<String>,
    pub failed: Vec<String>,
    pub needs_human_review: Vec<String>,
    pub unfinished: Vec<String>,
}

impl CompletionSummary {
    /// True when every task merged cleanly
    pub fn is_full_success(&self) -> bool {
        self.failed.is_empty() && self.needs_human_review.is_empty() && self.unfinished.is_empty()
    }
}

/// Summarize the current terminal partition, in plan order
pub fn completion_summary(plan: &TaskPlan, project: &Path) -> CompletionSummary {
    let states = classify(plan, project);
    let mut summary = CompletionSummary::default();

    for task in &plan.tasks {
        match states.get(&task.id) {
            Some(TaskState::Merged) => summary.merged.push(task.id.clone()),
            Some(TaskState::Failed) => summary.failed.push(task.id.clone()),
            Some(TaskState::NeedsHumanReview) => {
                summary.needs_human_review.push(task.id.clone())
            }
            _ => summary.unfinished.push(task.id.clone()),
        }
    }

    summary
}
