//! Read-only projections for human-facing consumers
//!
//! The terminal and dashboard layers are external collaborators that render
//! orchestrator state; everything they need is derived here from the store.
//! The single write path back in is `respond`, which answers an escalated
//! question.

use crate::agents::pool::AgentPool;
use crate::mailbox::{Mailbox, Message};
use crate::models::AgentType;
use crate::plan::{TaskPlan, TaskType};
use crate::scheduler::{self, TaskState};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A task with its derived lifecycle position
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskView {
    pub id: String,
    pub task_type: TaskType,
    pub branch: String,
    pub agent: String,
    pub description: String,
    pub depends_on: Vec<String>,
    pub current_status: TaskState,
}

/// Minimal agent listing entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSummary {
    pub id: String,
    pub backend: AgentType,
    pub role: String,
    pub status: String,
    pub current_task: Option<String>,
    pub last_seen: String,
}

/// One line in the recent-activity feed
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEntry {
    pub at: String,
    pub entry: String,
}

/// Tasks with derived current status, in plan order
pub fn task_views(plan: &TaskPlan, project: &Path) -> Vec<TaskView> {
    let states = scheduler::classify(plan, project);

    plan.tasks
        .iter()
        .map(|t| TaskView {
            id: t.id.clone(),
            task_type: t.task_type,
            branch: t.branch.clone(),
            agent: t.agent.clone(),
            description: t.description.clone(),
            depends_on: t.depends_on.clone(),
            current_status: states.get(&t.id).copied().unwrap_or(TaskState::Blocked),
        })
        .collect()
}

/// Agent pool listing
pub fn agent_summaries(project: &Path) -> Vec<AgentSummary> {
    AgentPool::new(project)
        .read()
        .agents
        .into_iter()
        .map(|a| AgentSummary {
            id: a.id,
            backend: a.backend,
            role: a.role,
            status: a.status.to_string(),
            current_task: a.current_task,
            last_seen: a.last_seen,
        })
        .collect()
}

/// Escalated questions awaiting a human answer
pub fn pending_user_messages(project: &Path) -> Vec<Message> {
    Mailbox::new(project).user_pending()
}

/// Most recent message traffic, newest first
pub fn recent_activity(project: &Path, limit: usize) -> Vec<ActivityEntry> {
    let mailbox = Mailbox::new(project);

    let mut entries: Vec<ActivityEntry> = mailbox
        .read_outbox()
        .messages
        .into_iter()
        .chain(mailbox.read_inbox().messages)
        .map(|m| ActivityEntry {
            at: m.timestamp.clone(),
            entry: format!("{} -> {}: {}", m.from, m.to, m.body),
        })
        .collect();

    // RFC3339 UTC timestamps sort lexicographically
    entries.sort_by(|a, b| b.at.cmp(&a.at));
    entries.truncate(limit);
    entries
}

/// The one human write path: answer an escalated message by id
pub fn respond(project: &Path, message_id: &str, text: &str) -> Result<String, String> {
    Mailbox::new(project).respond_from_user(message_id, text)
}
