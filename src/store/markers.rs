//! Per-task transient markers
//!
//! Each task owns a directory under `.foreman/tasks/<task-id>/` holding small
//! single-purpose JSON files. The presence of a marker file is the state; the
//! scheduler derives a task's lifecycle position purely from which markers
//! exist. Each marker kind has exactly one writing component, so marker files
//! never need the shared-document lock.

use super::{task_dir, write_json, FileResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// In-progress marker: the dispatcher bound an agent to this task
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunningMarker {
    /// Agent bound to the task
    pub agent_id: String,
    /// When the binding happened
    pub started_at: String,
}

impl RunningMarker {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            started_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Completion report: the agent finished (or exited) on this task
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionReport {
    /// Agent that produced the work
    pub agent_id: String,
    /// Agent-provided summary (empty when the process exited silently)
    pub summary: String,
    /// Files the agent reported touching
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files_changed: Vec<String>,
    /// Process exit code when completion came from an exit, not a report
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub finished_at: String,
}

/// Review approval marker
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalMarker {
    /// One-line review rationale
    pub rationale: String,
    /// True when the verdict was unparseable and the lenient default applied
    #[serde(default)]
    pub defaulted: bool,
    pub decided_at: String,
}

/// Terminal marker: the task branch landed on the main line
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergedMarker {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_id: Option<String>,
    pub merged_at: String,
}

/// Terminal marker: the task failed (rejection, exhausted stuck retries)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedMarker {
    pub reason: String,
    pub failed_at: String,
}

/// Terminal marker: automated conflict resolution gave up
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NeedsHumanReviewMarker {
    pub conflict_files: Vec<String>,
    pub escalated_at: String,
}

/// Bounded retry counter (merge conflicts, stuck re-dispatches)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryCounter {
    pub retries: u32,
    pub max: u32,
}

/// Marker file names within a task directory
const RUNNING: &str = "running.json";
const COMPLETED: &str = "completed.json";
const APPROVED: &str = "approved.json";
const MERGED: &str = "merged.json";
const FAILED: &str = "failed.json";
const NEEDS_HUMAN_REVIEW: &str = "needs_human_review.json";
const CONFLICT_RETRIES: &str = "conflict_retries.json";
const STUCK_RETRIES: &str = "stuck_retries.json";

fn marker_path(project_path: &Path, task_id: &str, name: &str) -> PathBuf {
    task_dir(project_path, task_id).join(name)
}

fn read_marker<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
    if !path.exists() {
        return None;
    }
    match super::read_json(path) {
        Ok(marker) => Some(marker),
        Err(e) => {
            log::warn!("[Store] Ignoring unreadable marker: {}", e);
            None
        }
    }
}

fn clear_marker(path: &Path) -> FileResult<()> {
    if path.exists() {
        fs::remove_file(path).map_err(|e| format!("Failed to remove {:?}: {}", path, e))?;
    }
    Ok(())
}

pub fn write_running(project: &Path, task_id: &str, marker: &RunningMarker) -> FileResult<()> {
    write_json(&marker_path(project, task_id, RUNNING), marker)
}

pub fn read_running(project: &Path, task_id: &str) -> Option<RunningMarker> {
    read_marker(&marker_path(project, task_id, RUNNING))
}

pub fn clear_running(project: &Path, task_id: &str) -> FileResult<()> {
    clear_marker(&marker_path(project, task_id, RUNNING))
}

pub fn write_completed(project: &Path, task_id: &str, report: &CompletionReport) -> FileResult<()> {
    write_json(&marker_path(project, task_id, COMPLETED), report)
}

pub fn read_completed(project: &Path, task_id: &str) -> Option<CompletionReport> {
    read_marker(&marker_path(project, task_id, COMPLETED))
}

pub fn clear_completed(project: &Path, task_id: &str) -> FileResult<()> {
    clear_marker(&marker_path(project, task_id, COMPLETED))
}

pub fn write_approved(project: &Path, task_id: &str, marker: &ApprovalMarker) -> FileResult<()> {
    write_json(&marker_path(project, task_id, APPROVED), marker)
}

pub fn read_approved(project: &Path, task_id: &str) -> Option<ApprovalMarker> {
    read_marker(&marker_path(project, task_id, APPROVED))
}

pub fn clear_approved(project: &Path, task_id: &str) -> FileResult<()> {
    clear_marker(&marker_path(project, task_id, APPROVED))
}

pub fn write_merged(project: &Path, task_id: &str, marker: &MergedMarker) -> FileResult<()> {
    write_json(&marker_path(project, task_id, MERGED), marker)
}

pub fn read_merged(project: &Path, task_id: &str) -> Option<MergedMarker> {
    read_marker(&marker_path(project, task_id, MERGED))
}

pub fn write_failed(project: &Path, task_id: &str, marker: &FailedMarker) -> FileResult<()> {
    write_json(&marker_path(project, task_id, FAILED), marker)
}

pub fn read_failed(project: &Path, task_id: &str) -> Option<FailedMarker> {
    read_marker(&marker_path(project, task_id, FAILED))
}

pub fn write_needs_human_review(
    project: &Path,
    task_id: &str,
    marker: &NeedsHumanReviewMarker,
) -> FileResult<()> {
    write_json(&marker_path(project, task_id, NEEDS_HUMAN_REVIEW), marker)
}

pub fn read_needs_human_review(project: &Path, task_id: &str) -> Option<NeedsHumanReviewMarker> {
    read_marker(&marker_path(project, task_id, NEEDS_HUMAN_REVIEW))
}

pub fn read_conflict_retries(project: &Path, task_id: &str) -> Option<RetryCounter> {
    read_marker(&marker_path(project, task_id, CONFLICT_RETRIES))
}

pub fn write_conflict_retries(
    project: &Path,
    task_id: &str,
    counter: &RetryCounter,
) -> FileResult<()> {
    write_json(&marker_path(project, task_id, CONFLICT_RETRIES), counter)
}

pub fn clear_conflict_retries(project: &Path, task_id: &str) -> FileResult<()> {
    clear_marker(&marker_path(project, task_id, CONFLICT_RETRIES))
}

pub fn read_stuck_retries(project: &Path, task_id: &str) -> Option<RetryCounter> {
    read_marker(&marker_path(project, task_id, STUCK_RETRIES))
}

pub fn write_stuck_retries(
    project: &Path,
    task_id: &str,
    counter: &RetryCounter,
) -> FileResult<()> {
    write_json(&marker_path(project, task_id, STUCK_RETRIES), counter)
}
