//! Git data types shared across workspace operations

use serde::{Deserialize, Serialize};

/// Outcome of a merge attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeOutcome {
    pub success: bool,
    pub message: String,
    pub conflict_files: Vec<String>,
    pub commit_id: Option<String>,
    pub fast_forward: bool,
}

/// Three-way content of a single conflicted file, used to brief the
/// conflict-resolution agent
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictDetail {
    pub path: String,
    /// Content from the target branch (ours)
    pub our_content: String,
    /// Content from the source branch (theirs)
    pub their_content: String,
    /// Content from the common ancestor
    pub ancestor_content: String,
    /// Working-tree content with conflict markers
    pub conflict_markers: String,
}

/// A linked worktree serving as an agent workspace
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorktreeInfo {
    pub name: String,
    pub path: String,
    pub branch: Option<String>,
}

/// Summary of a branch's changes against the merge base
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffSummary {
    pub files: Vec<String>,
    pub insertions: usize,
    pub deletions: usize,
}

impl DiffSummary {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}
