//! Git operations using git2-rs
//!
//! Organized into focused submodules:
//! - `manager` - Core GitWorkspace struct, commits
//! - `branches` - Branch operations (create, delete, checkout)
//! - `worktrees` - Worktree management for agent workspaces
//! - `merge` - Merge, conflict extraction, diff summaries
//! - `types` - Shared data structures

mod branches;
mod manager;
mod merge;
#[cfg(test)]
mod tests;
mod types;
mod worktrees;

pub use manager::GitWorkspace;
pub use types::{ConflictDetail, DiffSummary, MergeOutcome, WorktreeInfo};
