//! Worktree management for GitWorkspace
//!
//! Each agent works in its own linked worktree on its own branch; the main
//! checkout is touched only by the merge engine.

use git2::{Error as GitError, Repository, Worktree, WorktreeAddOptions};
use std::path::Path;

use crate::git::types::WorktreeInfo;
use crate::git::GitWorkspace;

impl GitWorkspace {
    /// Create a worktree for a branch, creating the branch at HEAD if needed
    pub fn add_worktree(&self, branch: &str, path: &Path) -> Result<WorktreeInfo, GitError> {
        self.ensure_branch(branch)?;

        let branch_ref = self.repo.find_branch(branch, git2::BranchType::Local)?;

        let mut opts = WorktreeAddOptions::new();
        opts.reference(Some(branch_ref.get()));

        // Branch names like "task/t1" would nest under .git/worktrees/ and fail
        let worktree_name = branch.replace('/', "-");

        let worktree = self.repo.worktree(&worktree_name, path, Some(&opts))?;
        self.worktree_to_info(&worktree)
    }

    /// Remove a worktree by path
    pub fn remove_worktree(&self, path: &Path) -> Result<(), GitError> {
        let wanted = path.to_string_lossy();
        let worktrees = self.repo.worktrees()?;

        for name in worktrees.iter().flatten() {
            if let Ok(worktree) = self.repo.find_worktree(name) {
                let worktree_path = worktree.path().to_string_lossy();
                if worktree_path.trim_end_matches('/') == wanted.trim_end_matches('/') {
                    if worktree.path().exists() {
                        std::fs::remove_dir_all(worktree.path()).map_err(|e| {
                            GitError::from_str(&format!("Failed to remove worktree dir: {}", e))
                        })?;
                    }
                    let mut prune_opts = git2::WorktreePruneOptions::new();
                    prune_opts.valid(true).working_tree(true);
                    worktree.prune(Some(&mut prune_opts))?;
                    return Ok(());
                }
            }
        }

        Err(GitError::from_str(&format!(
            "Worktree not found: {}",
            wanted
        )))
    }

    /// Prune worktree entries whose directory no longer exists
    pub fn prune_orphaned_worktrees(&self) -> Result<u32, GitError> {
        let worktrees = self.repo.worktrees()?;
        let mut pruned_count = 0;

        for name in worktrees.iter().flatten() {
            if let Ok(worktree) = self.repo.find_worktree(name) {
                if !worktree.path().exists() {
                    log::info!("[Git] Pruning orphaned worktree '{}'", name);
                    if let Err(e) = worktree.prune(None) {
                        log::warn!("[Git] Failed to prune worktree '{}': {}", name, e);
                    } else {
                        pruned_count += 1;
                    }
                }
            }
        }

        Ok(pruned_count)
    }

    fn worktree_to_info(&self, worktree: &Worktree) -> Result<WorktreeInfo, GitError> {
        let name = worktree.name().unwrap_or("").to_string();
        let path = worktree.path().to_string_lossy().to_string();

        let branch = Repository::open(worktree.path()).ok().and_then(|wt_repo| {
            wt_repo.head().ok().and_then(|head| {
                if head.is_branch() {
                    head.shorthand().map(|s| s.to_string())
                } else {
                    None
                }
            })
        });

        Ok(WorktreeInfo { name, path, branch })
    }
}
