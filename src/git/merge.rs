//! Merge and conflict handling for GitWorkspace

use git2::{build::CheckoutBuilder, BranchType, Error as GitError, MergeOptions, Oid};
use std::path::Path;

use crate::git::types::{ConflictDetail, DiffSummary, MergeOutcome};
use crate::git::GitWorkspace;

impl GitWorkspace {
    /// Merge a source branch into a target branch.
    /// On conflict the repository is left mid-merge; call `abort_merge` or
    /// resolve and `finish_merge`.
    pub fn merge_into(
        &self,
        source_branch: &str,
        target_branch: &str,
    ) -> Result<MergeOutcome, GitError> {
        log::info!("[Git] Merging {} into {}", source_branch, target_branch);

        self.checkout_branch(target_branch)?;

        let source_ref = self.repo.find_branch(source_branch, BranchType::Local)?;
        let source_commit = source_ref.get().peel_to_commit()?;
        let annotated_commit = self.repo.find_annotated_commit(source_commit.id())?;

        let (analysis, _preference) = self.repo.merge_analysis(&[&annotated_commit])?;

        if analysis.is_up_to_date() {
            return Ok(MergeOutcome {
                success: true,
                message: "Already up to date".to_string(),
                conflict_files: vec![],
                commit_id: None,
                fast_forward: false,
            });
        }

        if analysis.is_fast_forward() {
            let target_ref_name = format!("refs/heads/{}", target_branch);
            let mut target_ref = self.repo.find_reference(&target_ref_name)?;
            target_ref.set_target(
                source_commit.id(),
                &format!("Fast-forward {} into {}", source_branch, target_branch),
            )?;
            self.repo
                .checkout_head(Some(CheckoutBuilder::default().force()))?;

            return Ok(MergeOutcome {
                success: true,
                message: format!("Fast-forwarded {} into {}", source_branch, target_branch),
                conflict_files: vec![],
                commit_id: Some(source_commit.id().to_string()),
                fast_forward: true,
            });
        }

        // Normal merge
        let mut merge_opts = MergeOptions::new();
        let mut checkout_opts = CheckoutBuilder::new();
        checkout_opts.safe();

        self.repo.merge(
            &[&annotated_commit],
            Some(&mut merge_opts),
            Some(&mut checkout_opts),
        )?;

        let mut index = self.repo.index()?;
        if index.has_conflicts() {
            let conflict_files = self.conflicted_paths()?;
            log::warn!("[Git] Merge has conflicts: {:?}", conflict_files);
            return Ok(MergeOutcome {
                success: false,
                message: format!("Merge conflicts in {} file(s)", conflict_files.len()),
                conflict_files,
                commit_id: None,
                fast_forward: false,
            });
        }

        // No conflicts - create the merge commit
        let tree_id = index.write_tree()?;
        let tree = self.repo.find_tree(tree_id)?;

        let head_commit = self.repo.head()?.peel_to_commit()?;
        let signature = self.signature()?;

        let merge_commit = self.repo.commit(
            Some("HEAD"),
            &signature,
            &signature,
            &format!("Merge branch '{}' into '{}'", source_branch, target_branch),
            &tree,
            &[&head_commit, &source_commit],
        )?;

        self.repo.cleanup_state()?;

        Ok(MergeOutcome {
            success: true,
            message: format!("Merged {} into {}", source_branch, target_branch),
            conflict_files: vec![],
            commit_id: Some(merge_commit.to_string()),
            fast_forward: false,
        })
    }

    /// Abort an ongoing merge, resetting to HEAD
    pub fn abort_merge(&self) -> Result<(), GitError> {
        log::info!("[Git] Aborting merge");

        let head = self.repo.head()?.peel_to_commit()?;
        self.repo
            .reset(head.as_object(), git2::ResetType::Hard, None)?;
        self.repo.cleanup_state()?;

        Ok(())
    }

    fn conflicted_paths(&self) -> Result<Vec<String>, GitError> {
        let index = self.repo.index()?;
        let mut paths = Vec::new();

        for conflict in index.conflicts()?.flatten() {
            if let Some(entry) = conflict.our.or(conflict.their).or(conflict.ancestor) {
                paths.push(String::from_utf8_lossy(&entry.path).to_string());
            }
        }

        Ok(paths)
    }

    /// Three-way details for every conflicted file. Call while the
    /// repository is in a merge-conflict state.
    pub fn conflict_details(&self) -> Result<Vec<ConflictDetail>, GitError> {
        let index = self.repo.index()?;

        if !index.has_conflicts() {
            return Ok(Vec::new());
        }

        let workdir = self
            .repo
            .workdir()
            .ok_or_else(|| GitError::from_str("Repository has no working directory"))?;

        let mut details = Vec::new();
        for conflict in index.conflicts()? {
            let conflict = conflict?;

            let path = match conflict
                .our
                .as_ref()
                .or(conflict.their.as_ref())
                .or(conflict.ancestor.as_ref())
            {
                Some(entry) => String::from_utf8_lossy(&entry.path).to_string(),
                None => continue,
            };

            let our_content = self.blob_content(conflict.our.as_ref())?;
            let their_content = self.blob_content(conflict.their.as_ref())?;
            let ancestor_content = self.blob_content(conflict.ancestor.as_ref())?;

            // Working-tree copy carries the conflict markers
            let conflict_markers = std::fs::read_to_string(workdir.join(&path)).unwrap_or_default();

            details.push(ConflictDetail {
                path,
                our_content,
                their_content,
                ancestor_content,
                conflict_markers,
            });
        }

        Ok(details)
    }

    fn blob_content(&self, entry: Option<&git2::IndexEntry>) -> Result<String, GitError> {
        match entry {
            Some(entry) => {
                let blob = self.repo.find_blob(entry.id)?;
                Ok(String::from_utf8_lossy(blob.content()).to_string())
            }
            None => Ok(String::new()),
        }
    }

    /// Write resolved content to a conflicted file and stage it
    pub fn resolve_conflicted_file(&self, path: &str, resolved: &str) -> Result<(), GitError> {
        let workdir = self
            .repo
            .workdir()
            .ok_or_else(|| GitError::from_str("Repository has no working directory"))?;

        std::fs::write(workdir.join(path), resolved)
            .map_err(|e| GitError::from_str(&format!("Failed to write file: {}", e)))?;

        let mut index = self.repo.index()?;
        index.add_path(Path::new(path))?;
        index.write()?;

        Ok(())
    }

    /// Complete a merge after all conflicts were resolved and staged
    pub fn finish_merge(&self, message: &str) -> Result<String, GitError> {
        let merge_head_path = self.repo.path().join("MERGE_HEAD");
        if !merge_head_path.exists() {
            return Err(GitError::from_str("Not in a merge state"));
        }

        let index = self.repo.index()?;
        if index.has_conflicts() {
            return Err(GitError::from_str(
                "Cannot complete merge: unresolved conflicts remain",
            ));
        }

        let merge_head_content = std::fs::read_to_string(&merge_head_path)
            .map_err(|e| GitError::from_str(&format!("Failed to read MERGE_HEAD: {}", e)))?;
        let merge_head_oid = Oid::from_str(merge_head_content.trim())?;
        let merge_commit = self.repo.find_commit(merge_head_oid)?;

        let head_commit = self.repo.head()?.peel_to_commit()?;

        let mut index = self.repo.index()?;
        let tree_id = index.write_tree()?;
        let tree = self.repo.find_tree(tree_id)?;

        let signature = self.signature()?;
        let commit_id = self.repo.commit(
            Some("HEAD"),
            &signature,
            &signature,
            message,
            &tree,
            &[&head_commit, &merge_commit],
        )?;

        self.repo.cleanup_state()?;

        Ok(commit_id.to_string())
    }

    /// Summarize a branch's changes relative to the merge base with the target
    pub fn diff_summary(
        &self,
        source_branch: &str,
        target_branch: &str,
    ) -> Result<DiffSummary, GitError> {
        let diff = self.branch_diff(source_branch, target_branch)?;
        let stats = diff.stats()?;

        let mut files = Vec::new();
        diff.foreach(
            &mut |delta, _| {
                if let Some(path) = delta.new_file().path().or_else(|| delta.old_file().path()) {
                    files.push(path.to_string_lossy().to_string());
                }
                true
            },
            None,
            None,
            None,
        )?;

        Ok(DiffSummary {
            files,
            insertions: stats.insertions(),
            deletions: stats.deletions(),
        })
    }

    /// Patch text for a branch against the merge base, truncated to a byte
    /// budget so review briefings stay bounded
    pub fn diff_patch(
        &self,
        source_branch: &str,
        target_branch: &str,
        max_bytes: usize,
    ) -> Result<String, GitError> {
        let diff = self.branch_diff(source_branch, target_branch)?;

        let mut patch = String::new();
        let print_result = diff.print(git2::DiffFormat::Patch, |_delta, _hunk, line| {
            if matches!(line.origin(), '+' | '-' | ' ') {
                patch.push(line.origin());
            }
            patch.push_str(&String::from_utf8_lossy(line.content()));
            patch.len() < max_bytes
        });

        match print_result {
            Ok(()) => Ok(patch),
            // The callback aborts the walk once the budget is hit
            Err(e) if e.code() == git2::ErrorCode::User => {
                patch.push_str("\n... (diff truncated)\n");
                Ok(patch)
            }
            Err(e) => Err(e),
        }
    }

    fn branch_diff(
        &self,
        source_branch: &str,
        target_branch: &str,
    ) -> Result<git2::Diff<'_>, GitError> {
        let source = self
            .repo
            .find_branch(source_branch, BranchType::Local)?
            .get()
            .peel_to_commit()?;
        let target = self
            .repo
            .find_branch(target_branch, BranchType::Local)?
            .get()
            .peel_to_commit()?;

        let base_oid = self.repo.merge_base(source.id(), target.id())?;
        let base_tree = self.repo.find_commit(base_oid)?.tree()?;
        let source_tree = source.tree()?;

        self.repo
            .diff_tree_to_tree(Some(&base_tree), Some(&source_tree), None)
    }
}
