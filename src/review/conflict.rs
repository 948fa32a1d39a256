//! Automated merge-conflict resolution
//!
//! One resolution round replays the failed merge inside a fresh isolated
//! worktree on a throwaway branch, briefs a dedicated backend invocation with
//! the three-way content of each conflicted file, commits the resolved merge
//! there, and fast-forwards the result back into the main line. The round is
//! all-or-nothing: any failure aborts, cleans up, and reports false so the
//! caller's retry counter stays in charge.

use crate::agents::backend::{self, BackendInvocation};
use crate::config::OrchestratorConfig;
use crate::git::{ConflictDetail, GitWorkspace};
use crate::plan::TaskSpec;
use crate::store::{self, workspaces_dir};
use std::path::PathBuf;

pub struct ConflictResolver {
    config: OrchestratorConfig,
}

impl ConflictResolver {
    pub fn new(config: OrchestratorConfig) -> Self {
        Self { config }
    }

    /// Briefing for resolving one conflicted file
    fn resolution_prompt(&self, task: &TaskSpec, conflict: &ConflictDetail) -> String {
        format!(
            "You are resolving a git merge conflict produced by task {task_id} \
             ({task_description}).\n\n\
             ## File: {path}\n\n\
             ### Ancestor Version (Common Base)\n```\n{ancestor}\n```\n\n\
             ### Our Version (Main Line)\n```\n{ours}\n```\n\n\
             ### Their Version (Task Branch)\n```\n{theirs}\n```\n\n\
             ### Current File with Conflict Markers\n```\n{markers}\n```\n\n\
             ## Instructions\n\
             Merge the intent of both sides; keep the result syntactically valid.\n\n\
             ## Output Format\n\
             Output ONLY the final resolved file content, with no conflict \
             markers, no explanations, and no markdown code fences.",
            task_id = task.id,
            task_description = task.description,
            path = conflict.path,
            ancestor = conflict.ancestor_content,
            ours = conflict.our_content,
            theirs = conflict.their_content,
            markers = conflict.conflict_markers,
        )
    }

    /// Run one automated resolution round for a conflicted task.
    /// Ok(true) means the task branch now sits on the main line.
    pub async fn resolve_round(&self, task: &TaskSpec, attempt: u32) -> Result<bool, String> {
        let project = self.config.project_path.clone();
        let resolve_branch = format!("resolve/{}-{}", task.id, attempt);
        let worktree_path =
            workspaces_dir(&project).join(format!("resolve-{}-{}", task.id, attempt));

        log::info!(
            "[Resolver] Round {} for {} on {}",
            attempt,
            task.id,
            resolve_branch
        );

        let main_repo = GitWorkspace::open(&project)
            .map_err(|e| format!("Failed to open repository: {}", e))?;

        store::ensure_dir(workspaces_dir(&project).as_path())?;

        // Fresh isolated clone on a throwaway branch cut from the main line
        main_repo
            .add_worktree(&resolve_branch, &worktree_path)
            .map_err(|e| format!("Failed to create resolution worktree: {}", e))?;

        let resolved = self
            .resolve_in_worktree(task, &resolve_branch, &worktree_path)
            .await;

        let landed = match resolved {
            Ok(true) => {
                // The resolution branch holds a committed merge; bring it home
                match main_repo.merge_into(&resolve_branch, &self.config.main_branch) {
                    Ok(outcome) if outcome.success => true,
                    Ok(outcome) => {
                        log::warn!(
                            "[Resolver] Resolution branch would not land: {}",
                            outcome.message
                        );
                        let _ = main_repo.abort_merge();
                        false
                    }
                    Err(e) => {
                        log::warn!("[Resolver] Failed to land resolution branch: {}", e);
                        let _ = main_repo.abort_merge();
                        false
                    }
                }
            }
            Ok(false) => false,
            Err(e) => {
                log::warn!("[Resolver] Round failed for {}: {}", task.id, e);
                false
            }
        };

        self.cleanup(&main_repo, &resolve_branch, &worktree_path, landed);
        Ok(landed)
    }

    /// Replay the merge in the worktree and resolve every conflicted file
    async fn resolve_in_worktree(
        &self,
        task: &TaskSpec,
        resolve_branch: &str,
        worktree_path: &PathBuf,
    ) -> Result<bool, String> {
        let worktree = GitWorkspace::open(worktree_path)
            .map_err(|e| format!("Failed to open resolution worktree: {}", e))?;

        let outcome = worktree
            .merge_into(&task.branch, resolve_branch)
            .map_err(|e| format!("Replay merge failed: {}", e))?;

        if outcome.success {
            // The conflict evaporated (e.g. main moved since); nothing to resolve
            return Ok(true);
        }

        let conflicts = worktree
            .conflict_details()
            .map_err(|e| format!("Failed to read conflicts: {}", e))?;

        for conflict in &conflicts {
            log::info!("[Resolver] Resolving {} for {}", conflict.path, task.id);

            let invocation = BackendInvocation {
                backend: self.config.agent_backend,
                workspace: worktree_path.clone(),
                prompt: self.resolution_prompt(task, conflict),
                model: self.config.model.clone(),
            };

            let raw = match backend::run_to_completion(&invocation, self.config.backend_timeout_secs)
                .await
            {
                Ok(raw) => raw,
                Err(e) => {
                    log::warn!("[Resolver] Backend failed on {}: {}", conflict.path, e);
                    let _ = worktree.abort_merge();
                    return Ok(false);
                }
            };

            let content = backend::clean_response(&raw);
            if let Err(e) = worktree.resolve_conflicted_file(&conflict.path, &content) {
                log::warn!("[Resolver] Failed to stage {}: {}", conflict.path, e);
                let _ = worktree.abort_merge();
                return Ok(false);
            }
        }

        match worktree.finish_merge(&format!(
            "Resolve merge conflicts for task {} (automated)",
            task.id
        )) {
            Ok(_) => Ok(true),
            Err(e) => {
                log::warn!("[Resolver] Failed to commit resolution: {}", e);
                let _ = worktree.abort_merge();
                Ok(false)
            }
        }
    }

    /// Best-effort removal of the throwaway worktree and branch
    fn cleanup(
        &self,
        main_repo: &GitWorkspace,
        resolve_branch: &str,
        worktree_path: &PathBuf,
        landed: bool,
    ) {
        if let Err(e) = main_repo.remove_worktree(worktree_path) {
            log::debug!("[Resolver] Worktree cleanup: {}", e);
        }
        // After a successful landing the merge commit keeps the history alive
        if landed {
            if let Err(e) = main_repo.delete_branch(resolve_branch) {
                log::debug!("[Resolver] Branch cleanup: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::TaskType;
    use std::fs;
    use tempfile::TempDir;

    fn task(id: &str, branch: &str) -> TaskSpec {
        TaskSpec {
            id: id.to_string(),
            task_type: TaskType::Implement,
            branch: branch.to_string(),
            agent: "rust".to_string(),
            description: format!("Work on {}", id),
            depends_on: vec![],
        }
    }

    #[test]
    fn test_resolution_prompt_contains_all_sides() {
        let config = OrchestratorConfig::default();
        let resolver = ConflictResolver::new(config);

        let conflict = ConflictDetail {
            path: "src/lib.rs".to_string(),
            our_content: "main side".to_string(),
            their_content: "branch side".to_string(),
            ancestor_content: "common base".to_string(),
            conflict_markers: "<<<<<<< HEAD".to_string(),
        };

        let prompt = resolver.resolution_prompt(&task("T1", "task/t1"), &conflict);
        assert!(prompt.contains("src/lib.rs"));
        assert!(prompt.contains("main side"));
        assert!(prompt.contains("branch side"));
        assert!(prompt.contains("common base"));
        assert!(prompt.contains("no markdown code fences"));
    }

    #[tokio::test]
    async fn test_resolve_round_without_conflict_lands_branch() {
        // When the replayed merge is clean the round lands without any
        // backend involvement
        let temp_dir = TempDir::new().unwrap();
        let workspace = GitWorkspace::init(temp_dir.path()).unwrap();
        fs::write(temp_dir.path().join("base.txt"), "base\n").unwrap();
        workspace.commit_all("Add base").unwrap();
        let main = workspace.default_branch_name();

        workspace.ensure_branch("task/t1").unwrap();
        workspace.checkout_branch("task/t1").unwrap();
        fs::write(temp_dir.path().join("feature.txt"), "feature\n").unwrap();
        workspace.commit_all("Add feature").unwrap();
        workspace.checkout_branch(&main).unwrap();

        let config = OrchestratorConfig {
            project_path: temp_dir.path().to_path_buf(),
            main_branch: main,
            ..OrchestratorConfig::default()
        };
        let resolver = ConflictResolver::new(config);

        let landed = resolver.resolve_round(&task("T1", "task/t1"), 1).await.unwrap();
        assert!(landed);
        assert!(temp_dir.path().join("feature.txt").exists());
    }

    #[tokio::test]
    async fn test_resolve_round_reports_false_when_backend_unavailable() {
        let temp_dir = TempDir::new().unwrap();
        let workspace = GitWorkspace::init(temp_dir.path()).unwrap();
        fs::write(temp_dir.path().join("base.txt"), "base\n").unwrap();
        workspace.commit_all("Add base").unwrap();
        let main = workspace.default_branch_name();

        workspace.ensure_branch("task/t1").unwrap();
        workspace.checkout_branch("task/t1").unwrap();
        fs::write(temp_dir.path().join("base.txt"), "branch version\n").unwrap();
        workspace.commit_all("Branch change").unwrap();
        workspace.checkout_branch(&main).unwrap();
        fs::write(temp_dir.path().join("base.txt"), "main version\n").unwrap();
        workspace.commit_all("Main change").unwrap();

        let config = OrchestratorConfig {
            project_path: temp_dir.path().to_path_buf(),
            main_branch: main.clone(),
            // Starve the backend call so the round always fails fast
            backend_timeout_secs: 0,
            ..OrchestratorConfig::default()
        };
        let resolver = ConflictResolver::new(config);

        let landed = resolver.resolve_round(&task("T1", "task/t1"), 1).await.unwrap();
        assert!(!landed);

        // The main line is untouched and clean
        let content = fs::read_to_string(temp_dir.path().join("base.txt")).unwrap();
        assert_eq!(content, "main version\n");
        assert_eq!(workspace.current_branch_name().unwrap(), main);
    }
}
