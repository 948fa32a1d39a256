//! Review & Merge Engine
//!
//! Completed tasks get a binary PM verdict (lenient bias: approve whenever
//! there is genuine work), then approved branches are merged into the main
//! line. Merge conflicts are retried through a dedicated resolution agent a
//! bounded number of times before the task is handed to a human.

pub mod conflict;

use crate::config::OrchestratorConfig;
use crate::git::GitWorkspace;
use crate::plan::TaskSpec;
use crate::pm::PmEngine;
use crate::scheduler::TaskState;
use crate::store::markers::{
    self, ApprovalMarker, FailedMarker, MergedMarker, NeedsHumanReviewMarker, RetryCounter,
};
use conflict::ConflictResolver;
use regex::Regex;

/// Bytes of patch text included in a review briefing
const REVIEW_PATCH_BUDGET: usize = 16 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewDecision {
    Approve,
    Reject,
}

/// A parsed review verdict
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewOutcome {
    pub decision: ReviewDecision,
    pub rationale: String,
    /// True when the verdict text was unparseable and the lenient default
    /// (approve) was applied
    pub defaulted: bool,
}

/// Parse a PM verdict. Deliberately tolerant: anything that does not contain
/// a recognizable approve/reject token defaults to approve. This leniency is
/// policy, not a bug.
pub fn parse_decision(raw: &str) -> ReviewOutcome {
    let Ok(re) = Regex::new(r"(?i)\b(approved?|lgtm|reject(?:ed)?|den(?:y|ied))\b[:\s\-]*(.*)") else {
        return default_approve();
    };

    for line in raw.lines() {
        let Some(captures) = re.captures(line) else {
            continue;
        };
        let token = captures
            .get(1)
            .map(|m| m.as_str().to_lowercase())
            .unwrap_or_default();
        let rationale = captures
            .get(2)
            .map(|m| m.as_str().trim().to_string())
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| "no rationale given".to_string());

        let decision = if token.starts_with("reject") || token.starts_with("den") {
            ReviewDecision::Reject
        } else {
            ReviewDecision::Approve
        };

        return ReviewOutcome {
            decision,
            rationale,
            defaulted: false,
        };
    }

    default_approve()
}

fn default_approve() -> ReviewOutcome {
    ReviewOutcome {
        decision: ReviewDecision::Approve,
        rationale: "review response could not be parsed; defaulting to approve".to_string(),
        defaulted: true,
    }
}

/// PM-driven review and merge of completed tasks
pub struct ReviewEngine {
    config: OrchestratorConfig,
    pm: PmEngine,
    resolver: ConflictResolver,
}

impl ReviewEngine {
    pub fn new(config: OrchestratorConfig) -> Self {
        let pm = PmEngine::new(config.clone());
        let resolver = ConflictResolver::new(config.clone());
        Self {
            config,
            pm,
            resolver,
        }
    }

    /// Describe a completed branch for the review briefing
    fn diff_report(&self, task: &TaskSpec) -> String {
        let git = match GitWorkspace::open(&self.config.project_path) {
            Ok(git) => git,
            Err(e) => return format!("(diff unavailable: {})", e),
        };

        if !git.branch_exists(&task.branch) {
            return "(no branch produced - the agent reported completion without file changes)"
                .to_string();
        }

        let summary = match git.diff_summary(&task.branch, &self.config.main_branch) {
            Ok(summary) => summary,
            Err(e) => return format!("(diff unavailable: {})", e),
        };

        if summary.is_empty() {
            return "(no file changes against the main line)".to_string();
        }

        let patch = git
            .diff_patch(&task.branch, &self.config.main_branch, REVIEW_PATCH_BUDGET)
            .unwrap_or_default();

        format!(
            "{} file(s) changed, +{} -{}\nFiles: {}\n\n{}",
            summary.files.len(),
            summary.insertions,
            summary.deletions,
            summary.files.join(", "),
            patch
        )
    }

    /// Review one completed task: obtain the verdict, apply the decision to
    /// the markers. Approve keeps the work moving; reject is terminal.
    pub async fn review_task(&self, task: &TaskSpec) -> Result<ReviewOutcome, String> {
        let project = self.config.project_path.clone();
        let diff_report = self.diff_report(task);

        let outcome = match self.pm.review_verdict(task, &diff_report).await {
            Some(raw) => parse_decision(&raw),
            None => default_approve(),
        };

        match outcome.decision {
            ReviewDecision::Approve => {
                log::info!(
                    "[Review] Approved {}{}: {}",
                    task.id,
                    if outcome.defaulted { " (defaulted)" } else { "" },
                    outcome.rationale
                );
                markers::write_approved(
                    &project,
                    &task.id,
                    &ApprovalMarker {
                        rationale: outcome.rationale.clone(),
                        defaulted: outcome.defaulted,
                        decided_at: chrono::Utc::now().to_rfc3339(),
                    },
                )?;
                markers::clear_completed(&project, &task.id)?;
            }
            ReviewDecision::Reject => {
                log::warn!("[Review] Rejected {}: {}", task.id, outcome.rationale);
                markers::clear_completed(&project, &task.id)?;
                markers::write_failed(
                    &project,
                    &task.id,
                    &FailedMarker {
                        reason: format!("Review rejected: {}", outcome.rationale),
                        failed_at: chrono::Utc::now().to_rfc3339(),
                    },
                )?;
            }
        }

        Ok(outcome)
    }

    /// Attempt to land an approved task on the main line. Returns the
    /// resulting task state: Merged, ConflictRetry, or NeedsHumanReview.
    pub async fn merge_task(&self, task: &TaskSpec) -> Result<TaskState, String> {
        let project = self.config.project_path.clone();

        let git = GitWorkspace::open(&project)
            .map_err(|e| format!("Failed to open repository: {}", e))?;

        // A task that produced no branch (research, say) has nothing to land
        if !git.branch_exists(&task.branch) {
            log::info!("[Merge] {} has no branch; marking merged", task.id);
            self.mark_merged(&task.id, None)?;
            return Ok(TaskState::Merged);
        }

        let outcome = git
            .merge_into(&task.branch, &self.config.main_branch)
            .map_err(|e| format!("Merge failed for {}: {}", task.id, e))?;

        if outcome.success {
            self.mark_merged(&task.id, outcome.commit_id)?;
            return Ok(TaskState::Merged);
        }

        // Conflict: abort cleanly, count the failed attempt
        if let Err(e) = git.abort_merge() {
            log::warn!("[Merge] Failed to abort merge for {}: {}", task.id, e);
        }

        let mut counter = markers::read_conflict_retries(&project, &task.id).unwrap_or(
            RetryCounter {
                retries: 0,
                max: self.config.max_merge_retries,
            },
        );
        counter.retries += 1;
        markers::write_conflict_retries(&project, &task.id, &counter)?;

        log::warn!(
            "[Merge] Conflict on {} (attempt {}/{}): {:?}",
            task.id,
            counter.retries,
            counter.max,
            outcome.conflict_files
        );

        if counter.retries > counter.max {
            return self.give_up(task, outcome.conflict_files);
        }

        // One automated resolution round; on continued conflict the task
        // stays in conflict-retry and waits for the next cycle
        match self.resolver.resolve_round(task, counter.retries).await {
            Ok(true) => {
                log::info!("[Merge] Automated resolution landed {}", task.id);
                self.mark_merged(&task.id, None)?;
                Ok(TaskState::Merged)
            }
            Ok(false) => {
                if counter.retries >= counter.max {
                    self.give_up(task, outcome.conflict_files)
                } else {
                    Ok(TaskState::ConflictRetry)
                }
            }
            Err(e) => {
                log::error!("[Merge] Resolution round failed for {}: {}", task.id, e);
                if counter.retries >= counter.max {
                    self.give_up(task, outcome.conflict_files)
                } else {
                    Ok(TaskState::ConflictRetry)
                }
            }
        }
    }

    fn mark_merged(&self, task_id: &str, commit_id: Option<String>) -> Result<(), String> {
        let project = self.config.project_path.clone();
        markers::clear_approved(&project, task_id)?;
        markers::clear_conflict_retries(&project, task_id)?;
        markers::write_merged(
            &project,
            task_id,
            &MergedMarker {
                commit_id,
                merged_at: chrono::Utc::now().to_rfc3339(),
            },
        )?;
        Ok(())
    }

    /// Retries exhausted: terminal, human-actionable, never auto-retried
    fn give_up(&self, task: &TaskSpec, conflict_files: Vec<String>) -> Result<TaskState, String> {
        log::error!(
            "[Merge] {} exceeded {} conflict retries; needs human review",
            task.id,
            self.config.max_merge_retries
        );
        markers::write_needs_human_review(
            &self.config.project_path,
            &task.id,
            &NeedsHumanReviewMarker {
                conflict_files,
                escalated_at: chrono::Utc::now().to_rfc3339(),
            },
        )?;
        Ok(TaskState::NeedsHumanReview)
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

    fn setup_repo(temp_dir: &TempDir) -> (OrchestratorConfig, GitWorkspace) {
        let workspace = GitWorkspace::init(temp_dir.path()).unwrap();
        fs::write(temp_dir.path().join("base.txt"), "base\n").unwrap();
        workspace.commit_all("Add base file").unwrap();

        let config = OrchestratorConfig {
            project_path: temp_dir.path().to_path_buf(),
            main_branch: workspace.default_branch_name(),
            // No PM backend, and resolution backend calls fail fast
            backend_timeout_secs: 0,
            ..OrchestratorConfig::default()
        };
        (config, workspace)
    }

    #[test]
    fn test_parse_decision_approve_variants() {
        for raw in [
            "APPROVE: clean implementation",
            "approved - looks solid",
            "LGTM, nice tests",
        ] {
            let outcome = parse_decision(raw);
            assert_eq!(outcome.decision, ReviewDecision::Approve, "input: {raw}");
            assert!(!outcome.defaulted);
        }
    }

    #[test]
    fn test_parse_decision_reject_variants() {
        for raw in [
            "REJECT: no tests at all",
            "Rejected - the diff is empty",
            "deny: wrong branch",
        ] {
            let outcome = parse_decision(raw);
            assert_eq!(outcome.decision, ReviewDecision::Reject, "input: {raw}");
        }
    }

    #[test]
    fn test_parse_decision_unparseable_defaults_to_approve() {
        // An unparseable verdict leaves the task approved, not stuck
        let outcome = parse_decision("The weather is nice today.");
        assert_eq!(outcome.decision, ReviewDecision::Approve);
        assert!(outcome.defaulted);
        assert!(outcome.rationale.contains("defaulting to approve"));
    }

    #[test]
    fn test_parse_decision_multiline_picks_verdict_line() {
        let raw = "Summary of my thinking...\nAPPROVE: solid work overall\nextra notes";
        let outcome = parse_decision(raw);
        assert_eq!(outcome.decision, ReviewDecision::Approve);
        assert_eq!(outcome.rationale, "solid work overall");
    }

    #[tokio::test]
    async fn test_review_without_backend_defaults_to_approve() {
        let temp_dir = TempDir::new().unwrap();
        let (config, _workspace) = setup_repo(&temp_dir);
        let project = config.project_path.clone();
        let engine = ReviewEngine::new(config);

        let task = task("T1", "task/t1");
        markers::write_completed(
            &project,
            "T1",
            &markers::CompletionReport {
                agent_id: "agent-1".to_string(),
                summary: "done".to_string(),
                files_changed: vec![],
                exit_code: None,
                finished_at: chrono::Utc::now().to_rfc3339(),
            },
        )
        .unwrap();

        let outcome = engine.review_task(&task).await.unwrap();
        assert_eq!(outcome.decision, ReviewDecision::Approve);
        assert!(outcome.defaulted);

        let approval = markers::read_approved(&project, "T1").unwrap();
        assert!(approval.defaulted);
        assert!(markers::read_completed(&project, "T1").is_none());
    }

    #[tokio::test]
    async fn test_merge_clean_branch() {
        let temp_dir = TempDir::new().unwrap();
        let (config, workspace) = setup_repo(&temp_dir);
        let main = config.main_branch.clone();
        let project = config.project_path.clone();

        workspace.ensure_branch("task/t1").unwrap();
        workspace.checkout_branch("task/t1").unwrap();
        fs::write(temp_dir.path().join("feature.txt"), "feature\n").unwrap();
        workspace.commit_all("Add feature").unwrap();
        workspace.checkout_branch(&main).unwrap();

        let engine = ReviewEngine::new(config);
        let state = engine.merge_task(&task("T1", "task/t1")).await.unwrap();

        assert_eq!(state, TaskState::Merged);
        assert!(markers::read_merged(&project, "T1").is_some());
        assert!(markers::read_conflict_retries(&project, "T1").is_none());
        assert!(temp_dir.path().join("feature.txt").exists());
    }

    #[tokio::test]
    async fn test_merge_missing_branch_counts_as_merged() {
        let temp_dir = TempDir::new().unwrap();
        let (config, _workspace) = setup_repo(&temp_dir);
        let project = config.project_path.clone();

        let engine = ReviewEngine::new(config);
        let state = engine
            .merge_task(&task("T1", "task/never-created"))
            .await
            .unwrap();

        assert_eq!(state, TaskState::Merged);
        assert!(markers::read_merged(&project, "T1").is_some());
    }

    #[tokio::test]
    async fn test_merge_conflict_exhausts_retries_to_human_review() {
        let temp_dir = TempDir::new().unwrap();
        let (config, workspace) = setup_repo(&temp_dir);
        let main = config.main_branch.clone();
        let project = config.project_path.clone();

        // Diverge base.txt on both branches
        workspace.ensure_branch("task/t1").unwrap();
        workspace.checkout_branch("task/t1").unwrap();
        fs::write(temp_dir.path().join("base.txt"), "branch version\n").unwrap();
        workspace.commit_all("Branch change").unwrap();
        workspace.checkout_branch(&main).unwrap();
        fs::write(temp_dir.path().join("base.txt"), "main version\n").unwrap();
        workspace.commit_all("Main change").unwrap();

        // No backend CLI is available in tests, so every resolution round
        // fails and the retry budget drains
        let engine = ReviewEngine::new(config.clone());
        let spec = task("T1", "task/t1");

        // With max_merge_retries = 2 the second failed resolution is final
        let first = engine.merge_task(&spec).await.unwrap();
        assert_eq!(first, TaskState::ConflictRetry);
        assert_eq!(
            markers::read_conflict_retries(&project, "T1").unwrap().retries,
            1
        );

        let second = engine.merge_task(&spec).await.unwrap();
        assert_eq!(second, TaskState::NeedsHumanReview);

        let marker = markers::read_needs_human_review(&project, "T1").unwrap();
        assert_eq!(marker.conflict_files, vec!["base.txt"]);

        // Terminal: the scheduler now reports needs_human_review and the
        // engine is never called again for this task
        let plan = crate::plan::TaskPlan {
            project_name: "demo".to_string(),
            tasks: vec![spec],
        };
        assert_eq!(
            crate::scheduler::classify(&plan, &project)["T1"],
            crate::scheduler::TaskState::NeedsHumanReview
        );
    }
}
