//! Orchestrator loop
//!
//! Single-threaded cooperative driver. Each cycle performs one fixed-order
//! pass - reap exits, drain completions, review, merge, dispatch, stuck
//! detection, message drain, snapshot - then sleeps the poll interval.
//! Nothing in a cycle blocks indefinitely; the only waits are the bounded
//! sub-waits of the messaging protocol. The loop always converges: every
//! task ends merged, failed, or needs-human-review, and the run reports
//! which.

use crate::agents::AgentLifecycleManager;
use crate::config::OrchestratorConfig;
use crate::dispatcher;
use crate::mailbox::{Mailbox, MessageKind, MessageStatus, PM_ADDRESS};
use crate::models::{Project, ProjectStatus};
use crate::pm::PmEngine;
use crate::plan::TaskPlan;
use crate::review::ReviewEngine;
use crate::scheduler::{self, CompletionSummary, TaskState};
use crate::store::markers::{self, CompletionReport};
use crate::store::snapshot::{save_snapshot, SchedulerSnapshot};
use crate::store::{self, foreman_dir};

/// Final report for a finished (or interrupted) run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub project_name: String,
    pub completed: bool,
    pub summary: CompletionSummary,
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.completed && self.summary.is_full_success() {
            write!(
                f,
                "Project '{}' complete: all {} task(s) merged",
                self.project_name,
                self.summary.merged.len()
            )
        } else {
            write!(
                f,
                "Project '{}': {} merged, {} failed ({}), {} need human review ({}), {} unfinished",
                self.project_name,
                self.summary.merged.len(),
                self.summary.failed.len(),
                self.summary.failed.join(", "),
                self.summary.needs_human_review.len(),
                self.summary.needs_human_review.join(", "),
                self.summary.unfinished.len(),
            )
        }
    }
}

/// The orchestration core driver
pub struct Orchestrator {
    config: OrchestratorConfig,
    plan: TaskPlan,
    lifecycle: AgentLifecycleManager,
    review: ReviewEngine,
    pm: PmEngine,
    mailbox: Mailbox,
}

impl Orchestrator {
    /// Validate the plan, initialize the store, and record the project.
    /// A structurally invalid plan halts here - operator intervention is
    /// required before any scheduling happens.
    pub fn new(config: OrchestratorConfig, plan: TaskPlan) -> Result<Self, String> {
        plan.validate().map_err(|e| e.to_string())?;

        store::init_foreman_dir(&config.project_path)?;

        let dir = foreman_dir(&config.project_path);
        let project_path = dir.join("project.json");
        if !project_path.exists() {
            let project =
                Project::new(plan.project_name.as_str(), format!("{} tasks", plan.tasks.len()));
            store::write_json(&project_path, &project)?;
        }
        store::write_json(&dir.join("plan.json"), &plan)?;

        let lifecycle = AgentLifecycleManager::new(config.clone());
        let review = ReviewEngine::new(config.clone());
        let pm = PmEngine::new(config.clone());
        let mailbox = Mailbox::new(&config.project_path);

        Ok(Self {
            config,
            plan,
            lifecycle,
            review,
            pm,
            mailbox,
        })
    }

    pub fn plan(&self) -> &TaskPlan {
        &self.plan
    }

    /// Startup recovery: clear bindings left behind by a previous instance
    pub fn recover(&mut self) {
        let recovered = self.lifecycle.recover_stale_running(&self.plan);
        if !recovered.is_empty() {
            log::info!(
                "[Orchestrator] Recovered {} stale task binding(s): {:?}",
                recovered.len(),
                recovered
            );
        }
    }

    /// One fixed-order pass. Local failures are absorbed and logged; only
    /// store-level write failures propagate.
    pub async fn cycle(&mut self) -> Result<(), String> {
        // 1. Observe process exits
        for reaped in self.lifecycle.reap_exited() {
            log::info!(
                "[Orchestrator] Agent {} exited (code {}, task {:?})",
                reaped.agent_id,
                reaped.exit_code,
                reaped.task_id
            );
        }

        // 2. Drain completion signals
        self.drain_completions();

        // 3. Review completed work, then merge what the PM approved
        self.review_and_merge().await;

        // 4. Dispatch ready tasks within the parallel cap
        dispatcher::dispatch_ready(&self.config, &self.plan, &mut self.lifecycle);

        // 5. Stuck detection
        let reclassified = self.lifecycle.detect_stuck(&self.plan);
        if !reclassified.is_empty() {
            log::warn!(
                "[Orchestrator] Reclassified stuck task(s): {:?}",
                reclassified
            );
        }

        // 6. Route questions and notifications
        self.drain_messages().await;

        // 7. Forget dead standby agents
        self.lifecycle.reap_stale_standby();

        // 8. Persist the scheduler partition for resume
        let states = scheduler::classify(&self.plan, &self.config.project_path);
        save_snapshot(
            &self.config.project_path,
            &SchedulerSnapshot::from_states(states),
        )?;

        Ok(())
    }

    fn drain_completions(&mut self) {
        let project = self.config.project_path.clone();

        for message in self.mailbox.pending_outbox() {
            if message.kind != MessageKind::TaskComplete {
                continue;
            }

            let handled = (|| -> Result<(), String> {
                let Some(task_id) = message.task_id.clone() else {
                    log::warn!(
                        "[Orchestrator] Completion from {} names no task",
                        message.from
                    );
                    return Ok(());
                };
                if self.plan.get(&task_id).is_none() {
                    log::warn!(
                        "[Orchestrator] Completion for unknown task '{}' from {}",
                        task_id,
                        message.from
                    );
                    return Ok(());
                }
                if markers::read_completed(&project, &task_id).is_some() {
                    return Ok(());
                }

                log::info!(
                    "[Orchestrator] Task {} completed by {}: {}",
                    task_id,
                    message.from,
                    message.body
                );
                markers::write_completed(
                    &project,
                    &task_id,
                    &CompletionReport {
                        agent_id: message.from.clone(),
                        summary: message.body.clone(),
                        files_changed: message.files_changed.clone(),
                        exit_code: None,
                        finished_at: chrono::Utc::now().to_rfc3339(),
                    },
                )?;

                // The agent no longer holds the task
                let _ = self.lifecycle.pool().update(&message.from, |e| {
                    if e.current_task.as_deref() == Some(task_id.as_str()) {
                        e.current_task = None;
                    }
                });
                Ok(())
            })();

            if let Err(e) = handled {
                log::error!("[Orchestrator] Failed to record completion: {}", e);
                continue;
            }
            if let Err(e) = self
                .mailbox
                .set_outbox_status(&message.id, MessageStatus::Handled)
            {
                log::warn!("[Orchestrator] Failed to mark completion handled: {}", e);
            }
        }
    }

    async fn review_and_merge(&mut self) {
        let project = self.config.project_path.clone();

        let states = scheduler::classify(&self.plan, &project);
        for task in &self.plan.tasks {
            if states.get(&task.id) != Some(&TaskState::Completed) {
                continue;
            }
            if let Err(e) = self.review.review_task(task).await {
                log::error!("[Orchestrator] Review failed for {}: {}", task.id, e);
            }
        }

        // Re-classify: approvals from this pass are merge candidates now
        let states = scheduler::classify(&self.plan, &project);
        for task in &self.plan.tasks {
            if !matches!(
                states.get(&task.id),
                Some(&TaskState::Approved) | Some(&TaskState::ConflictRetry)
            ) {
                continue;
            }
            match self.review.merge_task(task).await {
                Ok(state) => {
                    log::info!("[Orchestrator] Merge pass left {} {}", task.id, state)
                }
                Err(e) => log::error!("[Orchestrator] Merge failed for {}: {}", task.id, e),
            }
        }
    }

    async fn drain_messages(&mut self) {
        for message in self.mailbox.pending_outbox() {
            // Escalations to the user stay pending until a human answers
            if message.from == PM_ADDRESS {
                continue;
            }

            // Star topology: agents may only address the PM
            if message.to != PM_ADDRESS {
                log::warn!(
                    "[Orchestrator] Rejecting message {} from {} to '{}' (agents may only address the PM)",
                    message.id,
                    message.from,
                    message.to
                );
                if let Err(e) = self
                    .mailbox
                    .set_outbox_status(&message.id, MessageStatus::Rejected)
                {
                    log::warn!("[Orchestrator] Failed to reject message: {}", e);
                }
                continue;
            }

            match message.kind {
                MessageKind::Question => {
                    if let Err(e) = self.pm.handle_question(&message).await {
                        log::error!(
                            "[Orchestrator] Failed to handle question {}: {}",
                            message.id,
                            e
                        );
                    }
                }
                MessageKind::Notification | MessageKind::StatusUpdate => {
                    log::info!(
                        "[Orchestrator] {} from {}: {}",
                        if message.kind == MessageKind::Notification {
                            "Notification"
                        } else {
                            "Status"
                        },
                        message.from,
                        message.body
                    );
                    if let Err(e) = self
                        .mailbox
                        .set_outbox_status(&message.id, MessageStatus::Delivered)
                    {
                        log::warn!("[Orchestrator] Failed to mark delivered: {}", e);
                    }
                }
                // Handled by drain_completions
                MessageKind::TaskComplete => {}
            }
        }
    }

    fn summary(&self, completed: bool) -> RunSummary {
        RunSummary {
            project_name: self.plan.project_name.clone(),
            completed,
            summary: scheduler::completion_summary(&self.plan, &self.config.project_path),
        }
    }

    fn finalize(&self) -> Result<RunSummary, String> {
        let dir = foreman_dir(&self.config.project_path);
        let project_file = dir.join("project.json");
        let mut project: Project = store::read_json_or_default::<Option<Project>>(&project_file)
            .unwrap_or_else(|| Project::new(self.plan.project_name.as_str(), ""));
        project.status = ProjectStatus::Completed;
        store::write_json(&project_file, &project)?;

        self.cleanup_workspaces();

        let summary = self.summary(true);
        log::info!("[Orchestrator] {}", summary);
        Ok(summary)
    }

    /// Best-effort removal of workspaces left by terminated agents. Work
    /// lives on branches, so the checkouts are disposable.
    fn cleanup_workspaces(&self) {
        let Ok(git) = crate::git::GitWorkspace::open(&self.config.project_path) else {
            return;
        };

        for entry in self
            .lifecycle
            .pool()
            .list(Some(crate::agents::AgentStatus::Terminated))
        {
            let Some(workspace) = entry.workspace else {
                continue;
            };
            let path = std::path::PathBuf::from(workspace);
            if path.exists() {
                if let Err(e) = git.remove_worktree(&path) {
                    log::debug!("[Orchestrator] Workspace cleanup for {}: {}", entry.id, e);
                }
            }
        }

        match git.prune_orphaned_worktrees() {
            Ok(count) if count > 0 => {
                log::info!("[Orchestrator] Pruned {} orphaned worktree(s)", count)
            }
            Ok(_) => {}
            Err(e) => log::debug!("[Orchestrator] Worktree prune: {}", e),
        }
    }

    /// Run cycles until every task is terminal (or the process is
    /// interrupted, in which case state is persisted for resume first).
    pub async fn run(&mut self) -> Result<RunSummary, String> {
        log::info!(
            "[Orchestrator] Starting project '{}' ({} tasks, {} max agents, {}s poll)",
            self.plan.project_name,
            self.plan.tasks.len(),
            self.config.max_parallel_agents,
            self.config.poll_interval_secs
        );

        self.recover();

        loop {
            self.cycle().await?;

            if scheduler::all_terminal(&self.plan, &self.config.project_path) {
                return self.finalize();
            }

            if scheduler::stalled(&self.plan, &self.config.project_path) {
                log::error!(
                    "[Orchestrator] No further progress possible; remaining tasks are \
                     blocked behind failed or human-review dependencies"
                );
                return self.finalize();
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval()) => {}
                _ = tokio::signal::ctrl_c() => {
                    log::warn!("[Orchestrator] Interrupted; persisting scheduler state");
                    let states = scheduler::classify(&self.plan, &self.config.project_path);
                    save_snapshot(
                        &self.config.project_path,
                        &SchedulerSnapshot::from_states(states),
                    )?;
                    let summary = self.summary(false);
                    log::info!("[Orchestrator] {}", summary);
                    return Ok(summary);
                }
            }
        }
    }
}
