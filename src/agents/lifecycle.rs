//! Agent lifecycle management
//!
//! Spawns, tracks, and reclaims agent processes. Two worker shapes exist:
//! ephemeral agents run exactly one task and exit; persistent agents register
//! into the pool and standby-loop between assignments. Each agent gets an
//! isolated worktree of the shared repository on its own branch.
//!
//! The manager owns the authoritative child-process table for this
//! orchestrator instance; the pool document is the cross-process view.

use crate::agents::backend::{self, BackendInvocation};
use crate::agents::pool::{AgentEntry, AgentPool, AgentStatus};
use crate::assignments::{Assignment, AssignmentsStore};
use crate::config::OrchestratorConfig;
use crate::git::GitWorkspace;
use crate::plan::{TaskPlan, TaskSpec};
use crate::store::markers::{self, CompletionReport, RetryCounter};
use crate::store::{self, workspaces_dir};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{Child, Stdio};

/// An agent whose process exit was observed this cycle
#[derive(Debug, Clone)]
pub struct ReapedAgent {
    pub agent_id: String,
    pub task_id: Option<String>,
    pub exit_code: i32,
}

/// Supervises agent processes, workspaces, and pool state
pub struct AgentLifecycleManager {
    config: OrchestratorConfig,
    pool: AgentPool,
    assignments: AssignmentsStore,
    /// Child processes owned by this orchestrator instance
    children: HashMap<String, Child>,
}

impl AgentLifecycleManager {
    pub fn new(config: OrchestratorConfig) -> Self {
        let pool = AgentPool::new(&config.project_path);
        let assignments = AssignmentsStore::new(&config.project_path);
        Self {
            config,
            pool,
            assignments,
            children: HashMap::new(),
        }
    }

    pub fn pool(&self) -> &AgentPool {
        &self.pool
    }

    pub fn assignments(&self) -> &AssignmentsStore {
        &self.assignments
    }

    /// Agents currently counting against the parallel cap
    pub fn working_count(&self) -> usize {
        self.pool.working_count()
    }

    fn new_agent_id() -> String {
        format!(
            "agent-{}",
            &uuid::Uuid::new_v4().to_string().replace('-', "")[..8]
        )
    }

    /// Create the isolated worktree workspace for an agent
    fn create_workspace(&self, agent_id: &str, branch: &str) -> Result<PathBuf, String> {
        let workspace_path = workspaces_dir(&self.config.project_path).join(agent_id);
        store::ensure_dir(workspaces_dir(&self.config.project_path).as_path())?;

        let git = GitWorkspace::open(&self.config.project_path)
            .map_err(|e| format!("Failed to open repository: {}", e))?;
        git.add_worktree(branch, &workspace_path)
            .map_err(|e| format!("Failed to create worktree for {}: {}", branch, e))?;

        Ok(workspace_path)
    }

    fn launch(&mut self, agent_id: &str, workspace: &PathBuf, briefing: String) -> Result<(), String> {
        let invocation = BackendInvocation {
            backend: self.config.agent_backend,
            workspace: workspace.clone(),
            prompt: briefing,
            model: self.config.model.clone(),
        };

        let mut cmd = backend::build_command(&invocation).map_err(|e| e.to_string())?;
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        let child = cmd
            .spawn()
            .map_err(|e| format!("Failed to spawn {}: {}", self.config.agent_backend, e))?;

        self.children.insert(agent_id.to_string(), child);
        Ok(())
    }

    /// Spawn a persistent agent that standby-loops for assignments
    pub fn spawn(
        &mut self,
        role: &str,
        backend_type: crate::models::AgentType,
        capabilities: &[String],
    ) -> Result<String, String> {
        let agent_id = Self::new_agent_id();
        let branch = format!("agent/{}", agent_id);
        let workspace = self.create_workspace(&agent_id, &branch)?;

        let briefing = persistent_briefing(&agent_id, role, capabilities);
        let invocation = BackendInvocation {
            backend: backend_type,
            workspace: workspace.clone(),
            prompt: briefing,
            model: self.config.model.clone(),
        };

        let mut cmd = backend::build_command(&invocation).map_err(|e| e.to_string())?;
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        let child = cmd
            .spawn()
            .map_err(|e| format!("Failed to spawn {}: {}", backend_type, e))?;
        self.children.insert(agent_id.clone(), child);

        let entry = AgentEntry {
            capabilities: capabilities.to_vec(),
            persistent: true,
            workspace: Some(workspace.to_string_lossy().to_string()),
            ..AgentEntry::new(agent_id.as_str(), backend_type, role)
        };
        self.pool.register(entry)?;

        log::info!(
            "[Lifecycle] Spawned persistent agent {} (role {}, capabilities {:?})",
            agent_id,
            role,
            capabilities
        );
        Ok(agent_id)
    }

    /// Spawn an ephemeral agent bound to one task
    pub fn spawn_for_task(&mut self, task: &TaskSpec) -> Result<String, String> {
        let agent_id = Self::new_agent_id();
        let workspace = self.create_workspace(&agent_id, &task.branch)?;

        let briefing = task_briefing(&agent_id, task);
        self.launch(&agent_id, &workspace, briefing)?;

        let entry = AgentEntry {
            capabilities: vec![task.agent.clone()],
            status: AgentStatus::Active,
            current_task: Some(task.id.clone()),
            workspace: Some(workspace.to_string_lossy().to_string()),
            ..AgentEntry::new(agent_id.as_str(), self.config.agent_backend, "worker")
        };
        self.pool.register(entry)?;

        log::info!(
            "[Lifecycle] Spawned ephemeral agent {} for task {} on {}",
            agent_id,
            task.id,
            task.branch
        );
        Ok(agent_id)
    }

    /// Bind a task to a pooled agent. Fails unless the agent is on standby
    /// (or still starting up).
    pub fn assign(
        &mut self,
        agent_id: &str,
        task_id: &str,
        branch: &str,
        description: &str,
    ) -> Result<String, String> {
        let entry = self
            .pool
            .get(agent_id)
            .ok_or_else(|| format!("Agent '{}' not found in pool", agent_id))?;

        if !matches!(entry.status, AgentStatus::Standby | AgentStatus::Starting) {
            return Err(format!(
                "Agent '{}' is {} and cannot take an assignment",
                agent_id, entry.status
            ));
        }

        let assignment = Assignment::new(agent_id, task_id, branch, description);
        let assignment_id = self.assignments.append(assignment)?;

        self.pool.update(agent_id, |e| {
            e.status = AgentStatus::Assigned;
            e.current_task = Some(task_id.to_string());
        })?;

        log::info!(
            "[Lifecycle] Assigned task {} to pooled agent {}",
            task_id,
            agent_id
        );
        Ok(assignment_id)
    }

    /// Best-effort terminate: signal the process if we own it, and mark the
    /// pool entry terminated regardless (the process may already be gone).
    pub fn terminate(&mut self, agent_id: &str) -> Result<(), String> {
        if let Some(mut child) = self.children.remove(agent_id) {
            if let Err(e) = child.kill() {
                log::debug!("[Lifecycle] Kill {} failed (already dead?): {}", agent_id, e);
            }
            let _ = child.wait();
        }

        self.pool.mark_terminated(agent_id)?;
        log::info!("[Lifecycle] Terminated agent {}", agent_id);
        Ok(())
    }

    /// Terminate every agent this instance knows about. Destructive enough
    /// to require explicit confirmation.
    pub fn terminate_all(&mut self, confirm: bool) -> Result<usize, String> {
        if !confirm {
            return Err("terminate_all requires confirm=true".to_string());
        }

        let ids: Vec<String> = self.children.keys().cloned().collect();
        let count = ids.len();
        for agent_id in ids {
            if let Err(e) = self.terminate(&agent_id) {
                log::warn!("[Lifecycle] Failed to terminate {}: {}", agent_id, e);
            }
        }
        Ok(count)
    }

    /// Poll child processes. An exited agent with a bound task and no
    /// completion report still yields a completed marker: "agent exits"
    /// counts as completion, with the exit code recorded.
    pub fn reap_exited(&mut self) -> Vec<ReapedAgent> {
        let mut exited = Vec::new();

        for (agent_id, child) in self.children.iter_mut() {
            match child.try_wait() {
                Ok(Some(status)) => {
                    exited.push((agent_id.clone(), status.code().unwrap_or(-1)));
                }
                Ok(None) => {}
                Err(e) => {
                    log::error!("[Lifecycle] Error checking agent {}: {}", agent_id, e);
                    exited.push((agent_id.clone(), -1));
                }
            }
        }

        let mut reaped = Vec::new();
        let project = self.config.project_path.clone();

        for (agent_id, exit_code) in exited {
            self.children.remove(&agent_id);

            let entry = self.pool.get(&agent_id);
            let task_id = entry.as_ref().and_then(|e| e.current_task.clone());

            if let Some(ref task_id) = task_id {
                if markers::read_completed(&project, task_id).is_none()
                    && markers::read_running(&project, task_id).is_some()
                {
                    log::warn!(
                        "[Lifecycle] Agent {} exited (code {}) without reporting; marking task {} completed",
                        agent_id,
                        exit_code,
                        task_id
                    );
                    if let Err(e) = markers::write_completed(
                        &project,
                        task_id,
                        &CompletionReport {
                            agent_id: agent_id.clone(),
                            summary: String::new(),
                            files_changed: Vec::new(),
                            exit_code: Some(exit_code),
                            finished_at: chrono::Utc::now().to_rfc3339(),
                        },
                    ) {
                        log::error!("[Lifecycle] Failed to write completion marker: {}", e);
                    }
                }
            }

            if let Err(e) = self.pool.mark_terminated(&agent_id) {
                log::warn!("[Lifecycle] Failed to mark {} terminated: {}", agent_id, e);
            }

            reaped.push(ReapedAgent {
                agent_id,
                task_id,
                exit_code,
            });
        }

        reaped
    }

    /// Reclassify overdue tasks as stuck and make them dispatchable again,
    /// bounded by the stuck-retry cap. A task whose binding is a live pooled
    /// persistent agent is exempt.
    pub fn detect_stuck(&mut self, plan: &TaskPlan) -> Vec<String> {
        let project = self.config.project_path.clone();
        let mut reclassified = Vec::new();

        for task in &plan.tasks {
            let Some(running) = markers::read_running(&project, &task.id) else {
                continue;
            };
            if markers::read_completed(&project, &task.id).is_some() {
                continue;
            }

            let age_secs = match chrono::DateTime::parse_from_rfc3339(&running.started_at) {
                Ok(started) => chrono::Utc::now()
                    .signed_duration_since(started)
                    .num_seconds(),
                // An unreadable timestamp is not evidence of a hang
                Err(_) => 0,
            };
            if age_secs <= self.config.stuck_timeout_secs {
                continue;
            }

            let entry = self.pool.get(&running.agent_id);
            let pooled_live = entry
                .as_ref()
                .map(|e| {
                    e.persistent
                        && matches!(
                            e.status,
                            AgentStatus::Active | AgentStatus::Assigned | AgentStatus::Standby
                        )
                })
                .unwrap_or(false);
            if pooled_live {
                continue;
            }

            log::warn!(
                "[Lifecycle] Task {} stuck ({}s > {}s), evicting agent {}",
                task.id,
                age_secs,
                self.config.stuck_timeout_secs,
                running.agent_id
            );

            if let Some(mut child) = self.children.remove(&running.agent_id) {
                let _ = child.kill();
                let _ = child.wait();
            }
            if let Err(e) = self.pool.update(&running.agent_id, |e| {
                e.status = AgentStatus::Stuck;
                e.current_task = None;
            }) {
                log::warn!("[Lifecycle] Failed to mark agent stuck: {}", e);
            }

            let mut counter = markers::read_stuck_retries(&project, &task.id).unwrap_or(
                RetryCounter {
                    retries: 0,
                    max: self.config.max_stuck_retries,
                },
            );
            counter.retries += 1;

            if let Err(e) = markers::clear_running(&project, &task.id) {
                log::error!("[Lifecycle] Failed to clear running marker: {}", e);
                continue;
            }
            if let Err(e) = markers::write_stuck_retries(&project, &task.id, &counter) {
                log::error!("[Lifecycle] Failed to persist stuck counter: {}", e);
            }

            if counter.retries > counter.max {
                log::error!(
                    "[Lifecycle] Task {} exceeded {} stuck retries; marking failed",
                    task.id,
                    counter.max
                );
                if let Err(e) = markers::write_failed(
                    &project,
                    &task.id,
                    &markers::FailedMarker {
                        reason: format!(
                            "Timed out {} times (limit {})",
                            counter.retries, counter.max
                        ),
                        failed_at: chrono::Utc::now().to_rfc3339(),
                    },
                ) {
                    log::error!("[Lifecycle] Failed to write failed marker: {}", e);
                }
            }

            reclassified.push(task.id.clone());
        }

        reclassified
    }

    /// Startup recovery: running markers from a previous instance have no
    /// live process here, so clear them and let the tasks re-dispatch.
    pub fn recover_stale_running(&mut self, plan: &TaskPlan) -> Vec<String> {
        let project = self.config.project_path.clone();
        let mut recovered = Vec::new();

        for task in &plan.tasks {
            let Some(running) = markers::read_running(&project, &task.id) else {
                continue;
            };
            if markers::read_completed(&project, &task.id).is_some() {
                continue;
            }
            if self.children.contains_key(&running.agent_id) {
                continue;
            }

            log::info!(
                "[Lifecycle] Recovering task {} (stale binding to {})",
                task.id,
                running.agent_id
            );
            if let Err(e) = markers::clear_running(&project, &task.id) {
                log::error!("[Lifecycle] Recovery failed for {}: {}", task.id, e);
                continue;
            }
            let _ = self.pool.mark_terminated(&running.agent_id);
            recovered.push(task.id.clone());
        }

        recovered
    }

    /// Reap standby pool entries whose heartbeat went stale
    pub fn reap_stale_standby(&self) -> Vec<String> {
        match self.pool.reap_stale_standby(self.config.standby_timeout()) {
            Ok(reaped) => {
                for agent_id in &reaped {
                    log::info!("[Lifecycle] Reaped stale standby agent {}", agent_id);
                }
                reaped
            }
            Err(e) => {
                log::warn!("[Lifecycle] Failed to reap stale standby agents: {}", e);
                Vec::new()
            }
        }
    }
}

/// Briefing for an ephemeral task agent
fn task_briefing(agent_id: &str, task: &TaskSpec) -> String {
    format!(
        "# Task {id}: {description}\n\n\
         You are agent `{agent}` working in an isolated checkout on branch `{branch}`.\n\
         Task type: {task_type}.\n\n\
         ## Coordination protocol\n\
         All coordination happens through JSON documents under `.foreman/` in the\n\
         main project (one level above your checkout). Only the project manager\n\
         (`pm`) may be messaged; never address other agents.\n\
         - To ask the PM a question, append a message to `outbox.json` and poll\n\
           `inbox.json` for a reply correlated by `replyTo`.\n\
         - Commit your work to your branch as you go.\n\
         - When finished, append a `task_complete` message for task `{id}` to\n\
           `outbox.json` with a one-paragraph summary and the files you changed,\n\
           then exit.\n",
        id = task.id,
        description = task.description,
        agent = agent_id,
        branch = task.branch,
        task_type = task.task_type,
    )
}

/// Briefing for a persistent pooled agent
fn persistent_briefing(agent_id: &str, role: &str, capabilities: &[String]) -> String {
    format!(
        "# Standby worker `{agent}`\n\n\
         You are a persistent {role} agent with capabilities: {caps}.\n\n\
         ## Coordination protocol\n\
         Register on standby in `.foreman/pool.json` and poll\n\
         `.foreman/assignments.json` for assignments addressed to your id,\n\
         refreshing your `lastSeen` heartbeat as you wait. When an assignment\n\
         arrives, accept it, complete the described work on the given branch,\n\
         report completion via `outbox.json`, and return to standby. If no\n\
         assignment arrives within the standby timeout, mark yourself\n\
         terminated in the pool and exit. Only the project manager (`pm`) may\n\
         be messaged.\n",
        agent = agent_id,
        role = role,
        caps = if capabilities.is_empty() {
            "none declared".to_string()
        } else {
            capabilities.join(", ")
        },
    )
}
