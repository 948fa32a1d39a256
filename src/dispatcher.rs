//! Dispatcher
//!
//! Binds ready tasks to agents once per orchestrator cycle, respecting the
//! global parallel-agent cap. Pooled standby agents are preferred (matched
//! best-effort against the task's declared agent capability); otherwise a
//! fresh ephemeral agent is spawned. Binding writes the task's running
//! marker, which is what enforces the single-assignment invariant.

use crate::agents::AgentLifecycleManager;
use crate::config::OrchestratorConfig;
use crate::plan::TaskPlan;
use crate::scheduler;
use crate::store::markers::{self, RunningMarker};

/// Outcome of one dispatch pass
#[derive(Debug, Clone, Default)]
pub struct DispatchReport {
    /// Tasks bound to pooled agents
    pub assigned: Vec<String>,
    /// Tasks bound to freshly spawned ephemeral agents
    pub spawned: Vec<String>,
    /// Ready tasks left waiting because the cap was reached
    pub deferred: Vec<String>,
}

impl DispatchReport {
    pub fn bound_count(&self) -> usize {
        self.assigned.len() + self.spawned.len()
    }
}

/// One dispatch pass over the current ready set
pub fn dispatch_ready(
    config: &OrchestratorConfig,
    plan: &TaskPlan,
    lifecycle: &mut AgentLifecycleManager,
) -> DispatchReport {
    let project = config.project_path.clone();
    let ready = scheduler::ready_set(plan, &project);
    let mut report = DispatchReport::default();

    if ready.is_empty() {
        return report;
    }

    let mut working = lifecycle.working_count();

    for task_id in ready {
        if working >= config.max_parallel_agents {
            log::debug!(
                "[Dispatcher] Parallel cap ({}) reached, {} waits for next cycle",
                config.max_parallel_agents,
                task_id
            );
            report.deferred.push(task_id);
            continue;
        }

        let Some(task) = plan.get(&task_id) else {
            continue;
        };

        // Single-assignment guard: a concurrent binding would have left a
        // running marker behind
        if markers::read_running(&project, &task.id).is_some() {
            continue;
        }

        // Prefer a fresh standby agent with a capability match
        let __fs = lifecycle
            .pool()
            .find_standby(&task.agent, config.standby_timeout());
        eprintln!("PROBE dispatch task={} agent_pref={} find_standby={:?} working={}", task.id, task.agent, __fs.as_ref().map(|a| a.id.clone()), working);
        for a in lifecycle.pool().list(None) { eprintln!("   POOL id={} status={:?} fresh={} caps={:?} task={:?}", a.id, a.status, a.is_fresh(config.standby_timeout()), a.capabilities, a.current_task); }
        { let p = crate::store::foreman_dir(&project).join("pool.json"); eprintln!("   RAWPATH {:?}\n{}", p, std::fs::read_to_string(&p).unwrap_or_default()); }
        let bound = match __fs
        {
            Some(agent) => {
                match lifecycle.assign(&agent.id, &task.id, &task.branch, &task.description) {
                    Ok(_) => {
                        report.assigned.push(task.id.clone());
                        Some(agent.id)
                    }
                    Err(e) => {
                        log::warn!(
                            "[Dispatcher] Failed to assign {} to pooled agent {}: {}",
                            task.id,
                            agent.id,
                            e
                        );
                        None
                    }
                }
            }
            None => match lifecycle.spawn_for_task(task) {
                Ok(agent_id) => {
                    report.spawned.push(task.id.clone());
                    Some(agent_id)
                }
                Err(e) => {
                    // Per-task failure; keep dispatching the rest
                    log::error!("[Dispatcher] Failed to spawn agent for {}: {}", task.id, e);
                    None
                }
            },
        };

        if let Some(agent_id) = bound {
            if let Err(e) =
                markers::write_running(&project, &task.id, &RunningMarker::new(agent_id.as_str()))
            {
                log::error!(
                    "[Dispatcher] Failed to write running marker for {}: {}",
                    task.id,
                    e
                );
            }
            working += 1;
        }
    }

    if report.bound_count() > 0 {
        log::info!(
            "[Dispatcher] Bound {} task(s) ({} pooled, {} spawned), {} deferred",
            report.bound_count(),
            report.assigned.len(),
            report.spawned.len(),
            report.deferred.len()
        );
    }

    report
}
