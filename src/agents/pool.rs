//! Shared agent pool document
//!
//! `pool.json` is the authoritative process table: one entry per agent the
//! orchestrator ever spawned. Entries are status-mutated, never removed, so
//! the pool doubles as an audit log. The pool enforces the invariant that an
//! agent is never simultaneously on standby and holding a current task.

use crate::models::AgentType;
use crate::store::{foreman_dir, locked_update, read_json_or_default, FileResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Starting,
    Standby,
    Assigned,
    Active,
    Stuck,
    Terminated,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AgentStatus::Starting => "starting",
            AgentStatus::Standby => "standby",
            AgentStatus::Assigned => "assigned",
            AgentStatus::Active => "active",
            AgentStatus::Stuck => "stuck",
            AgentStatus::Terminated => "terminated",
        };
        write!(f, "{}", s)
    }
}

/// One worker process in the pool
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentEntry {
    pub id: String,
    pub backend: AgentType,
    /// Role briefing the agent was launched with ("worker", "resolver", ...)
    pub role: String,
    /// Capabilities advertised for dispatch matching
    #[serde(default)]
    pub capabilities: Vec<String>,
    pub status: AgentStatus,
    /// Persistent agents standby-loop between tasks; ephemeral ones exit
    #[serde(default)]
    pub persistent: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_task: Option<String>,
    /// Isolated workspace clone the agent works in
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,
    pub spawned_at: String,
    /// Heartbeat; refreshed by the agent while polling for work
    pub last_seen: String,
}

impl AgentEntry {
    pub fn new(id: impl Into<String>, backend: AgentType, role: impl Into<String>) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            id: id.into(),
            backend,
            role: role.into(),
            capabilities: Vec::new(),
            status: AgentStatus::Starting,
            persistent: false,
            current_task: None,
            workspace: None,
            spawned_at: now.clone(),
            last_seen: now,
        }
    }

    /// Whether the heartbeat is recent enough to trust the entry
    pub fn is_fresh(&self, freshness: Duration) -> bool {
        match chrono::DateTime::parse_from_rfc3339(&self.last_seen) {
            Ok(seen) => {
                let age = chrono::Utc::now().signed_duration_since(seen);
                age.num_seconds() <= freshness.as_secs() as i64
            }
            Err(_) => false,
        }
    }

    /// Whether this entry counts against the parallel-agent cap
    pub fn is_working(&self) -> bool {
        matches!(
            self.status,
            AgentStatus::Starting | AgentStatus::Assigned | AgentStatus::Active
        )
    }
}

/// The complete pool document
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentPoolFile {
    pub agents: Vec<AgentEntry>,
    pub last_updated: String,
}

impl Default for AgentPoolFile {
    fn default() -> Self {
        Self {
            agents: Vec::new(),
            last_updated: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Store wrapper for pool.json
#[derive(Debug, Clone)]
pub struct AgentPool {
    path: PathBuf,
}

impl AgentPool {
    pub fn new(project_path: &Path) -> Self {
        Self {
            path: foreman_dir(project_path).join("pool.json"),
        }
    }

    pub fn read(&self) -> AgentPoolFile {
        read_json_or_default(&self.path)
    }

    /// Register a new agent entry
    pub fn register(&self, entry: AgentEntry) -> FileResult<()> {
        locked_update::<AgentPoolFile, _, _>(&self.path, |pool| {
            pool.agents.push(entry);
            pool.last_updated = chrono::Utc::now().to_rfc3339();
        })
    }

    /// Apply a mutation to one entry. Returns false when the id is unknown.
    pub fn update<F>(&self, agent_id: &str, mutate: F) -> FileResult<bool>
    where
        F: FnOnce(&mut AgentEntry),
    {
        let r = locked_update::<AgentPoolFile, _, _>(&self.path, |pool| {
            let Some(entry) = pool.agents.iter_mut().find(|a| a.id == agent_id) else {
                eprintln!("PROBE update-MISS path={:?} id={} ids={:?} RAW=<<<{}>>>", self.path, agent_id, pool.agents.iter().map(|a| a.id.clone()).collect::<Vec<_>>(), std::fs::read_to_string(&self.path).unwrap_or_else(|e| format!("ERR {}", e)));
                return false;
            };
            mutate(entry);
            // Standby entries never hold a task
            if entry.status == AgentStatus::Standby {
                entry.current_task = None;
            }
            pool.last_updated = chrono::Utc::now().to_rfc3339();
            eprintln!("PROBE update path={:?} id={} -> status={:?} task={:?}", self.path, agent_id, entry.status, entry.current_task);
            true
        });
        r
    }

    pub fn get(&self, agent_id: &str) -> Option<AgentEntry> {
        self.read().agents.into_iter().find(|a| a.id == agent_id)
    }

    /// List entries, optionally filtered by status
    pub fn list(&self, status: Option<AgentStatus>) -> Vec<AgentEntry> {
        self.read()
            .agents
            .into_iter()
            .filter(|a| status.map(|s| a.status == s).unwrap_or(true))
            .collect()
    }

    /// Number of agents currently counting against the parallel cap
    pub fn working_count(&self) -> usize {
        self.read().agents.iter().filter(|a| a.is_working()).count()
    }

    /// Best-effort capability match among fresh standby agents: prefer an
    /// agent advertising a capability that substring-matches the preferred
    /// one, fall back to any fresh standby agent.
    pub fn find_standby(&self, preferred: &str, freshness: Duration) -> Option<AgentEntry> {
        let standby: Vec<AgentEntry> = self
            .read()
            .agents
            .into_iter()
            .filter(|a| a.status == AgentStatus::Standby && a.is_fresh(freshness))
            .collect();

        let preferred_lower = preferred.to_lowercase();
        standby
            .iter()
            .find(|a| {
                a.capabilities.iter().any(|cap| {
                    let cap_lower = cap.to_lowercase();
                    cap_lower.contains(&preferred_lower) || preferred_lower.contains(&cap_lower)
                })
            })
            .cloned()
            .or_else(|| standby.into_iter().next())
    }

    /// Mark stale standby entries terminated so the dispatcher never binds a
    /// dead agent id. Returns the reaped ids.
    pub fn reap_stale_standby(&self, freshness: Duration) -> FileResult<Vec<String>> {
        locked_update::<AgentPoolFile, _, _>(&self.path, |pool| {
            let mut reaped = Vec::new();
            for entry in pool.agents.iter_mut() {
                if entry.status == AgentStatus::Standby && !entry.is_fresh(freshness) {
                    entry.status = AgentStatus::Terminated;
                    entry.current_task = None;
                    reaped.push(entry.id.clone());
                }
            }
            if !reaped.is_empty() {
                pool.last_updated = chrono::Utc::now().to_rfc3339();
            }
            reaped
        })
    }

    /// Mark an entry terminated. Idempotent; unknown ids are a no-op so the
    /// caller can tolerate already-gone agents.
    pub fn mark_terminated(&self, agent_id: &str) -> FileResult<()> {
        self.update(agent_id, |entry| {
            entry.status = AgentStatus::Terminated;
            entry.current_task = None;
        })
        .map(|_| ())
    }
}
