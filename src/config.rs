//! Orchestrator configuration
//!
//! One explicit struct passed into each component at construction. There is
//! no ambient/global configuration state; the binary assembles this from CLI
//! flags and environment variables.

use crate::models::AgentType;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for one orchestrator run
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Root of the shared git workspace
    pub project_path: PathBuf,
    /// Branch the Review & Merge Engine merges into
    pub main_branch: String,
    /// Global cap on concurrently working agents
    pub max_parallel_agents: usize,
    /// Orchestrator loop poll interval
    pub poll_interval_secs: u64,
    /// How long an agent's `ask_pm` waits for a reply
    pub ask_pm_timeout_secs: u64,
    /// How long the PM waits for a human answer to an escalated question
    pub escalation_timeout_secs: u64,
    /// How long a pooled agent waits on standby before self-terminating
    pub standby_timeout_secs: u64,
    /// Running-marker age beyond which a non-pooled agent counts as stuck
    pub stuck_timeout_secs: i64,
    /// Automated merge-conflict resolution attempts per task
    pub max_merge_retries: u32,
    /// Stuck-reclassification cycles per task before it fails
    pub max_stuck_retries: u32,
    /// Backend CLI used for worker agents
    pub agent_backend: AgentType,
    /// Backend CLI used for PM review/answer calls; None applies built-in policy
    pub pm_backend: Option<AgentType>,
    /// Seconds allowed for one PM or conflict-resolution backend invocation
    pub backend_timeout_secs: u64,
    /// Model override passed to backend CLIs
    pub model: Option<String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            project_path: PathBuf::from("."),
            main_branch: "main".to_string(),
            max_parallel_agents: 4,
            poll_interval_secs: 10,
            ask_pm_timeout_secs: 300,
            escalation_timeout_secs: 120,
            standby_timeout_secs: 600,
            stuck_timeout_secs: 1800,
            max_merge_retries: 2,
            max_stuck_retries: 3,
            agent_backend: AgentType::Claude,
            pm_backend: None,
            backend_timeout_secs: 120,
            model: None,
        }
    }
}

impl OrchestratorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn ask_pm_timeout(&self) -> Duration {
        Duration::from_secs(self.ask_pm_timeout_secs)
    }

    pub fn escalation_timeout(&self) -> Duration {
        Duration::from_secs(self.escalation_timeout_secs)
    }

    pub fn standby_timeout(&self) -> Duration {
        Duration::from_secs(self.standby_timeout_secs)
    }
}
