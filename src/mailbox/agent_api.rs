//! Agent-facing message API
//!
//! `AgentClient` is the library surface agent processes use to talk to the
//! PM. Every blocking call is a bounded poll loop: the deadline is explicit
//! and the caller always gets a deterministic timeout result instead of an
//! indefinite block. These calls run inside agent processes, never inside the
//! orchestrator loop, so plain thread sleeps are fine.

use crate::agents::pool::{AgentEntry, AgentPool, AgentStatus};
use crate::assignments::{Assignment, AssignmentsStore};
use crate::config::OrchestratorConfig;
use crate::mailbox::{Mailbox, Message, MessageKind, MessagePriority};
use crate::models::AgentType;
use crate::store::FileResult;
use std::path::Path;
use std::time::{Duration, Instant};

/// Result of a blocking `ask_pm` call
#[derive(Debug, Clone)]
pub enum PmReply {
    /// The PM's answer
    Answer(Message),
    /// Deadline elapsed; carries the explicit proceed-on-your-own notice
    Timeout(String),
}

/// Client handle for one agent process
pub struct AgentClient {
    agent_id: String,
    mailbox: Mailbox,
    pool: AgentPool,
    assignments: AssignmentsStore,
    ask_timeout: Duration,
    standby_timeout: Duration,
    poll_interval: Duration,
}

impl AgentClient {
    pub fn new(project_path: &Path, agent_id: &str, config: &OrchestratorConfig) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            mailbox: Mailbox::new(project_path),
            pool: AgentPool::new(project_path),
            assignments: AssignmentsStore::new(project_path),
            ask_timeout: config.ask_pm_timeout(),
            standby_timeout: config.standby_timeout(),
            poll_interval: Duration::from_secs(2),
        }
    }

    /// Override the poll cadence (tests use short intervals)
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Blocking request/response to the PM. Appends a pending question to the
    /// outbox, then polls the inbox for the correlated reply until the
    /// deadline.
    pub fn ask_pm(
        &self,
        question: &str,
        context: Option<String>,
        priority: MessagePriority,
    ) -> FileResult<PmReply> {
        let message_id = self.mailbox.post_outbox(Message::question(
            &self.agent_id,
            question,
            context,
            priority,
        ))?;

        log::info!(
            "[AgentClient] {} asked PM ({}), waiting up to {}s",
            self.agent_id,
            message_id,
            self.ask_timeout.as_secs()
        );

        let deadline = Instant::now() + self.ask_timeout;
        loop {
            if let Some(reply) = self.mailbox.find_reply(&message_id) {
                return Ok(PmReply::Answer(reply));
            }
            if Instant::now() >= deadline {
                return Ok(PmReply::Timeout(format!(
                    "No response from PM within {}s - proceed using your best judgment.",
                    self.ask_timeout.as_secs()
                )));
            }
            std::thread::sleep(self.poll_interval);
        }
    }

    /// Fire-and-forget progress update
    pub fn send_status(
        &self,
        status: &str,
        message: &str,
        progress: Option<u32>,
    ) -> FileResult<String> {
        let body = format!("[{}] {}", status, message);
        self.mailbox
            .post_outbox(Message::status_update(&self.agent_id, &body, progress))
    }

    /// Fire-and-forget notification to the PM
    pub fn notify_pm(&self, message: &str, kind: MessageKind) -> FileResult<String> {
        let mut notification = Message::notification(&self.agent_id, super::PM_ADDRESS, message);
        notification.kind = kind;
        self.mailbox.post_outbox(notification)
    }

    /// Inbox entries addressed to this agent (broadcasts included)
    pub fn get_messages(&self, unread_only: bool) -> FileResult<Vec<Message>> {
        self.mailbox.inbox_for(&self.agent_id, unread_only)
    }

    /// Report a task finished
    pub fn task_complete(
        &self,
        task_id: &str,
        summary: &str,
        files_changed: Vec<String>,
    ) -> FileResult<String> {
        self.mailbox.post_outbox(Message::task_complete(
            &self.agent_id,
            task_id,
            summary,
            files_changed,
        ))
    }

    /// Enter standby and wait for an assignment. Advertises capabilities,
    /// heartbeats while polling, and accepts the first assignment addressed
    /// to this agent. On deadline the agent marks itself terminated in the
    /// pool and gets None back - the caller is expected to exit.
    pub fn await_assignment(&self, capabilities: &[String]) -> FileResult<Option<Assignment>> {
        self.enter_standby(capabilities)?;

        log::info!(
            "[AgentClient] {} on standby (capabilities {:?}), waiting up to {}s",
            self.agent_id,
            capabilities,
            self.standby_timeout.as_secs()
        );

        let deadline = Instant::now() + self.standby_timeout;
        loop {
            if let Some(pending) = self.assignments.pending_for(&self.agent_id).into_iter().next()
            {
                if let Some(accepted) = self.assignments.accept(&pending.id)? {
                    self.pool.update(&self.agent_id, |e| {
                        e.status = AgentStatus::Assigned;
                        e.current_task = Some(accepted.task_id.clone());
                        e.last_seen = chrono::Utc::now().to_rfc3339();
                    })?;
                    return Ok(Some(accepted));
                }
            }

            if Instant::now() >= deadline {
                log::info!(
                    "[AgentClient] {} standby timed out; terminating",
                    self.agent_id
                );
                self.pool.mark_terminated(&self.agent_id)?;
                return Ok(None);
            }

            // Heartbeat so the dispatcher keeps trusting this entry
            self.pool.update(&self.agent_id, |e| {
                e.last_seen = chrono::Utc::now().to_rfc3339();
            })?;
            std::thread::sleep(self.poll_interval);
        }
    }

    fn enter_standby(&self, capabilities: &[String]) -> FileResult<()> {
        let registered = self.pool.update(&self.agent_id, |e| {
            e.status = AgentStatus::Standby;
            e.capabilities = capabilities.to_vec();
            e.last_seen = chrono::Utc::now().to_rfc3339();
        })?;

        if !registered {
            // Self-registration for agents the orchestrator didn't spawn
            let entry = AgentEntry {
                capabilities: capabilities.to_vec(),
                status: AgentStatus::Standby,
                persistent: true,
                ..AgentEntry::new(self.agent_id.as_str(), AgentType::default(), "worker")
            };
            self.pool.register(entry)?;
        }

        Ok(())
    }
}
