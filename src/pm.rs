//! Project Manager role
//!
//! The PM answers agent questions, escalates business/preference decisions
//! to the human user, and produces review verdicts for the Review & Merge
//! Engine. When a PM backend CLI is configured, questions and reviews run
//! through it; otherwise a built-in policy applies. All natural-language
//! output is parsed tolerantly - an unparseable response degrades to the
//! stated default instead of an error.

use crate::agents::backend::{self, BackendInvocation};
use crate::config::OrchestratorConfig;
use crate::mailbox::{
    Mailbox, Message, MessageKind, MessagePriority, MessageStatus, PM_ADDRESS, USER_ADDRESS,
};
use crate::plan::TaskSpec;
use regex::Regex;
use std::time::{Duration, Instant};

/// The PM's decision on an agent question
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PmAnswer {
    /// Answer directly from project context
    Direct(String),
    /// Requires human input; carries the reformulated question
    Escalate(String),
}

/// Parse a PM backend response: a leading `ESCALATE:` token requests human
/// input, anything else is a direct answer. Tolerant by design.
pub fn parse_answer(raw: &str) -> PmAnswer {
    let trimmed = raw.trim();

    if let Ok(re) = Regex::new(r"(?is)^\s*ESCALATE\s*[:\-]\s*(.*)$") {
        if let Some(captures) = re.captures(trimmed) {
            let reformulated = captures
                .get(1)
                .map(|m| m.as_str().trim().to_string())
                .unwrap_or_default();
            if !reformulated.is_empty() {
                return PmAnswer::Escalate(reformulated);
            }
        }
    }

    PmAnswer::Direct(trimmed.to_string())
}

/// PM engine: question handling, escalation, review verdicts
pub struct PmEngine {
    config: OrchestratorConfig,
    mailbox: Mailbox,
    /// Escalation poll cadence (tests shorten this)
    poll_interval: Duration,
}

impl PmEngine {
    pub fn new(config: OrchestratorConfig) -> Self {
        let mailbox = Mailbox::new(&config.project_path);
        Self {
            config,
            mailbox,
            poll_interval: Duration::from_secs(2),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Run the PM backend, if one is configured
    async fn run_backend(&self, prompt: String) -> Option<String> {
        let backend_type = self.config.pm_backend?;

        let invocation = BackendInvocation {
            backend: backend_type,
            workspace: self.config.project_path.clone(),
            prompt,
            model: self.config.model.clone(),
        };

        match backend::run_to_completion(&invocation, self.config.backend_timeout_secs).await {
            Ok(output) => Some(output),
            Err(e) => {
                log::warn!("[PM] Backend call failed: {}", e);
                None
            }
        }
    }

    /// Decide how to answer an agent question
    pub async fn answer_question(&self, question: &Message) -> PmAnswer {
        let prompt = format!(
            "You are the project manager for this codebase. An agent asked:\n\n\
             {body}\n\n\
             {context}\
             Answer from project context when you can. If this is a business or\n\
             preference decision only a human can make, reply with exactly\n\
             `ESCALATE: <the question reformulated for the project owner>`.\n\
             Otherwise reply with the answer alone.",
            body = question.body,
            context = question
                .context
                .as_ref()
                .map(|c| format!("Context provided by the agent:\n{}\n\n", c))
                .unwrap_or_default(),
        );

        match self.run_backend(prompt).await {
            Some(raw) => parse_answer(&raw),
            None => {
                // Built-in policy: blocking questions are worth a human's
                // time, the rest proceed with a stock answer
                if question.priority == MessagePriority::Blocking {
                    PmAnswer::Escalate(question.body.clone())
                } else {
                    PmAnswer::Direct(
                        "No project guidance recorded for this; use your best judgment \
                         and note the decision in your summary."
                            .to_string(),
                    )
                }
            }
        }
    }

    /// Handle one pending agent question end to end: answer directly, or
    /// escalate to the user with a bounded wait and synthesize the final
    /// reply from the human's input.
    pub async fn handle_question(&self, question: &Message) -> Result<(), String> {
        self.mailbox
            .set_outbox_status(&question.id, MessageStatus::Processing)?;

        let answer = match self.answer_question(question).await {
            PmAnswer::Direct(text) => text,
            PmAnswer::Escalate(reformulated) => self.escalate(question, &reformulated).await?,
        };

        self.mailbox
            .post_inbox_reply(&question.id, PM_ADDRESS, &question.from, &answer)?;
        self.mailbox
            .set_outbox_status(&question.id, MessageStatus::Responded)?;

        log::info!(
            "[PM] Answered question {} from {}",
            question.id,
            question.from
        );
        Ok(())
    }

    /// Raise a question to the human user and wait (bounded) for the answer
    async fn escalate(&self, question: &Message, reformulated: &str) -> Result<String, String> {
        let escalation = Message {
            kind: MessageKind::Question,
            priority: MessagePriority::High,
            context: Some(format!("Raised by agent {}", question.from)),
            ..Message::notification(PM_ADDRESS, USER_ADDRESS, reformulated)
        };
        let escalation_id = self.mailbox.post_outbox(escalation)?;

        log::info!(
            "[PM] Escalated question {} to user as {} (waiting up to {}s)",
            question.id,
            escalation_id,
            self.config.escalation_timeout_secs
        );

        let deadline = Instant::now() + self.config.escalation_timeout();
        loop {
            if let Some(human_reply) = self.mailbox.find_reply(&escalation_id) {
                return Ok(format!(
                    "The project owner was consulted: {}",
                    human_reply.body
                ));
            }
            if Instant::now() >= deadline {
                // Flip the escalation so it is no longer shown as awaiting input
                let _ = self
                    .mailbox
                    .set_outbox_status(&escalation_id, MessageStatus::Handled);
                return Ok(format!(
                    "No human response within {}s. Proceed using your best judgment \
                     and record the assumption you made.",
                    self.config.escalation_timeout_secs
                ));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Obtain the raw review verdict text for a completed task. None means
    /// no backend output was available; the review engine applies its
    /// lenient default.
    pub async fn review_verdict(&self, task: &TaskSpec, diff_report: &str) -> Option<String> {
        let prompt = format!(
            "You are the project manager reviewing completed work.\n\n\
             Task {id} ({task_type}): {description}\n\n\
             Diff against the main line:\n{diff}\n\n\
             Reply with exactly one line: `APPROVE: <one-line rationale>` or\n\
             `REJECT: <one-line rationale>`. Be lenient - approve whenever there\n\
             is genuine code and effort, even with minor issues.",
            id = task.id,
            task_type = task.task_type,
            description = task.description,
            diff = diff_report,
        );

        self.run_backend(prompt).await
    }
}
