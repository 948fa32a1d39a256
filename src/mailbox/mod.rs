//! Messaging protocol over the mailbox store
//!
//! Two append-only message logs implement all cross-process communication:
//! `outbox.json` carries agent-to-PM traffic and PM-to-user escalations;
//! `inbox.json` carries replies (PM-to-agent, user-to-PM) and broadcasts.
//! Messages are never deleted, only status-mutated, and status transitions
//! are monotonic - no message is resurrected.
//!
//! Routing is a star topology: agents may only address the PM. Anything else
//! is rejected during the orchestrator's message drain.

pub mod agent_api;

use crate::store::{foreman_dir, locked_update, read_json_or_default, FileResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Reserved addresses
pub const PM_ADDRESS: &str = "pm";
pub const USER_ADDRESS: &str = "user";
pub const BROADCAST_ADDRESS: &str = "all";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Question,
    Notification,
    TaskComplete,
    StatusUpdate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessagePriority {
    Low,
    Normal,
    High,
    Blocking,
}

impl Default for MessagePriority {
    fn default() -> Self {
        Self::Normal
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Pending,
    Processing,
    Delivered,
    Responded,
    Rejected,
    Handled,
}

/// Validates whether a message status may move from one state to another.
/// The relation is monotonic: once delivered, responded, rejected, or
/// handled, a message never goes back.
pub fn can_transition(from: MessageStatus, to: MessageStatus) -> bool {
    use MessageStatus::*;
    match (from, to) {
        // Same state is always allowed (no-op)
        (a, b) if a == b => true,

        (Pending, Processing) => true,
        (Pending, Delivered) => true,
        (Pending, Responded) => true,
        (Pending, Rejected) => true,
        (Pending, Handled) => true,

        (Processing, Delivered) => true,
        (Processing, Responded) => true,
        (Processing, Handled) => true,

        (Delivered, Responded) => true,
        (Delivered, Handled) => true,

        // Responded, Rejected, and Handled are terminal
        _ => false,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageError {
    #[error("Invalid message status transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: MessageStatus,
        to: MessageStatus,
    },

    #[error("Message '{0}' not found")]
    NotFound(String),

    #[error("Message '{0}' already has a response")]
    AlreadyAnswered(String),
}

/// One unit on the mailbox
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub from: String,
    pub to: String,
    pub kind: MessageKind,
    pub body: String,
    /// Extra context the sender attached (task description excerpt, etc.)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default)]
    pub priority: MessagePriority,
    pub status: MessageStatus,
    /// Outbox entry this message answers (inbox replies only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    /// Task this message concerns (completion signals, status updates)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    /// Files the sender reported touching (completion signals)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files_changed: Vec<String>,
    /// Percent complete (status updates)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u32>,
    pub timestamp: String,
}

impl Message {
    fn base(from: &str, to: &str, kind: MessageKind, body: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            from: from.to_string(),
            to: to.to_string(),
            kind,
            body: body.to_string(),
            context: None,
            priority: MessagePriority::Normal,
            status: MessageStatus::Pending,
            reply_to: None,
            task_id: None,
            files_changed: Vec::new(),
            progress: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// A question addressed to the PM
    pub fn question(
        from: &str,
        body: &str,
        context: Option<String>,
        priority: MessagePriority,
    ) -> Self {
        Self {
            context,
            priority,
            ..Self::base(from, PM_ADDRESS, MessageKind::Question, body)
        }
    }

    /// A fire-and-forget notification
    pub fn notification(from: &str, to: &str, body: &str) -> Self {
        Self::base(from, to, MessageKind::Notification, body)
    }

    /// A completion signal for a task
    pub fn task_complete(from: &str, task_id: &str, summary: &str, files: Vec<String>) -> Self {
        Self {
            task_id: Some(task_id.to_string()),
            files_changed: files,
            ..Self::base(from, PM_ADDRESS, MessageKind::TaskComplete, summary)
        }
    }

    /// A progress/status update
    pub fn status_update(from: &str, body: &str, progress: Option<u32>) -> Self {
        Self {
            progress,
            ..Self::base(from, PM_ADDRESS, MessageKind::StatusUpdate, body)
        }
    }

    /// A reply correlated to an outbox entry
    pub fn reply(from: &str, to: &str, reply_to: &str, body: &str) -> Self {
        Self {
            reply_to: Some(reply_to.to_string()),
            ..Self::base(from, to, MessageKind::Notification, body)
        }
    }
}

/// An append-only message log document
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageLog {
    pub messages: Vec<Message>,
    pub last_updated: String,
}

impl Default for MessageLog {
    fn default() -> Self {
        Self {
            messages: Vec::new(),
            last_updated: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Handle on a project's outbox/inbox documents
#[derive(Debug, Clone)]
pub struct Mailbox {
    dir: PathBuf,
}

impl Mailbox {
    pub fn new(project_path: &Path) -> Self {
        Self {
            dir: foreman_dir(project_path),
        }
    }

    fn outbox_path(&self) -> PathBuf {
        self.dir.join("outbox.json")
    }

    fn inbox_path(&self) -> PathBuf {
        self.dir.join("inbox.json")
    }

    pub fn read_outbox(&self) -> MessageLog {
        read_json_or_default(&self.outbox_path())
    }

    pub fn read_inbox(&self) -> MessageLog {
        read_json_or_default(&self.inbox_path())
    }

    /// Append a message to the outbox, returning its id
    pub fn post_outbox(&self, message: Message) -> FileResult<String> {
        let id = message.id.clone();
        locked_update::<MessageLog, _, _>(&self.outbox_path(), |log| {
            log.messages.push(message);
            log.last_updated = chrono::Utc::now().to_rfc3339();
        })?;
        Ok(id)
    }

    /// Append a message to the inbox, returning its id
    pub fn post_inbox(&self, message: Message) -> FileResult<String> {
        let id = message.id.clone();
        locked_update::<MessageLog, _, _>(&self.inbox_path(), |log| {
            log.messages.push(message);
            log.last_updated = chrono::Utc::now().to_rfc3339();
        })?;
        Ok(id)
    }

    /// Append a reply to the inbox, correlated to an outbox entry.
    /// At most one reply may exist per outbox entry.
    pub fn post_inbox_reply(
        &self,
        reply_to: &str,
        from: &str,
        to: &str,
        body: &str,
    ) -> Result<String, String> {
        if self.find_reply(reply_to).is_some() {
            return Err(MessageError::AlreadyAnswered(reply_to.to_string()).to_string());
        }

        let reply = Message::reply(from, to, reply_to, body);
        self.post_inbox(reply)
    }

    /// Mutate an outbox entry's status, enforcing monotonicity
    pub fn set_outbox_status(&self, message_id: &str, status: MessageStatus) -> Result<(), String> {
        self.set_status(&self.outbox_path(), message_id, status)
    }

    /// Mutate an inbox entry's status, enforcing monotonicity
    pub fn set_inbox_status(&self, message_id: &str, status: MessageStatus) -> Result<(), String> {
        self.set_status(&self.inbox_path(), message_id, status)
    }

    fn set_status(
        &self,
        path: &Path,
        message_id: &str,
        status: MessageStatus,
    ) -> Result<(), String> {
        locked_update::<MessageLog, _, _>(path, |log| {
            let Some(message) = log.messages.iter_mut().find(|m| m.id == message_id) else {
                return Err(MessageError::NotFound(message_id.to_string()));
            };

            if !can_transition(message.status, status) {
                return Err(MessageError::InvalidTransition {
                    from: message.status,
                    to: status,
                });
            }

            message.status = status;
            log.last_updated = chrono::Utc::now().to_rfc3339();
            Ok(())
        })?
        .map_err(|e| e.to_string())
    }

    /// Pending outbox entries, oldest first
    pub fn pending_outbox(&self) -> Vec<Message> {
        self.read_outbox()
            .messages
            .into_iter()
            .filter(|m| m.status == MessageStatus::Pending)
            .collect()
    }

    /// Find the inbox reply for an outbox entry, if any
    pub fn find_reply(&self, outbox_id: &str) -> Option<Message> {
        self.read_inbox()
            .messages
            .into_iter()
            .find(|m| m.reply_to.as_deref() == Some(outbox_id))
    }

    /// Inbox entries addressed to an agent (direct or broadcast).
    /// With `unread_only`, returns pending entries and flips them delivered.
    pub fn inbox_for(&self, agent_id: &str, unread_only: bool) -> FileResult<Vec<Message>> {
        let matches = |m: &Message| m.to == agent_id || m.to == BROADCAST_ADDRESS;

        if !unread_only {
            return Ok(self
                .read_inbox()
                .messages
                .into_iter()
                .filter(matches)
                .collect());
        }

        locked_update::<MessageLog, _, _>(&self.inbox_path(), |log| {
            let mut unread = Vec::new();
            for message in log.messages.iter_mut() {
                if matches(message) && message.status == MessageStatus::Pending {
                    message.status = MessageStatus::Delivered;
                    unread.push(message.clone());
                }
            }
            if !unread.is_empty() {
                log.last_updated = chrono::Utc::now().to_rfc3339();
            }
            unread
        })
    }

    /// Outbox entries awaiting the human user
    pub fn user_pending(&self) -> Vec<Message> {
        self.read_outbox()
            .messages
            .into_iter()
            .filter(|m| {
                m.to == USER_ADDRESS
                    && matches!(m.status, MessageStatus::Pending | MessageStatus::Processing)
            })
            .collect()
    }

    /// The single human write path: answer an outbox entry addressed to the
    /// user. Appends the correlated inbox reply and flips the outbox entry to
    /// responded.
    pub fn respond_from_user(&self, message_id: &str, text: &str) -> Result<String, String> {
        let outbox = self.read_outbox();
        let Some(message) = outbox.messages.iter().find(|m| m.id == message_id) else {
            return Err(MessageError::NotFound(message_id.to_string()).to_string());
        };

        if message.to != USER_ADDRESS {
            return Err(format!(
                "Message '{}' is not addressed to the user",
                message_id
            ));
        }

        let reply_id = self.post_inbox_reply(message_id, USER_ADDRESS, &message.from, text)?;
        self.set_outbox_status(message_id, MessageStatus::Responded)?;
        Ok(reply_id)
    }

    /// Broadcast a PM message to every agent
    pub fn broadcast(&self, body: &str) -> FileResult<String> {
        self.post_inbox(Message::notification(PM_ADDRESS, BROADCAST_ADDRESS, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn mailbox() -> (TempDir, Mailbox) {
        let temp_dir = TempDir::new().unwrap();
        let mailbox = Mailbox::new(temp_dir.path());
        (temp_dir, mailbox)
    }

    #[test]
    fn test_status_transitions_monotonic() {
        use MessageStatus::*;

        assert!(can_transition(Pending, Processing));
        assert!(can_transition(Pending, Rejected));
        assert!(can_transition(Processing, Responded));
        assert!(can_transition(Delivered, Responded));

        // No resurrection
        assert!(!can_transition(Responded, Pending));
        assert!(!can_transition(Rejected, Processing));
        assert!(!can_transition(Handled, Pending));
        assert!(!can_transition(Responded, Processing));

        // No-op is fine
        assert!(can_transition(Pending, Pending));
    }

    #[test]
    fn test_post_and_read_outbox() {
        let (_tmp, mailbox) = mailbox();

        let id = mailbox
            .post_outbox(Message::question(
                "agent-1",
                "Which database should I use?",
                None,
                MessagePriority::Normal,
            ))
            .unwrap();

        let pending = mailbox.pending_outbox();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, id);
        assert_eq!(pending[0].to, PM_ADDRESS);
    }

    #[test]
    fn test_set_status_enforces_monotonicity() {
        let (_tmp, mailbox) = mailbox();

        let id = mailbox
            .post_outbox(Message::notification("agent-1", PM_ADDRESS, "hello"))
            .unwrap();

        mailbox
            .set_outbox_status(&id, MessageStatus::Delivered)
            .unwrap();

        let result = mailbox.set_outbox_status(&id, MessageStatus::Pending);
        assert!(result.is_err());
    }

    #[test]
    fn test_set_status_unknown_message() {
        let (_tmp, mailbox) = mailbox();
        let result = mailbox.set_outbox_status("nope", MessageStatus::Delivered);
        assert!(result.is_err());
    }

    #[test]
    fn test_reply_correlation_single_response() {
        let (_tmp, mailbox) = mailbox();

        let question_id = mailbox
            .post_outbox(Message::question(
                "agent-1",
                "Tabs or spaces?",
                None,
                MessagePriority::Low,
            ))
            .unwrap();

        mailbox
            .post_inbox_reply(&question_id, PM_ADDRESS, "agent-1", "Spaces.")
            .unwrap();

        let reply = mailbox.find_reply(&question_id).unwrap();
        assert_eq!(reply.body, "Spaces.");
        assert_eq!(reply.reply_to.as_deref(), Some(question_id.as_str()));

        // A second reply against the same outbox entry is refused
        let second = mailbox.post_inbox_reply(&question_id, PM_ADDRESS, "agent-1", "Tabs.");
        assert!(second.is_err());
    }

    #[test]
    fn test_inbox_for_unread_flips_delivered() {
        let (_tmp, mailbox) = mailbox();

        mailbox
            .post_inbox(Message::notification(PM_ADDRESS, "agent-1", "direct"))
            .unwrap();
        mailbox.broadcast("to everyone").unwrap();
        mailbox
            .post_inbox(Message::notification(PM_ADDRESS, "agent-2", "not yours"))
            .unwrap();

        let unread = mailbox.inbox_for("agent-1", true).unwrap();
        assert_eq!(unread.len(), 2);

        // Second unread fetch is empty; a full fetch still sees both
        assert!(mailbox.inbox_for("agent-1", true).unwrap().is_empty());
        assert_eq!(mailbox.inbox_for("agent-1", false).unwrap().len(), 2);
    }

    #[test]
    fn test_respond_from_user() {
        let (_tmp, mailbox) = mailbox();

        let escalation_id = mailbox
            .post_outbox(Message {
                priority: MessagePriority::High,
                ..Message::base(
                    PM_ADDRESS,
                    USER_ADDRESS,
                    MessageKind::Question,
                    "Should checkout support PayPal?",
                )
            })
            .unwrap();

        assert_eq!(mailbox.user_pending().len(), 1);

        mailbox
            .respond_from_user(&escalation_id, "Yes, PayPal and cards.")
            .unwrap();

        assert!(mailbox.user_pending().is_empty());
        let reply = mailbox.find_reply(&escalation_id).unwrap();
        assert_eq!(reply.from, USER_ADDRESS);

        let outbox = mailbox.read_outbox();
        assert_eq!(outbox.messages[0].status, MessageStatus::Responded);
    }

    #[test]
    fn test_respond_from_user_rejects_non_user_message() {
        let (_tmp, mailbox) = mailbox();

        let id = mailbox
            .post_outbox(Message::question(
                "agent-1",
                "hi",
                None,
                MessagePriority::Normal,
            ))
            .unwrap();

        assert!(mailbox.respond_from_user(&id, "answer").is_err());
    }

    #[test]
    fn test_task_complete_message_shape() {
        let message = Message::task_complete(
            "agent-1",
            "T1",
            "Implemented the parser",
            vec!["src/parser.rs".to_string()],
        );
        assert_eq!(message.kind, MessageKind::TaskComplete);
        assert_eq!(message.task_id.as_deref(), Some("T1"));
        assert_eq!(message.to, PM_ADDRESS);

        let json = serde_json::to_string(&message).unwrap();
        assert!(json.contains("task_complete"));
        assert!(json.contains("src/parser.rs"));
    }
}
