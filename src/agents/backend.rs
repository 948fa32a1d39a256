//! Backend CLI command construction
//!
//! Every agent (and the PM, when a PM backend is configured) is an opaque
//! subprocess of one of the supported coding-agent CLIs, launched
//! non-interactively with a briefing prompt and its workspace as the working
//! directory. The orchestrator never inspects agent reasoning; it only reads
//! the mailbox and the exit status.

use crate::models::AgentType;
use anyhow::{anyhow, Result};
use std::path::Path;
use std::process::{Command, Stdio};
use tokio::time::{timeout, Duration};

/// One backend invocation
#[derive(Debug, Clone)]
pub struct BackendInvocation {
    pub backend: AgentType,
    /// Working directory for the process (the agent's isolated workspace)
    pub workspace: std::path::PathBuf,
    /// Briefing prompt handed to the CLI
    pub prompt: String,
    /// Optional model override
    pub model: Option<String>,
}

/// Binary name for a backend CLI
pub fn binary_name(backend: AgentType) -> &'static str {
    match backend {
        AgentType::Claude => "claude",
        AgentType::Opencode => "opencode",
        AgentType::Codex => "codex",
    }
}

/// Check whether the backend CLI is on PATH
pub fn is_available(backend: AgentType) -> bool {
    Command::new(binary_name(backend))
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

/// Build the non-interactive command for a backend invocation
pub fn build_command(invocation: &BackendInvocation) -> Result<Command> {
    if invocation.prompt.trim().is_empty() {
        return Err(anyhow!(
            "{} requires a non-empty briefing prompt",
            invocation.backend
        ));
    }

    let mut cmd = Command::new(binary_name(invocation.backend));

    let workspace: &Path = &invocation.workspace;
    if workspace.exists() {
        cmd.current_dir(workspace);
    } else {
        log::warn!(
            "[Backend] Workspace {:?} doesn't exist, using current directory",
            workspace
        );
    }

    match invocation.backend {
        AgentType::Claude => {
            // --print outputs to stdout instead of the interactive TUI
            cmd.arg("--print");
            cmd.arg("--dangerously-skip-permissions");
            if let Some(ref model) = invocation.model {
                cmd.arg("--model").arg(model);
            }
            cmd.arg(&invocation.prompt);
        }
        AgentType::Opencode => {
            cmd.arg("run");
            if let Some(ref model) = invocation.model {
                cmd.arg("--model").arg(model);
            }
            cmd.arg(&invocation.prompt);
        }
        AgentType::Codex => {
            cmd.arg("exec");
            cmd.arg("--full-auto");
            if let Some(ref model) = invocation.model {
                cmd.arg("--model").arg(model);
            }
            cmd.arg(&invocation.prompt);
        }
    }

    Ok(cmd)
}

/// Run a backend invocation to completion and return its stdout.
///
/// Used for one-shot calls (PM verdicts, conflict resolution) where the
/// orchestrator needs the output. Worker agents are spawned detached through
/// the lifecycle manager instead.
pub async fn run_to_completion(invocation: &BackendInvocation, timeout_secs: u64) -> Result<String> {
    if !is_available(invocation.backend) {
        return Err(anyhow!(
            "{} CLI not found. Please ensure it is installed and in PATH.",
            invocation.backend
        ));
    }

    let std_cmd = build_command(invocation)?;
    let mut cmd = tokio::process::Command::from(std_cmd);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let output = timeout(Duration::from_secs(timeout_secs), async {
        cmd.output()
            .await
            .map_err(|e| anyhow!("Failed to spawn {}: {}", invocation.backend, e))
    })
    .await
    .map_err(|_| anyhow!("{} timed out after {}s", invocation.backend, timeout_secs))??;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        return Err(anyhow!(
            "{} failed with exit code {:?}: {}",
            invocation.backend,
            output.status.code(),
            stderr
        ));
    }

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    if stdout.trim().is_empty() {
        return Err(anyhow!("{} returned empty output", invocation.backend));
    }

    Ok(stdout)
}

/// Strip markdown fences from a backend response
pub fn clean_response(response: &str) -> String {
    let trimmed = response.trim();

    if trimmed.starts_with("```") {
        if let Some(first_newline) = trimmed.find('\n') {
            let after_opening = &trimmed[first_newline + 1..];
            if let Some(closing_pos) = after_opening.rfind("```") {
                return after_opening[..closing_pos].trim().to_string();
            }
            return after_opening.trim().to_string();
        }
    }

    trimmed.to_string()
}
