// Core shared data models

use serde::{Deserialize, Serialize};

/// Backend CLI used to run an agent (or the PM) non-interactively
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    Claude,
    Opencode,
    Codex,
}

impl AgentType {
    /// Returns all available agent types
    pub fn all() -> &'static [AgentType] {
        &[AgentType::Claude, AgentType::Opencode, AgentType::Codex]
    }

    /// Returns the string representation of this agent type
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentType::Claude => "claude",
            AgentType::Opencode => "opencode",
            AgentType::Codex => "codex",
        }
    }
}

impl std::fmt::Display for AgentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for AgentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "claude" => Ok(AgentType::Claude),
            "opencode" => Ok(AgentType::Opencode),
            "codex" => Ok(AgentType::Codex),
            _ => Err(format!(
                "Unknown agent type: '{}'. Expected one of: claude, opencode, codex",
                s
            )),
        }
    }
}

impl Default for AgentType {
    fn default() -> Self {
        AgentType::Claude
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Active,
    Completed,
}

/// One unit of work with its own workspace and task graph
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
    pub description: String,
    pub created_at: String,
    pub status: ProjectStatus,
}

impl Project {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: format!(
                "proj_{}",
                &uuid::Uuid::new_v4().to_string().replace('-', "")[..12]
            ),
            name: name.into(),
            description: description.into(),
            created_at: chrono::Utc::now().to_rfc3339(),
            status: ProjectStatus::Active,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_type_roundtrip() {
        for agent_type in AgentType::all() {
            let parsed: AgentType = agent_type.as_str().parse().unwrap();
            assert_eq!(parsed, *agent_type);
        }
    }

    #[test]
    fn test_agent_type_unknown() {
        let result: Result<AgentType, _> = "gpt".parse();
        assert!(result.is_err());
    }

    #[test]
    fn test_agent_type_serialization() {
        let json = serde_json::to_string(&AgentType::Opencode).unwrap();
        assert_eq!(json, "\"opencode\"");
    }

    #[test]
    fn test_project_new() {
        let project = Project::new("demo", "A demo project");
        assert!(project.id.starts_with("proj_"));
        assert_eq!(project.status, ProjectStatus::Active);
    }
}
