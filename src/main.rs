//! Foreman CLI
//!
//! Thin presentation layer over the orchestration core: launches runs,
//! validates plans, and renders the read-only store projections.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use foreman_lib::store::foreman_dir;
use foreman_lib::{view, AgentType, Orchestrator, OrchestratorConfig, TaskPlan};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "foreman",
    version,
    about = "PM-supervised orchestrator for parallel AI coding agents"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a task plan to completion
    Run {
        /// Project root (a git repository)
        #[arg(long, default_value = ".")]
        project: PathBuf,
        /// Task plan document
        #[arg(long)]
        plan: PathBuf,
        /// Global cap on concurrently working agents
        #[arg(long, env = "FOREMAN_MAX_AGENTS", default_value_t = 4)]
        max_agents: usize,
        /// Orchestrator poll interval in seconds
        #[arg(long, env = "FOREMAN_POLL_SECS", default_value_t = 10)]
        poll_secs: u64,
        /// Branch the merge engine targets
        #[arg(long, default_value = "main")]
        branch: String,
        /// Backend CLI for worker agents
        #[arg(long, env = "FOREMAN_BACKEND", default_value = "claude")]
        backend: AgentType,
        /// Backend CLI for PM review/answer calls (omit for built-in policy)
        #[arg(long, env = "FOREMAN_PM_BACKEND")]
        pm_backend: Option<AgentType>,
        /// Model override passed to backend CLIs
        #[arg(long)]
        model: Option<String>,
    },
    /// Validate a task plan without running it
    Validate {
        #[arg(long)]
        plan: PathBuf,
    },
    /// Show tasks, escalations, and recent activity
    Status {
        #[arg(long, default_value = ".")]
        project: PathBuf,
    },
    /// List the agent pool
    Agents {
        #[arg(long, default_value = ".")]
        project: PathBuf,
    },
    /// Answer an escalated question by message id
    Respond {
        #[arg(long, default_value = ".")]
        project: PathBuf,
        #[arg(long)]
        message: String,
        #[arg(long)]
        text: String,
    },
}

fn load_accepted_plan(project: &PathBuf) -> Result<TaskPlan> {
    let plan_path = foreman_dir(project).join("plan.json");
    if !plan_path.exists() {
        return Err(anyhow!(
            "No accepted plan found at {:?} - run `foreman run` first",
            plan_path
        ));
    }
    TaskPlan::load(&plan_path).map_err(|e| anyhow!(e.to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            project,
            plan,
            max_agents,
            poll_secs,
            branch,
            backend,
            pm_backend,
            model,
        } => {
            let plan = TaskPlan::load(&plan)
                .with_context(|| format!("Failed to load task plan {:?}", plan))?;

            let config = OrchestratorConfig {
                project_path: project,
                main_branch: branch,
                max_parallel_agents: max_agents,
                poll_interval_secs: poll_secs,
                agent_backend: backend,
                pm_backend,
                model,
                ..OrchestratorConfig::default()
            };

            let mut orchestrator =
                Orchestrator::new(config, plan).map_err(|e| anyhow!(e))?;
            let summary = orchestrator.run().await.map_err(|e| anyhow!(e))?;
            println!("{}", summary);
        }

        Commands::Validate { plan } => {
            let plan = TaskPlan::load(&plan)
                .with_context(|| format!("Failed to load task plan {:?}", plan))?;
            plan.validate().map_err(|e| anyhow!(e.to_string()))?;
            println!(
                "Plan '{}' is valid: {} task(s)",
                plan.project_name,
                plan.tasks.len()
            );
        }

        Commands::Status { project } => {
            let plan = load_accepted_plan(&project)?;

            println!("Tasks:");
            for task in view::task_views(&plan, &project) {
                println!(
                    "  {:<12} [{}] {} on {} - {}",
                    task.id, task.current_status, task.task_type, task.branch, task.description
                );
            }

            let pending = view::pending_user_messages(&project);
            if !pending.is_empty() {
                println!("\nAwaiting your answer (use `foreman respond`):");
                for message in pending {
                    println!("  {}  {}", message.id, message.body);
                }
            }

            let activity = view::recent_activity(&project, 10);
            if !activity.is_empty() {
                println!("\nRecent activity:");
                for entry in activity {
                    println!("  {}  {}", entry.at, entry.entry);
                }
            }
        }

        Commands::Agents { project } => {
            let agents = view::agent_summaries(&project);
            if agents.is_empty() {
                println!("No agents in the pool");
            }
            for agent in agents {
                println!(
                    "  {:<20} {:<10} [{}] task={} seen={}",
                    agent.id,
                    agent.backend,
                    agent.status,
                    agent.current_task.as_deref().unwrap_or("-"),
                    agent.last_seen
                );
            }
        }

        Commands::Respond {
            project,
            message,
            text,
        } => {
            view::respond(&project, &message, &text).map_err(|e| anyhow!(e))?;
            println!("Answer recorded for message {}", message);
        }
    }

    Ok(())
}
