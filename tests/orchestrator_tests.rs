//! End-to-end orchestration tests
//!
//! Drives the orchestrator cycle-by-cycle against a real git repository in a
//! temp dir, with agent work simulated through the same store and message
//! APIs real agent processes use. No backend CLIs are spawned: tasks are
//! bound to pooled standby agents, whose work is played in by the test.

use foreman_lib::agents::pool::{AgentEntry, AgentPool, AgentStatus};
use foreman_lib::git::GitWorkspace;
use foreman_lib::mailbox::agent_api::AgentClient;
use foreman_lib::mailbox::{Mailbox, Message, MessagePriority, MessageStatus};
use foreman_lib::scheduler::{self, TaskState};
use foreman_lib::store::markers;
use foreman_lib::store::snapshot;
use foreman_lib::{
    AgentType, Orchestrator, OrchestratorConfig, TaskPlan, TaskSpec, TaskType,
};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn task(id: &str, deps: &[&str]) -> TaskSpec {
    TaskSpec {
        id: id.to_string(),
        task_type: TaskType::Implement,
        branch: format!("task/{}", id.to_lowercase()),
        agent: "rust".to_string(),
        description: format!("Work on {}", id),
        depends_on: deps.iter().map(|d| d.to_string()).collect(),
    }
}

fn plan(tasks: Vec<TaskSpec>) -> TaskPlan {
    TaskPlan {
        project_name: "demo".to_string(),
        tasks,
    }
}

/// Git repo + config with no PM backend and fail-fast resolution calls
fn setup(temp_dir: &TempDir, max_agents: usize) -> (OrchestratorConfig, GitWorkspace) {
    let workspace = GitWorkspace::init(temp_dir.path()).unwrap();
    fs::write(temp_dir.path().join("README.md"), "# demo\n").unwrap();
    workspace.commit_all("Initial project").unwrap();

    let config = OrchestratorConfig {
        project_path: temp_dir.path().to_path_buf(),
        main_branch: workspace.default_branch_name(),
        max_parallel_agents: max_agents,
        backend_timeout_secs: 0,
        ..OrchestratorConfig::default()
    };
    (config, workspace)
}

fn register_standby(project: &Path, id: &str) {
    AgentPool::new(project)
        .register(AgentEntry {
            capabilities: vec!["rust".to_string()],
            status: AgentStatus::Standby,
            persistent: true,
            ..AgentEntry::new(id, AgentType::Claude, "worker")
        })
        .unwrap();
}

fn back_to_standby(project: &Path, id: &str) {
    AgentPool::new(project)
        .update(id, |e| {
            e.status = AgentStatus::Standby;
            e.last_seen = chrono::Utc::now().to_rfc3339();
        })
        .unwrap();
}

/// Play an agent's work: commit a file on the task branch, report done
fn simulate_work(
    config: &OrchestratorConfig,
    workspace: &GitWorkspace,
    agent_id: &str,
    task_id: &str,
    file: &str,
) {
    let branch = format!("task/{}", task_id.to_lowercase());
    workspace.ensure_branch(&branch).unwrap();
    workspace.checkout_branch(&branch).unwrap();
    fs::write(config.project_path.join(file), format!("work for {}\n", task_id)).unwrap();
    workspace.commit_all(&format!("Implement {}", task_id)).unwrap();
    workspace.checkout_branch(&config.main_branch).unwrap();

    AgentClient::new(&config.project_path, agent_id, config)
        .task_complete(task_id, &format!("{} implemented", task_id), vec![file.to_string()])
        .unwrap();
}

#[tokio::test]
async fn test_full_project_lifecycle() {
    let temp_dir = TempDir::new().unwrap();
    let (config, workspace) = setup(&temp_dir, 2);
    let project = config.project_path.clone();

    let mut orchestrator =
        Orchestrator::new(config.clone(), plan(vec![task("T1", &[]), task("T2", &["T1"])]))
            .unwrap();
    register_standby(&project, "agent-1");

    // Cycle 1: T1 dispatched immediately, T2 blocked on T1
    orchestrator.cycle().await.unwrap();
    let states = scheduler::classify(orchestrator.plan(), &project);
    assert_eq!(states["T1"], TaskState::Running);
    assert_eq!(states["T2"], TaskState::Blocked);
    assert_eq!(
        markers::read_running(&project, "T1").unwrap().agent_id,
        "agent-1"
    );

    // Agent finishes T1
    simulate_work(&config, &workspace, "agent-1", "T1", "one.txt");
    back_to_standby(&project, "agent-1");

    // Cycle 2: completion drained, default-approved, merged; T2 dispatched
    orchestrator.cycle().await.unwrap();
    let states = scheduler::classify(orchestrator.plan(), &project);
    assert_eq!(states["T1"], TaskState::Merged);
    assert_eq!(states["T2"], TaskState::Running);

    let merged = markers::read_merged(&project, "T1").unwrap();
    assert!(merged.commit_id.is_some());

    // Agent finishes T2
    simulate_work(&config, &workspace, "agent-1", "T2", "two.txt");
    back_to_standby(&project, "agent-1");

    // Cycle 3: everything terminal
    orchestrator.cycle().await.unwrap();
    assert!(scheduler::all_terminal(orchestrator.plan(), &project));

    let summary = scheduler::completion_summary(orchestrator.plan(), &project);
    assert_eq!(summary.merged, vec!["T1", "T2"]);
    assert!(summary.is_full_success());

    // Both files landed on the main line
    assert!(project.join("one.txt").exists());
    assert!(project.join("two.txt").exists());

    // The snapshot reflects the final partition for resume/reporting
    let snapshot = snapshot::load_snapshot(&project);
    assert_eq!(snapshot.merged.len(), 2);
}

#[tokio::test]
async fn test_concurrency_bound_and_deferral() {
    let temp_dir = TempDir::new().unwrap();
    let (config, _workspace) = setup(&temp_dir, 2);
    let project = config.project_path.clone();

    let mut orchestrator = Orchestrator::new(
        config.clone(),
        plan(vec![task("T1", &[]), task("T2", &[]), task("T3", &[])]),
    )
    .unwrap();

    for id in ["agent-1", "agent-2", "agent-3"] {
        register_standby(&project, id);
    }

    orchestrator.cycle().await.unwrap();

    // Exactly two tasks bound; the third waits even though an agent is free
    let states = scheduler::classify(orchestrator.plan(), &project);
    let running = states.values().filter(|s| **s == TaskState::Running).count();
    assert_eq!(running, 2);
    assert_eq!(AgentPool::new(&project).working_count(), 2);
    assert_eq!(
        states.values().filter(|s| **s == TaskState::Ready).count(),
        1
    );
}

#[tokio::test]
async fn test_question_routing_and_star_topology() {
    let temp_dir = TempDir::new().unwrap();
    let (config, _workspace) = setup(&temp_dir, 1);
    let project = config.project_path.clone();

    let mut orchestrator = Orchestrator::new(config.clone(), plan(vec![task("T1", &[])])).unwrap();
    // A standby agent absorbs the dispatch so no backend process is spawned
    register_standby(&project, "agent-1");
    let mailbox = Mailbox::new(&project);

    // A normal question to the PM gets a correlated answer
    let question_id = mailbox
        .post_outbox(Message::question(
            "agent-1",
            "Which crate for JSON?",
            None,
            MessagePriority::Normal,
        ))
        .unwrap();

    // Agent-to-agent traffic is rejected outright
    let illegal_id = mailbox
        .post_outbox(Message::notification("agent-1", "agent-2", "psst"))
        .unwrap();

    orchestrator.cycle().await.unwrap();

    let reply = mailbox.find_reply(&question_id).unwrap();
    assert_eq!(reply.to, "agent-1");
    assert!(!reply.body.is_empty());

    let outbox = mailbox.read_outbox();
    let by_id = |id: &str| outbox.messages.iter().find(|m| m.id == id).unwrap();
    assert_eq!(by_id(&question_id).status, MessageStatus::Responded);
    assert_eq!(by_id(&illegal_id).status, MessageStatus::Rejected);

    // Exactly one reply correlates to the question
    let replies: Vec<_> = mailbox
        .read_inbox()
        .messages
        .into_iter()
        .filter(|m| m.reply_to.as_deref() == Some(question_id.as_str()))
        .collect();
    assert_eq!(replies.len(), 1);
}

#[tokio::test]
async fn test_partial_success_convergence() {
    let temp_dir = TempDir::new().unwrap();
    let (config, workspace) = setup(&temp_dir, 2);
    let project = config.project_path.clone();

    let mut orchestrator = Orchestrator::new(
        config.clone(),
        plan(vec![task("T1", &[]), task("T2", &[]), task("T3", &["T2"])]),
    )
    .unwrap();
    register_standby(&project, "agent-1");
    register_standby(&project, "agent-2");

    orchestrator.cycle().await.unwrap();

    // T1 succeeds
    simulate_work(&config, &workspace, "agent-1", "T1", "one.txt");
    // T2 fails terminally (as a review rejection would leave it)
    markers::clear_running(&project, "T2").unwrap();
    markers::write_failed(
        &project,
        "T2",
        &markers::FailedMarker {
            reason: "Review rejected: no tests".to_string(),
            failed_at: chrono::Utc::now().to_rfc3339(),
        },
    )
    .unwrap();

    orchestrator.cycle().await.unwrap();

    // T3 is permanently blocked behind a failed dependency, but the run
    // still reports clearly instead of hanging: T1 merged, T2 failed
    let states = scheduler::classify(orchestrator.plan(), &project);
    assert_eq!(states["T1"], TaskState::Merged);
    assert_eq!(states["T2"], TaskState::Failed);
    assert_eq!(states["T3"], TaskState::Blocked);

    let summary = scheduler::completion_summary(orchestrator.plan(), &project);
    assert_eq!(summary.merged, vec!["T1"]);
    assert_eq!(summary.failed, vec!["T2"]);
    assert_eq!(summary.unfinished, vec!["T3"]);
    assert!(!summary.is_full_success());
}

#[tokio::test]
async fn test_recovery_clears_stale_bindings() {
    let temp_dir = TempDir::new().unwrap();
    let (config, _workspace) = setup(&temp_dir, 1);
    let project = config.project_path.clone();

    // A previous instance left a running marker behind
    markers::write_running(&project, "T1", &markers::RunningMarker::new("agent-gone")).unwrap();

    let mut orchestrator = Orchestrator::new(config.clone(), plan(vec![task("T1", &[])])).unwrap();
    orchestrator.recover();

    // The binding is gone and the task is dispatchable again
    assert!(markers::read_running(&project, "T1").is_none());
    let states = scheduler::classify(orchestrator.plan(), &project);
    assert_eq!(states["T1"], TaskState::Ready);
}
