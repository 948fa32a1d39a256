// Agent process spawning and supervision

pub mod backend;
pub mod lifecycle;
pub mod pool;

// Re-export for convenience
pub use backend::{build_command, is_available, BackendInvocation};
pub use lifecycle::{AgentLifecycleManager, ReapedAgent};
pub use pool::{AgentEntry, AgentPool, AgentPoolFile, AgentStatus};
