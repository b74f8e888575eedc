//! Transport adapters
//!
//! A transport adapter is the object that actually executes a task. Two
//! implementations coexist: [`LocalTransport`] spawns subagents in process,
//! [`RemoteTransport`] talks to an external execution node over HTTP.
//! Future transports (message-bus, in-cluster RPC) satisfy the same trait.

mod local;
mod remote;

pub use local::LocalTransport;
pub use remote::{RemoteConfig, RemoteTransport};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::engine::TaskUpdateStream;
use crate::error::TransportError;
use crate::task::TaskState;

/// A task handed to a transport for execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskSubmission {
    /// Role tag for the executing agent
    pub agent_role: String,
    /// What to do
    pub description: String,
    /// Additional input assembled by the caller
    #[serde(default)]
    pub context: Option<String>,
    /// Session scope
    #[serde(default)]
    pub session_id: Option<String>,
    /// Free-form metadata carried onto the task record
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// An agent advertised by a transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInfo {
    /// Agent identifier (role name locally, `agent_type` remotely)
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// What the agent does
    #[serde(default)]
    pub description: String,
    /// Advertised capabilities
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// A skill advertised by a transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillInfo {
    /// Skill identifier (`skill_id` remotely)
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// What the skill does
    #[serde(default)]
    pub description: String,
}

/// Execution backend contract.
///
/// `submit_task` returns a created task whose status is `pending`; actual
/// execution begins asynchronously, never inside the call. Task-state
/// semantics are identical whichever implementation runs the work.
#[async_trait]
pub trait TransportAdapter: Send + Sync {
    /// Create a task and schedule its execution.
    async fn submit_task(&self, submission: TaskSubmission) -> Result<TaskState, TransportError>;

    /// Stream state updates for a task until it reaches a terminal state.
    async fn stream_task_updates(&self, task_id: &str)
        -> Result<TaskUpdateStream, TransportError>;

    /// Current state of a task. `None` for unknown or unreachable ids.
    async fn query_task_state(&self, task_id: &str) -> Result<Option<TaskState>, TransportError>;

    /// Request cancellation. `false` when the task was already terminal or
    /// the backend declined.
    async fn cancel_task(&self, task_id: &str) -> Result<bool, TransportError>;

    /// Agents this transport can execute with.
    async fn list_agents(&self) -> Result<Vec<AgentInfo>, TransportError>;

    /// Skills this transport can execute.
    async fn list_skills(&self) -> Result<Vec<SkillInfo>, TransportError>;

    /// Release transport resources. Best-effort.
    async fn close(&self) -> Result<(), TransportError>;
}
