//! Subagent-spawn collaborator interface
//!
//! The local transport and the orchestrator hand actual execution to an
//! external collaborator that spawns a role-tagged subagent. Implementations
//! must be callable re-entrantly; the orchestrator dispatches whole waves of
//! tasks against one spawner concurrently.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// What to spawn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpawnRequest {
    /// The assembled task input
    pub task: String,
    /// Short human label for the spawned agent
    pub label: String,
    /// Role name driving the agent's behavior
    pub agent_id: String,
    /// Model tag override
    #[serde(default)]
    pub model: Option<String>,
    /// Thinking-depth tag override
    #[serde(default)]
    pub thinking: Option<String>,
}

/// Ambient context handed alongside a spawn request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpawnContext {
    /// Session the spawn is scoped to
    #[serde(default)]
    pub session_id: Option<String>,
    /// Free-form collaborator data
    #[serde(default)]
    pub extra: HashMap<String, Value>,
}

/// Whether the collaborator took the work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpawnStatus {
    /// The subagent was spawned
    Accepted,
    /// The collaborator declined
    Rejected,
}

/// Collaborator verdict for one spawn request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpawnOutcome {
    /// Accepted or rejected
    pub status: SpawnStatus,
    /// Session key of the spawned child, when accepted
    #[serde(default)]
    pub child_session_key: Option<String>,
    /// Why the spawn was rejected or failed
    #[serde(default)]
    pub error: Option<String>,
}

impl SpawnOutcome {
    /// An accepted outcome with the given child session key.
    #[must_use]
    pub fn accepted(child_session_key: impl Into<String>) -> Self {
        Self {
            status: SpawnStatus::Accepted,
            child_session_key: Some(child_session_key.into()),
            error: None,
        }
    }

    /// A rejected outcome with the given reason.
    #[must_use]
    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            status: SpawnStatus::Rejected,
            child_session_key: None,
            error: Some(error.into()),
        }
    }
}

/// The subagent-spawn collaborator.
#[async_trait]
pub trait SubagentSpawner: Send + Sync {
    /// Spawn a subagent for the request. Errors are reserved for the
    /// collaborator's own infrastructure failing; a decline is an
    /// `Ok(rejected)` outcome.
    async fn spawn(
        &self,
        request: SpawnRequest,
        context: SpawnContext,
    ) -> Result<SpawnOutcome, Box<dyn std::error::Error + Send + Sync>>;
}
