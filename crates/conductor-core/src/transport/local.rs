//! In-process transport
//!
//! Executes tasks by spawning subagents through the
//! [`SubagentSpawner`](crate::spawn::SubagentSpawner) collaborator. The
//! engine does the lifecycle bookkeeping; this adapter drives it from a
//! background worker.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{AgentInfo, SkillInfo, TaskSubmission, TransportAdapter};
use crate::engine::{NewTask, TaskEngine, TaskUpdateStream};
use crate::error::{EngineError, TransportError};
use crate::roles::RoleRegistry;
use crate::spawn::{SpawnContext, SpawnRequest, SpawnStatus, SubagentSpawner};
use crate::task::{TaskState, TaskStatus};

/// Transport that runs tasks in process via subagent spawn calls.
pub struct LocalTransport {
    engine: Arc<TaskEngine>,
    spawner: Arc<dyn SubagentSpawner>,
    roles: Arc<RoleRegistry>,
}

impl LocalTransport {
    /// Create a local transport over the given engine and spawn collaborator.
    pub fn new(
        engine: Arc<TaskEngine>,
        spawner: Arc<dyn SubagentSpawner>,
        roles: Arc<RoleRegistry>,
    ) -> Self {
        Self {
            engine,
            spawner,
            roles,
        }
    }

    /// The shared engine.
    #[must_use]
    pub fn engine(&self) -> &Arc<TaskEngine> {
        &self.engine
    }

    /// Execution protocol for one task: `pending -> planning -> running`,
    /// spawn the subagent, then `completed` or `failed`.
    ///
    /// A task cancelled in the meantime makes the next transition illegal;
    /// that is the observation point where cancellation is honored.
    async fn execute(
        engine: Arc<TaskEngine>,
        spawner: Arc<dyn SubagentSpawner>,
        roles: Arc<RoleRegistry>,
        task_id: String,
        submission: TaskSubmission,
    ) {
        for status in [TaskStatus::Planning, TaskStatus::Running] {
            match engine.update_status(&task_id, status).await {
                Ok(_) => {}
                Err(EngineError::InvalidTransition { from, .. }) if from.is_terminal() => {
                    debug!(task_id = %task_id, "Task reached a terminal state before execution");
                    return;
                }
                Err(e) => {
                    warn!(task_id = %task_id, error = %e, "Execution aborted");
                    return;
                }
            }
        }

        let role = roles.get(&submission.agent_role);
        let request = SpawnRequest {
            task: match &submission.context {
                Some(context) => format!("{}\n\n{}", submission.description, context),
                None => submission.description.clone(),
            },
            label: submission.description.clone(),
            agent_id: submission.agent_role.clone(),
            model: role.map(|r| r.model.clone()),
            thinking: role.map(|r| r.thinking.clone()),
        };
        let context = SpawnContext {
            session_id: submission.session_id.clone(),
            extra: Default::default(),
        };

        let result = spawner.spawn(request, context).await;
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                if let Err(engine_err) = engine.set_error(&task_id, e.to_string()).await {
                    warn!(task_id = %task_id, error = %engine_err, "Failed to record spawn error");
                }
                return;
            }
        };

        match outcome.status {
            SpawnStatus::Accepted => {
                let output = match outcome.child_session_key {
                    Some(key) => format!("subagent accepted: {}", key),
                    None => "subagent accepted".to_string(),
                };
                if let Err(e) = engine.set_output(&task_id, output).await {
                    warn!(task_id = %task_id, error = %e, "Failed to set output");
                    return;
                }
                if let Err(e) = engine.update_status(&task_id, TaskStatus::Completed).await {
                    warn!(task_id = %task_id, error = %e, "Failed to complete task");
                }
            }
            SpawnStatus::Rejected => {
                let reason = outcome
                    .error
                    .unwrap_or_else(|| "subagent spawn rejected".to_string());
                if let Err(e) = engine.set_error(&task_id, reason).await {
                    warn!(task_id = %task_id, error = %e, "Failed to record rejection");
                }
            }
        }
    }
}

#[async_trait]
impl TransportAdapter for LocalTransport {
    async fn submit_task(&self, submission: TaskSubmission) -> Result<TaskState, TransportError> {
        let task = self
            .engine
            .create_task(NewTask {
                description: submission.description.clone(),
                agent_role: Some(submission.agent_role.clone()),
                session_id: submission.session_id.clone(),
                parent_id: None,
                metadata: submission.metadata.clone(),
            })
            .await?;

        let state = task.state();
        debug!(task_id = %task.id, role = %submission.agent_role, "Task submitted locally");

        tokio::spawn(Self::execute(
            Arc::clone(&self.engine),
            Arc::clone(&self.spawner),
            Arc::clone(&self.roles),
            task.id,
            submission,
        ));

        Ok(state)
    }

    async fn stream_task_updates(
        &self,
        task_id: &str,
    ) -> Result<TaskUpdateStream, TransportError> {
        Ok(self.engine.stream_updates(task_id).await?)
    }

    async fn query_task_state(&self, task_id: &str) -> Result<Option<TaskState>, TransportError> {
        Ok(self.engine.task(task_id).await?.map(|t| t.state()))
    }

    async fn cancel_task(&self, task_id: &str) -> Result<bool, TransportError> {
        // Non-preemptive: a subagent already spawned keeps running under the
        // collaborator's control.
        Ok(self.engine.cancel(task_id).await?)
    }

    async fn list_agents(&self) -> Result<Vec<AgentInfo>, TransportError> {
        Ok(self
            .roles
            .iter()
            .map(|role| AgentInfo {
                id: role.name.clone(),
                name: role.name.clone(),
                description: role.description.clone(),
                capabilities: role.capabilities.clone(),
            })
            .collect())
    }

    async fn list_skills(&self) -> Result<Vec<SkillInfo>, TransportError> {
        // Skills are an execution-node concept; the local transport has none.
        Ok(Vec::new())
    }

    async fn close(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spawn::SpawnOutcome;
    use crate::store::InMemoryTaskStore;
    use crate::task::TaskFilter;

    struct AcceptAll;

    #[async_trait]
    impl SubagentSpawner for AcceptAll {
        async fn spawn(
            &self,
            _request: SpawnRequest,
            _context: SpawnContext,
        ) -> Result<SpawnOutcome, Box<dyn std::error::Error + Send + Sync>> {
            Ok(SpawnOutcome::accepted("child-1"))
        }
    }

    struct RejectAll;

    #[async_trait]
    impl SubagentSpawner for RejectAll {
        async fn spawn(
            &self,
            _request: SpawnRequest,
            _context: SpawnContext,
        ) -> Result<SpawnOutcome, Box<dyn std::error::Error + Send + Sync>> {
            Ok(SpawnOutcome::rejected("no capacity"))
        }
    }

    fn transport(spawner: Arc<dyn SubagentSpawner>) -> LocalTransport {
        let engine = Arc::new(TaskEngine::new(Arc::new(InMemoryTaskStore::new())));
        LocalTransport::new(engine, spawner, Arc::new(RoleRegistry::builtin()))
    }

    fn submission(role: &str, desc: &str) -> TaskSubmission {
        TaskSubmission {
            agent_role: role.into(),
            description: desc.into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn submit_returns_pending_before_execution() {
        let transport = transport(Arc::new(AcceptAll));
        let state = transport
            .submit_task(submission("code-creator", "write a parser"))
            .await
            .unwrap();
        assert_eq!(state.status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn accepted_spawn_completes_the_task() {
        let transport = transport(Arc::new(AcceptAll));
        let state = transport
            .submit_task(submission("code-creator", "write a parser"))
            .await
            .unwrap();

        let stream = transport.stream_task_updates(&state.task_id).await.unwrap();
        let states = stream.collect().await.unwrap();
        let terminal = states.last().unwrap();
        assert_eq!(terminal.status, TaskStatus::Completed);
        assert!(terminal.output.as_deref().unwrap().contains("child-1"));
    }

    #[tokio::test]
    async fn rejected_spawn_fails_the_task_with_the_reason() {
        let transport = transport(Arc::new(RejectAll));
        let state = transport
            .submit_task(submission("test-generator", "cover the edge cases"))
            .await
            .unwrap();

        let stream = transport.stream_task_updates(&state.task_id).await.unwrap();
        let states = stream.collect().await.unwrap();
        let terminal = states.last().unwrap();
        assert_eq!(terminal.status, TaskStatus::Failed);
        assert_eq!(terminal.error.as_deref(), Some("no capacity"));
    }

    #[tokio::test]
    async fn list_agents_reflects_the_role_registry() {
        let transport = transport(Arc::new(AcceptAll));
        let agents = transport.list_agents().await.unwrap();
        assert_eq!(agents.len(), 7);
        assert!(agents.iter().any(|a| a.id == "architecture-advisor"));
        assert!(transport.list_skills().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn query_unknown_task_is_none() {
        let transport = transport(Arc::new(AcceptAll));
        assert!(transport
            .query_task_state("task-missing")
            .await
            .unwrap()
            .is_none());
        let none = transport
            .engine()
            .list(&TaskFilter::default())
            .await
            .unwrap();
        assert!(none.is_empty());
    }
}
