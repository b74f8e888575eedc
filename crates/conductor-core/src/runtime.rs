//! Runtime facade
//!
//! The single front door over a transport adapter: routes adapter
//! operations, counts submissions, reports health, and (when a security
//! service is attached) gates every submission through permission and
//! agent-access checks.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use crate::engine::{TaskEngine, TaskUpdateStream};
use crate::error::{Error, TransportError};
use crate::security::{Permission, SecurityContext, SecurityService};
use crate::task::{TaskFilter, TaskState, TaskStatus};
use crate::transport::{AgentInfo, SkillInfo, TaskSubmission, TransportAdapter};

/// How this runtime is deployed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeploymentMode {
    /// Single process, local transport only
    LocalOnly,
    /// Local process that may hand work to a remote execution node
    RemoteEnabled,
    /// Member of an execution cluster
    DistributedCluster,
}

impl fmt::Display for DeploymentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LocalOnly => write!(f, "local-only"),
            Self::RemoteEnabled => write!(f, "remote-enabled"),
            Self::DistributedCluster => write!(f, "distributed-cluster"),
        }
    }
}

/// Snapshot returned by [`Runtime::get_status`].
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeStatus {
    /// Crate version
    pub version: String,
    /// Seconds since the runtime was built
    pub uptime_seconds: i64,
    /// Tasks currently `running`
    pub active_tasks: usize,
    /// Tasks submitted through this runtime since start
    pub total_tasks: u64,
    /// Deployment mode
    pub mode: DeploymentMode,
    /// Whether the last delegated operation succeeded
    pub healthy: bool,
}

/// Facade over one transport adapter.
pub struct Runtime {
    adapter: Arc<dyn TransportAdapter>,
    mode: DeploymentMode,
    started_at: chrono::DateTime<chrono::Utc>,
    total_tasks: AtomicU64,
    healthy: AtomicBool,
    engine: Option<Arc<TaskEngine>>,
    security: Option<(Arc<SecurityService>, SecurityContext)>,
}

impl Runtime {
    /// Wrap an adapter.
    pub fn new(adapter: Arc<dyn TransportAdapter>, mode: DeploymentMode) -> Self {
        Self {
            adapter,
            mode,
            started_at: crate::ids::now(),
            total_tasks: AtomicU64::new(0),
            healthy: AtomicBool::new(true),
            engine: None,
            security: None,
        }
    }

    /// Attach the engine backing the adapter so `get_status` can count
    /// running tasks.
    #[must_use]
    pub fn with_engine(mut self, engine: Arc<TaskEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Gate submissions through a security service acting for `ctx`.
    #[must_use]
    pub fn with_security(
        mut self,
        security: Arc<SecurityService>,
        ctx: SecurityContext,
    ) -> Self {
        self.security = Some((security, ctx));
        self
    }

    /// Deployment mode.
    #[must_use]
    pub fn mode(&self) -> DeploymentMode {
        self.mode
    }

    fn track<T>(&self, result: Result<T, TransportError>) -> Result<T, TransportError> {
        self.healthy.store(result.is_ok(), Ordering::Relaxed);
        result
    }

    /// Submit a task through the adapter, after the security gate when one
    /// is attached. Increments the total-task counter on success.
    pub async fn submit_task(&self, submission: TaskSubmission) -> Result<TaskState, Error> {
        if let Some((security, ctx)) = &self.security {
            let permission = security
                .check_permission(ctx, Permission::TaskSubmit, None)
                .await?;
            if !permission.allowed {
                let reason = permission.reason.unwrap_or_else(|| "denied".into());
                warn!(role = %submission.agent_role, reason = %reason, "Submission refused");
                return Err(Error::PermissionDenied(reason));
            }
            let agent = security
                .check_agent_access(ctx, &submission.agent_role)
                .await?;
            if !agent.allowed {
                let reason = agent.reason.unwrap_or_else(|| "denied".into());
                warn!(role = %submission.agent_role, reason = %reason, "Agent dispatch refused");
                return Err(Error::PermissionDenied(reason));
            }
        }

        let state = self.track(self.adapter.submit_task(submission).await)?;
        self.total_tasks.fetch_add(1, Ordering::Relaxed);
        info!(task_id = %state.task_id, mode = %self.mode, "Task submitted");
        Ok(state)
    }

    /// Stream a task's state updates.
    pub async fn stream_task_updates(&self, task_id: &str) -> Result<TaskUpdateStream, Error> {
        Ok(self.track(self.adapter.stream_task_updates(task_id).await)?)
    }

    /// Current state of a task; `None` for unknown ids.
    pub async fn query_task_state(&self, task_id: &str) -> Result<Option<TaskState>, Error> {
        Ok(self.track(self.adapter.query_task_state(task_id).await)?)
    }

    /// Request cancellation of a task.
    pub async fn cancel_task(&self, task_id: &str) -> Result<bool, Error> {
        Ok(self.track(self.adapter.cancel_task(task_id).await)?)
    }

    /// Agents the active transport can execute with.
    pub async fn list_agents(&self) -> Result<Vec<AgentInfo>, Error> {
        Ok(self.track(self.adapter.list_agents().await)?)
    }

    /// Skills the active transport can execute.
    pub async fn list_skills(&self) -> Result<Vec<SkillInfo>, Error> {
        Ok(self.track(self.adapter.list_skills().await)?)
    }

    /// Close the underlying transport.
    pub async fn close(&self) -> Result<(), Error> {
        Ok(self.adapter.close().await?)
    }

    /// Health and throughput snapshot.
    pub async fn get_status(&self) -> RuntimeStatus {
        let active_tasks = match &self.engine {
            Some(engine) => engine
                .list(&TaskFilter {
                    status: Some(TaskStatus::Running),
                    session_id: None,
                })
                .await
                .map(|tasks| tasks.len())
                .unwrap_or(0),
            None => 0,
        };
        RuntimeStatus {
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: (crate::ids::now() - self.started_at).num_seconds(),
            active_tasks,
            total_tasks: self.total_tasks.load(Ordering::Relaxed),
            mode: self.mode,
            healthy: self.healthy.load(Ordering::Relaxed),
        }
    }
}
