//! Remote execution-node transport
//!
//! HTTP/JSON client for an external execution node. State is observed by
//! polling; the status vocabulary is identical on both sides of the wire,
//! so remote `state` strings deserialize directly into [`TaskStatus`].

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::{AgentInfo, SkillInfo, TaskSubmission, TransportAdapter};
use crate::engine::TaskUpdateStream;
use crate::error::TransportError;
use crate::ids;
use crate::task::{TaskState, TaskStatus};

/// Remote transport settings.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// Execution node base URL, e.g. `http://node:8080`
    pub base_url: String,
    /// User identifier forwarded on session creation
    pub user_id: Option<String>,
    /// Device identifier forwarded on session creation
    pub device_id: Option<String>,
    /// Interval between state polls
    pub poll_interval: Duration,
    /// Per-request timeout
    pub request_timeout: Duration,
}

impl RemoteConfig {
    /// Config with default polling (1 s) and timeout (30 s).
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            user_id: None,
            device_id: None,
            poll_interval: Duration::from_millis(1000),
            request_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    session_id: String,
}

#[derive(Debug, Serialize)]
struct SubmitBody<'a> {
    agent_type: &'a str,
    prompt: &'a str,
    context: Option<&'a str>,
    session_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct TaskStateResponse {
    task_id: String,
    #[allow(dead_code)]
    execution_uuid: Option<String>,
    state: TaskStatus,
    #[allow(dead_code)]
    success: Option<bool>,
    result: Option<String>,
    error: Option<String>,
    #[allow(dead_code)]
    execution_time: Option<f64>,
    #[allow(dead_code)]
    metadata: Option<Value>,
}

impl TaskStateResponse {
    fn into_state(self) -> TaskState {
        let progress = (self.state == TaskStatus::Completed).then_some(100);
        TaskState {
            task_id: self.task_id,
            status: self.state,
            progress,
            output: self.result,
            error: self.error,
            observed_at: ids::now(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CancelResponse {
    success: bool,
    #[allow(dead_code)]
    task_id: String,
}

#[derive(Debug, Deserialize)]
struct AgentResponse {
    agent_type: String,
    name: Option<String>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    capabilities: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SkillResponse {
    skill_id: String,
    name: Option<String>,
    #[serde(default)]
    description: String,
}

/// Transport that submits tasks to a remote execution node and polls for
/// state convergence.
pub struct RemoteTransport {
    client: Client,
    config: RemoteConfig,
    session_id: RwLock<Option<String>>,
}

impl RemoteTransport {
    /// Build the transport. Fails only if the HTTP client cannot be
    /// constructed.
    pub fn new(config: RemoteConfig) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| TransportError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            config,
            session_id: RwLock::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Establish a remote session. Idempotent: a second call without an
    /// intervening `close()` is a no-op.
    pub async fn connect(&self) -> Result<String, TransportError> {
        if let Some(existing) = self.session_id.read().await.clone() {
            return Ok(existing);
        }

        let mut request = self.client.post(self.url("/api/runtime/sessions"));
        if let Some(user_id) = &self.config.user_id {
            request = request.query(&[("user_id", user_id.as_str())]);
        }
        if let Some(device_id) = &self.config.device_id {
            request = request.query(&[("device_id", device_id.as_str())]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| TransportError::Unavailable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(TransportError::Unavailable(format!(
                "session create returned {}",
                response.status()
            )));
        }
        let session: SessionResponse = response
            .json()
            .await
            .map_err(|e| TransportError::InvalidResponse(e.to_string()))?;

        let mut guard = self.session_id.write().await;
        // A concurrent connect may have won; first writer wins.
        let session_id = guard.get_or_insert(session.session_id).clone();
        debug!(session_id = %session_id, "Remote session established");
        Ok(session_id)
    }

    async fn poll_state(
        client: &Client,
        url: &str,
    ) -> Result<TaskStateResponse, TransportError> {
        let response = client
            .get(url)
            .send()
            .await
            .map_err(|e| TransportError::Unavailable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(TransportError::Unavailable(format!(
                "state poll returned {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| TransportError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl TransportAdapter for RemoteTransport {
    async fn submit_task(&self, submission: TaskSubmission) -> Result<TaskState, TransportError> {
        let session_id = self.connect().await?;

        let body = SubmitBody {
            agent_type: &submission.agent_role,
            prompt: &submission.description,
            context: submission.context.as_deref(),
            session_id: &session_id,
        };
        let response = self
            .client
            .post(self.url("/api/runtime/tasks/submit"))
            .json(&body)
            .send()
            .await
            .map_err(|e| TransportError::Unavailable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(TransportError::Unavailable(format!(
                "task submit returned {}",
                response.status()
            )));
        }
        let state: TaskStateResponse = response
            .json()
            .await
            .map_err(|e| TransportError::InvalidResponse(e.to_string()))?;

        debug!(task_id = %state.task_id, "Task submitted remotely");
        Ok(state.into_state())
    }

    /// Poll `/tasks/{id}/state` at the configured interval, yielding one
    /// update per observed status change and terminating once a terminal
    /// status has been yielded.
    ///
    /// The change baseline is `pending` (the status every task has at
    /// submission time), so repeated `pending` polls yield nothing and a
    /// task observed mid-flight yields its current status immediately.
    async fn stream_task_updates(
        &self,
        task_id: &str,
    ) -> Result<TaskUpdateStream, TransportError> {
        let (sender, stream) = TaskUpdateStream::channel();
        let client = self.client.clone();
        let url = self.url(&format!("/api/runtime/tasks/{}/state", task_id));
        let poll_interval = self.config.poll_interval;

        tokio::spawn(async move {
            let mut last = TaskStatus::Pending;
            loop {
                match Self::poll_state(&client, &url).await {
                    Ok(response) => {
                        let status = response.state;
                        if status != last {
                            last = status;
                            if !sender.send(response.into_state()) {
                                return;
                            }
                            if status.is_terminal() {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        // The caller must resubscribe after a failed poll.
                        sender.fail(e);
                        return;
                    }
                }
                tokio::time::sleep(poll_interval).await;
            }
        });

        Ok(stream)
    }

    async fn query_task_state(&self, task_id: &str) -> Result<Option<TaskState>, TransportError> {
        let url = self.url(&format!("/api/runtime/tasks/{}/state", task_id));
        match Self::poll_state(&self.client, &url).await {
            Ok(response) => Ok(Some(response.into_state())),
            Err(e) => {
                debug!(task_id = %task_id, error = %e, "State query failed; returning none");
                Ok(None)
            }
        }
    }

    async fn cancel_task(&self, task_id: &str) -> Result<bool, TransportError> {
        let session_id = self.session_id.read().await.clone().unwrap_or_default();
        let url = self.url(&format!("/api/runtime/tasks/{}/cancel", task_id));
        let result = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "session_id": session_id }))
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                let cancel: CancelResponse = response
                    .json()
                    .await
                    .map_err(|e| TransportError::InvalidResponse(e.to_string()))?;
                Ok(cancel.success)
            }
            Ok(response) => {
                warn!(task_id = %task_id, status = %response.status(), "Remote cancel refused");
                Ok(false)
            }
            Err(e) => {
                warn!(task_id = %task_id, error = %e, "Remote cancel unreachable");
                Ok(false)
            }
        }
    }

    async fn list_agents(&self) -> Result<Vec<AgentInfo>, TransportError> {
        let session_id = self.connect().await?;
        let response = self
            .client
            .get(self.url("/api/runtime/agents"))
            .query(&[("session_id", session_id.as_str())])
            .send()
            .await
            .map_err(|e| TransportError::Unavailable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(TransportError::Unavailable(format!(
                "agent list returned {}",
                response.status()
            )));
        }
        let agents: Vec<AgentResponse> = response
            .json()
            .await
            .map_err(|e| TransportError::InvalidResponse(e.to_string()))?;
        Ok(agents
            .into_iter()
            .map(|a| AgentInfo {
                name: a.name.unwrap_or_else(|| a.agent_type.clone()),
                id: a.agent_type,
                description: a.description,
                capabilities: a.capabilities,
            })
            .collect())
    }

    async fn list_skills(&self) -> Result<Vec<SkillInfo>, TransportError> {
        let session_id = self.connect().await?;
        let response = self
            .client
            .get(self.url("/api/runtime/skills"))
            .query(&[("session_id", session_id.as_str())])
            .send()
            .await
            .map_err(|e| TransportError::Unavailable(e.to_string()))?;
        if !response.status().is_success() {
            return Err(TransportError::Unavailable(format!(
                "skill list returned {}",
                response.status()
            )));
        }
        let skills: Vec<SkillResponse> = response
            .json()
            .await
            .map_err(|e| TransportError::InvalidResponse(e.to_string()))?;
        Ok(skills
            .into_iter()
            .map(|s| SkillInfo {
                name: s.name.unwrap_or_else(|| s.skill_id.clone()),
                id: s.skill_id,
                description: s.description,
            })
            .collect())
    }

    /// Drop the cached session id. The remote session is not revoked; the
    /// node owns its expiry.
    async fn close(&self) -> Result<(), TransportError> {
        self.session_id.write().await.take();
        Ok(())
    }
}
