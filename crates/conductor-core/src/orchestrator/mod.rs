//! Workflow orchestrator
//!
//! Lowers a list of role-tagged steps into tasks with a bidirectional
//! dependency graph, rejects cycles at creation time, then executes the DAG
//! in parallel waves: every dispatchable task runs concurrently and the
//! loop waits for the wave before recomputing the ready set.
//!
//! Dispatch of one task follows the engine protocol
//! (`pending -> planning -> running`, spawn, `completed | failed`); anything
//! thrown during dispatch becomes a task-level failure, never a loop crash.

use dashmap::DashMap;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine::{NewTask, TaskEngine};
use crate::error::{EngineError, WorkflowError};
use crate::event_bus::{EventBus, WorkflowEvent};
use crate::ids;
use crate::security::{SecurityContext, SecurityService};
use crate::spawn::{SpawnContext, SpawnRequest, SpawnStatus, SubagentSpawner};
use crate::task::TaskStatus;

/// Separator between a task's description and each prerequisite's output in
/// the assembled dispatch input.
const PREREQUISITE_SEPARATOR: &str = "\n\n--- prerequisite output ---\n";

/// One step of a submitted workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// Role executing the step
    pub agent_role: String,
    /// Task description; also the name dependencies match against
    pub description: String,
    /// Descriptions of steps this one depends on
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl WorkflowStep {
    /// Step without dependencies.
    #[must_use]
    pub fn new(agent_role: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            agent_role: agent_role.into(),
            description: description.into(),
            depends_on: Vec::new(),
        }
    }

    /// Add a dependency by step description.
    #[must_use]
    pub fn depends_on(mut self, description: impl Into<String>) -> Self {
        self.depends_on.push(description.into());
        self
    }
}

/// Workflow lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    /// Created, not yet executed
    Pending,
    /// Execution loop in progress
    Running,
    /// Every task completed
    Completed,
    /// At least one task failed or the loop got stuck
    Failed,
    /// Cancelled by the caller
    Cancelled,
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// A task owned by a workflow: the id plus the step fields dispatch needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowTask {
    /// Task id in the engine
    pub task_id: String,
    /// Role executing the task
    pub agent_role: String,
    /// Step description
    pub description: String,
}

/// A DAG of tasks with dependency edges.
///
/// The graph is bidirectional: prerequisites for dispatch, dependents for
/// impact queries. The dispatch loop is the single writer of a workflow's
/// maps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    /// Workflow identifier
    pub id: Uuid,
    /// Current status
    pub status: WorkflowStatus,
    /// Owned tasks keyed by task id
    pub tasks: HashMap<String, WorkflowTask>,
    /// Task ids in submission order
    pub task_order: Vec<String>,
    /// task id -> prerequisite task ids
    pub prerequisites: HashMap<String, HashSet<String>>,
    /// task id -> dependent task ids
    pub dependents: HashMap<String, HashSet<String>>,
}

/// The workflow orchestrator.
pub struct Orchestrator {
    engine: Arc<TaskEngine>,
    spawner: Arc<dyn SubagentSpawner>,
    event_bus: EventBus,
    security: Option<(Arc<SecurityService>, SecurityContext)>,
    workflows: DashMap<Uuid, Workflow>,
    cancel_tokens: DashMap<Uuid, CancellationToken>,
}

impl Orchestrator {
    /// Create an orchestrator over the given engine and spawn collaborator.
    pub fn new(engine: Arc<TaskEngine>, spawner: Arc<dyn SubagentSpawner>) -> Self {
        Self {
            engine,
            spawner,
            event_bus: EventBus::default(),
            security: None,
            workflows: DashMap::new(),
            cancel_tokens: DashMap::new(),
        }
    }

    /// Gate every dispatch through a security service acting for `ctx`.
    #[must_use]
    pub fn with_security(
        mut self,
        security: Arc<SecurityService>,
        ctx: SecurityContext,
    ) -> Self {
        self.security = Some((security, ctx));
        self
    }

    /// The bus workflow progress is published on.
    #[must_use]
    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// The shared engine.
    #[must_use]
    pub fn engine(&self) -> &Arc<TaskEngine> {
        &self.engine
    }

    /// Snapshot of a workflow.
    #[must_use]
    pub fn get_workflow(&self, id: Uuid) -> Option<Workflow> {
        self.workflows.get(&id).map(|w| w.clone())
    }

    /// Lower steps into a workflow: create a `pending` task per step and
    /// build the dependency maps.
    ///
    /// Dependencies are resolved by exact description match against the
    /// other steps; a name matching no step is dropped with a warning.
    /// A cyclic graph is rejected with [`WorkflowError::Cyclic`] before any
    /// task is created.
    pub async fn create_workflow(
        &self,
        steps: Vec<WorkflowStep>,
    ) -> Result<Uuid, WorkflowError> {
        // Resolve dependency edges on step indices first so the cycle check
        // runs before any task exists.
        let mut edges: Vec<HashSet<usize>> = vec![HashSet::new(); steps.len()];
        for (i, step) in steps.iter().enumerate() {
            for dep in &step.depends_on {
                match steps
                    .iter()
                    .enumerate()
                    .find(|(j, other)| *j != i && other.description == *dep)
                {
                    Some((j, _)) => {
                        edges[i].insert(j);
                    }
                    None => {
                        warn!(dependency = %dep, step = %step.description, "Dependency matches no step; dropped");
                    }
                }
            }
        }

        if is_cyclic(&edges) {
            return Err(WorkflowError::Cyclic);
        }

        let workflow_id = ids::new_workflow_id();
        let mut tasks = HashMap::new();
        let mut task_order = Vec::with_capacity(steps.len());
        for step in &steps {
            let task = self
                .engine
                .create_task(NewTask {
                    description: step.description.clone(),
                    agent_role: Some(step.agent_role.clone()),
                    ..Default::default()
                })
                .await?;
            task_order.push(task.id.clone());
            tasks.insert(
                task.id.clone(),
                WorkflowTask {
                    task_id: task.id.clone(),
                    agent_role: step.agent_role.clone(),
                    description: step.description.clone(),
                },
            );
        }

        let mut prerequisites: HashMap<String, HashSet<String>> = HashMap::new();
        let mut dependents: HashMap<String, HashSet<String>> = HashMap::new();
        for (i, deps) in edges.iter().enumerate() {
            let task_id = &task_order[i];
            let entry = prerequisites.entry(task_id.clone()).or_default();
            for &j in deps {
                let dep_id = &task_order[j];
                entry.insert(dep_id.clone());
                dependents
                    .entry(dep_id.clone())
                    .or_default()
                    .insert(task_id.clone());
            }
        }

        let workflow = Workflow {
            id: workflow_id,
            status: WorkflowStatus::Pending,
            tasks,
            task_order,
            prerequisites,
            dependents,
        };
        info!(workflow_id = %workflow_id, steps = workflow.task_order.len(), "Workflow created");
        self.workflows.insert(workflow_id, workflow);
        self.cancel_tokens
            .insert(workflow_id, CancellationToken::new());
        Ok(workflow_id)
    }

    /// Run the workflow to a terminal status.
    ///
    /// Each iteration dispatches every `pending` task whose prerequisites
    /// are all terminal, concurrently, then waits for the wave. An empty
    /// ready set with non-terminal tasks remaining trips the
    /// [`WorkflowError::Stuck`] safety net.
    pub async fn execute_workflow(&self, id: Uuid) -> Result<WorkflowStatus, WorkflowError> {
        let workflow = self
            .get_workflow(id)
            .ok_or_else(|| WorkflowError::NotFound(id.to_string()))?;
        let cancel_token = self
            .cancel_tokens
            .get(&id)
            .map(|t| t.clone())
            .unwrap_or_default();

        self.set_workflow_status(id, WorkflowStatus::Running);
        self.event_bus
            .publish(WorkflowEvent::WorkflowStarted { workflow_id: id });

        loop {
            if cancel_token.is_cancelled() {
                break;
            }

            let mut statuses = HashMap::new();
            for task_id in &workflow.task_order {
                let task = self
                    .engine
                    .task(task_id)
                    .await?
                    .ok_or_else(|| task_vanished(task_id))?;
                statuses.insert(task_id.clone(), task.status);
            }

            let ready: Vec<&WorkflowTask> = workflow
                .task_order
                .iter()
                .filter(|task_id| statuses[*task_id] == TaskStatus::Pending)
                .filter(|task_id| {
                    workflow
                        .prerequisites
                        .get(*task_id)
                        .map(|prereqs| {
                            prereqs.iter().all(|p| {
                                matches!(
                                    statuses[p],
                                    TaskStatus::Completed | TaskStatus::Failed
                                )
                            })
                        })
                        .unwrap_or(true)
                })
                .map(|task_id| &workflow.tasks[task_id])
                .collect();

            if ready.is_empty() {
                let all_terminal = statuses.values().all(|s| s.is_terminal());
                if all_terminal {
                    break;
                }
                warn!(workflow_id = %id, "No dispatchable tasks but non-terminal tasks remain");
                self.set_workflow_status(id, WorkflowStatus::Failed);
                self.event_bus.publish(WorkflowEvent::WorkflowFailed {
                    workflow_id: id,
                    error: "workflow stuck".to_string(),
                });
                return Err(WorkflowError::Stuck(id.to_string()));
            }

            debug!(workflow_id = %id, wave = ready.len(), "Dispatching wave");
            let wave = join_all(
                ready
                    .into_iter()
                    .map(|task| self.dispatch_task(&workflow, task)),
            )
            .await;
            for result in wave {
                if let Err(e) = result {
                    self.set_workflow_status(id, WorkflowStatus::Failed);
                    self.event_bus.publish(WorkflowEvent::WorkflowFailed {
                        workflow_id: id,
                        error: e.to_string(),
                    });
                    return Err(e);
                }
            }
        }

        let status = self.aggregate_status(&workflow, &cancel_token).await?;
        self.set_workflow_status(id, status);
        match status {
            WorkflowStatus::Completed => {
                info!(workflow_id = %id, "Workflow completed");
                self.event_bus
                    .publish(WorkflowEvent::WorkflowCompleted { workflow_id: id });
            }
            WorkflowStatus::Cancelled => {
                self.event_bus
                    .publish(WorkflowEvent::WorkflowCancelled { workflow_id: id });
            }
            _ => {
                info!(workflow_id = %id, status = %status, "Workflow finished");
                self.event_bus.publish(WorkflowEvent::WorkflowFailed {
                    workflow_id: id,
                    error: "one or more tasks failed".to_string(),
                });
            }
        }
        Ok(status)
    }

    /// Cancel a workflow and every non-terminal task it owns.
    ///
    /// Cooperative and non-preemptive: a task currently inside the dispatch
    /// routine runs that routine to its end, and the record already reflects
    /// the cancellation.
    pub async fn cancel_workflow(&self, id: Uuid) -> Result<(), WorkflowError> {
        let workflow = self
            .get_workflow(id)
            .ok_or_else(|| WorkflowError::NotFound(id.to_string()))?;

        if let Some(token) = self.cancel_tokens.get(&id) {
            token.cancel();
        }
        for task_id in &workflow.task_order {
            self.engine.cancel(task_id).await?;
        }
        self.set_workflow_status(id, WorkflowStatus::Cancelled);
        info!(workflow_id = %id, "Workflow cancelled");
        self.event_bus
            .publish(WorkflowEvent::WorkflowCancelled { workflow_id: id });
        Ok(())
    }

    fn set_workflow_status(&self, id: Uuid, status: WorkflowStatus) {
        if let Some(mut workflow) = self.workflows.get_mut(&id) {
            workflow.status = status;
        }
    }

    async fn aggregate_status(
        &self,
        workflow: &Workflow,
        cancel_token: &CancellationToken,
    ) -> Result<WorkflowStatus, WorkflowError> {
        if cancel_token.is_cancelled() {
            return Ok(WorkflowStatus::Cancelled);
        }
        let mut any_failed = false;
        for task_id in &workflow.task_order {
            let task = self
                .engine
                .task(task_id)
                .await?
                .ok_or_else(|| task_vanished(task_id))?;
            if task.status == TaskStatus::Failed {
                any_failed = true;
            }
        }
        Ok(if any_failed {
            WorkflowStatus::Failed
        } else {
            WorkflowStatus::Completed
        })
    }

    /// Dispatch one task: `planning -> running`, assemble the input from the
    /// description and completed prerequisites' outputs, call the spawn
    /// collaborator, and land on `completed` or `failed`.
    ///
    /// Every failure mode in here becomes a task-level `failed`; a task
    /// cancelled mid-dispatch makes the remaining engine calls benign
    /// no-ops. Only storage failures escape, and those are workflow-fatal.
    async fn dispatch_task(
        &self,
        workflow: &Workflow,
        task: &WorkflowTask,
    ) -> Result<(), WorkflowError> {
        let task_id = &task.task_id;

        if !self
            .advance(task_id, TaskStatus::Planning)
            .await?
        {
            return Ok(());
        }

        if let Some((security, ctx)) = &self.security {
            match security.check_agent_access(ctx, &task.agent_role).await {
                Ok(decision) if decision.allowed => {}
                Ok(decision) => {
                    let reason = decision
                        .reason
                        .unwrap_or_else(|| "agent access denied".to_string());
                    return self.fail_task(workflow.id, task_id, reason).await;
                }
                Err(e) => {
                    return self.fail_task(workflow.id, task_id, e.to_string()).await;
                }
            }
        }

        if !self
            .advance(task_id, TaskStatus::Running)
            .await?
        {
            return Ok(());
        }
        self.event_bus.publish(WorkflowEvent::TaskDispatched {
            workflow_id: workflow.id,
            task_id: task_id.clone(),
            agent_role: task.agent_role.clone(),
        });

        let input = self.assemble_input(workflow, task).await?;

        let request = SpawnRequest {
            task: input,
            label: task.description.clone(),
            agent_id: task.agent_role.clone(),
            model: None,
            thinking: None,
        };
        let outcome = self
            .spawner
            .spawn(request, SpawnContext::default())
            .await;

        match outcome {
            Ok(outcome) if outcome.status == SpawnStatus::Accepted => {
                if let Some(key) = &outcome.child_session_key {
                    match self.engine.assign_session(task_id, key.clone()).await {
                        Ok(_) | Err(EngineError::TerminalImmutable(_)) => {}
                        Err(e) => return Err(e.into()),
                    }
                }
                let output = outcome
                    .child_session_key
                    .map(|key| format!("subagent accepted: {}", key))
                    .unwrap_or_else(|| "subagent accepted".to_string());
                match self.engine.set_output(task_id, output).await {
                    Ok(_) => {}
                    Err(EngineError::TerminalImmutable(_)) => {
                        debug!(task_id = %task_id, "Task terminal before output; skipped");
                        return Ok(());
                    }
                    Err(e) => return Err(e.into()),
                }
                if self.advance(task_id, TaskStatus::Completed).await? {
                    self.event_bus.publish(WorkflowEvent::TaskCompleted {
                        workflow_id: workflow.id,
                        task_id: task_id.clone(),
                    });
                }
                Ok(())
            }
            Ok(outcome) => {
                let reason = outcome
                    .error
                    .unwrap_or_else(|| "subagent spawn rejected".to_string());
                self.fail_task(workflow.id, task_id, reason).await
            }
            Err(e) => self.fail_task(workflow.id, task_id, e.to_string()).await,
        }
    }

    /// Apply a status transition, treating an illegal edge (the task was
    /// cancelled or finished underneath us) as a benign `false`.
    async fn advance(&self, task_id: &str, to: TaskStatus) -> Result<bool, WorkflowError> {
        match self.engine.update_status(task_id, to).await {
            Ok(_) => Ok(true),
            Err(EngineError::InvalidTransition { .. }) => {
                debug!(task_id = %task_id, to = %to, "Transition skipped; task moved on");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// The dispatch input: the task description followed by every completed
    /// prerequisite's output, each behind a separator.
    async fn assemble_input(
        &self,
        workflow: &Workflow,
        task: &WorkflowTask,
    ) -> Result<String, WorkflowError> {
        let mut input = task.description.clone();
        let Some(prereqs) = workflow.prerequisites.get(&task.task_id) else {
            return Ok(input);
        };
        // Deterministic order: submission order, not set order.
        for task_id in &workflow.task_order {
            if !prereqs.contains(task_id) {
                continue;
            }
            let prereq = self
                .engine
                .task(task_id)
                .await?
                .ok_or_else(|| task_vanished(task_id))?;
            if prereq.status == TaskStatus::Completed {
                if let Some(output) = &prereq.output {
                    input.push_str(PREREQUISITE_SEPARATOR);
                    input.push_str(output);
                }
            }
        }
        Ok(input)
    }

    /// Record a dispatch failure on the task. An illegal transition means
    /// the task was cancelled underneath us; only storage failures escape.
    async fn fail_task(
        &self,
        workflow_id: Uuid,
        task_id: &str,
        reason: String,
    ) -> Result<(), WorkflowError> {
        warn!(task_id = %task_id, reason = %reason, "Task dispatch failed");
        match self.engine.set_error(task_id, reason.clone()).await {
            Ok(_) => {
                self.event_bus.publish(WorkflowEvent::TaskFailed {
                    workflow_id,
                    task_id: task_id.to_string(),
                    error: reason,
                });
                Ok(())
            }
            Err(EngineError::InvalidTransition { .. }) => {
                debug!(task_id = %task_id, "Failure not recorded; task moved on");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// A workflow-owned task disappeared from the store mid-run. Treated as a
/// storage failure (workflow-fatal).
fn task_vanished(task_id: &str) -> WorkflowError {
    WorkflowError::Store(crate::error::StoreError::Unavailable(format!(
        "task record {} vanished",
        task_id
    )))
}

/// Kahn's algorithm over step-index edges: the graph is cyclic iff some
/// node never reaches in-degree zero.
fn is_cyclic(edges: &[HashSet<usize>]) -> bool {
    let n = edges.len();
    // edges[i] holds prerequisites of i, so i's in-degree is edges[i].len().
    let mut in_degree: Vec<usize> = edges.iter().map(HashSet::len).collect();

    let mut queue: Vec<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    let mut visited = 0;
    while let Some(node) = queue.pop() {
        visited += 1;
        for (i, deps) in edges.iter().enumerate() {
            if deps.contains(&node) {
                in_degree[i] -= 1;
                if in_degree[i] == 0 {
                    queue.push(i);
                }
            }
        }
    }
    visited != n
}

#[cfg(test)]
mod tests;
