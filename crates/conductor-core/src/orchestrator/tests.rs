
use super::*;
use crate::spawn::SpawnOutcome;
use crate::store::InMemoryTaskStore;
use crate::task::TaskEventKind;
use async_trait::async_trait;
use std::collections::HashMap as StdHashMap;
use std::sync::Mutex as StdMutex;

/// Spawner that accepts everything, optionally rejecting labeled steps.
struct ScriptedSpawner {
    rejections: StdHashMap<String, String>,
    calls: StdMutex<Vec<String>>,
}

impl ScriptedSpawner {
    fn accept_all() -> Self {
        Self {
            rejections: StdHashMap::new(),
            calls: StdMutex::new(Vec::new()),
        }
    }

    fn rejecting(label: &str, reason: &str) -> Self {
        Self {
            rejections: StdHashMap::from([(label.to_string(), reason.to_string())]),
            calls: StdMutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SubagentSpawner for ScriptedSpawner {
    async fn spawn(
        &self,
        request: SpawnRequest,
        _context: SpawnContext,
    ) -> Result<SpawnOutcome, Box<dyn std::error::Error + Send + Sync>> {
        self.calls.lock().unwrap().push(request.label.clone());
        match self.rejections.get(&request.label) {
            Some(reason) => Ok(SpawnOutcome::rejected(reason.clone())),
            None => Ok(SpawnOutcome::accepted(format!("agent-{}", request.label))),
        }
    }
}

/// Spawner whose spawn call itself blows up.
struct PanickySpawner;

#[async_trait]
impl SubagentSpawner for PanickySpawner {
    async fn spawn(
        &self,
        _request: SpawnRequest,
        _context: SpawnContext,
    ) -> Result<SpawnOutcome, Box<dyn std::error::Error + Send + Sync>> {
        Err("collaborator exploded".into())
    }
}

fn orchestrator(spawner: Arc<dyn SubagentSpawner>) -> Orchestrator {
    let engine = Arc::new(TaskEngine::new(Arc::new(InMemoryTaskStore::new())));
    Orchestrator::new(engine, spawner)
}

fn pipeline_steps() -> Vec<WorkflowStep> {
    vec![
        WorkflowStep::new("architecture-advisor", "design the service"),
        WorkflowStep::new("code-creator", "implement the service").depends_on("design the service"),
        WorkflowStep::new("test-generator", "test the service").depends_on("implement the service"),
        WorkflowStep::new("code-reviewer", "review the service").depends_on("test the service"),
    ]
}

#[tokio::test]
async fn happy_pipeline_completes_every_task() {
    let spawner = Arc::new(ScriptedSpawner::accept_all());
    let orchestrator = orchestrator(spawner.clone() as Arc<dyn SubagentSpawner>);

    let id = orchestrator
        .create_workflow(pipeline_steps())
        .await
        .unwrap();
    let status = orchestrator.execute_workflow(id).await.unwrap();
    assert_eq!(status, WorkflowStatus::Completed);

    let workflow = orchestrator.get_workflow(id).unwrap();
    assert_eq!(workflow.status, WorkflowStatus::Completed);

    for task_id in &workflow.task_order {
        let task = orchestrator.engine().task(task_id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed, "{}", task.description);

        let events = orchestrator.engine().events(task_id).await.unwrap();
        let kinds: Vec<TaskEventKind> = events.iter().map(|e| e.kind).collect();
        assert_eq!(kinds[0], TaskEventKind::Created);
        assert!(kinds.contains(&TaskEventKind::OutputAdded));

        let transitions: Vec<(TaskStatus, TaskStatus)> = events
            .iter()
            .filter(|e| e.kind == TaskEventKind::StatusChanged)
            .map(|e| (e.old_status.unwrap(), e.new_status.unwrap()))
            .collect();
        assert_eq!(
            transitions,
            vec![
                (TaskStatus::Pending, TaskStatus::Planning),
                (TaskStatus::Planning, TaskStatus::Running),
                (TaskStatus::Running, TaskStatus::Completed),
            ]
        );
    }

    // Dependency order: each step dispatched after the one it depends on.
    let calls = spawner.calls();
    assert_eq!(
        calls,
        vec![
            "design the service",
            "implement the service",
            "test the service",
            "review the service"
        ]
    );
}

#[tokio::test]
async fn prerequisite_outputs_are_threaded_into_the_input() {
    struct CapturingSpawner {
        inputs: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl SubagentSpawner for CapturingSpawner {
        async fn spawn(
            &self,
            request: SpawnRequest,
            _context: SpawnContext,
        ) -> Result<SpawnOutcome, Box<dyn std::error::Error + Send + Sync>> {
            self.inputs.lock().unwrap().push(request.task.clone());
            Ok(SpawnOutcome::accepted(format!("agent-{}", request.label)))
        }
    }

    let spawner = Arc::new(CapturingSpawner {
        inputs: StdMutex::new(Vec::new()),
    });
    let orchestrator = orchestrator(spawner.clone() as Arc<dyn SubagentSpawner>);

    let id = orchestrator
        .create_workflow(vec![
            WorkflowStep::new("code-creator", "produce the library"),
            WorkflowStep::new("code-reviewer", "review the library")
                .depends_on("produce the library"),
        ])
        .await
        .unwrap();
    orchestrator.execute_workflow(id).await.unwrap();

    let inputs = spawner.inputs.lock().unwrap().clone();
    assert_eq!(inputs.len(), 2);
    assert_eq!(inputs[0], "produce the library");
    assert!(inputs[1].starts_with("review the library"));
    // The first task's output rides along behind the separator.
    assert!(inputs[1].contains("subagent accepted: agent-produce the library"));
}

#[tokio::test]
async fn cyclic_workflow_is_rejected_without_creating_tasks() {
    let orchestrator = orchestrator(Arc::new(ScriptedSpawner::accept_all()));

    let err = orchestrator
        .create_workflow(vec![
            WorkflowStep::new("code-creator", "step x").depends_on("step y"),
            WorkflowStep::new("code-creator", "step y").depends_on("step x"),
        ])
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::Cyclic));

    // No tasks were created, no events journaled.
    let tasks = orchestrator
        .engine()
        .list(&crate::task::TaskFilter::default())
        .await
        .unwrap();
    assert!(tasks.is_empty());
}

#[tokio::test]
async fn self_cycle_through_a_longer_chain_is_rejected() {
    let orchestrator = orchestrator(Arc::new(ScriptedSpawner::accept_all()));
    let err = orchestrator
        .create_workflow(vec![
            WorkflowStep::new("code-creator", "a").depends_on("c"),
            WorkflowStep::new("code-creator", "b").depends_on("a"),
            WorkflowStep::new("code-creator", "c").depends_on("b"),
        ])
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::Cyclic));
}

#[tokio::test]
async fn mid_wave_failure_is_isolated() {
    let spawner = Arc::new(ScriptedSpawner::rejecting("step b", "tool crashed"));
    let orchestrator = orchestrator(spawner.clone() as Arc<dyn SubagentSpawner>);

    let id = orchestrator
        .create_workflow(vec![
            WorkflowStep::new("architecture-advisor", "step a"),
            WorkflowStep::new("code-creator", "step b").depends_on("step a"),
            WorkflowStep::new("test-generator", "step c").depends_on("step a"),
        ])
        .await
        .unwrap();
    let status = orchestrator.execute_workflow(id).await.unwrap();
    assert_eq!(status, WorkflowStatus::Failed);

    let workflow = orchestrator.get_workflow(id).unwrap();
    let mut by_description = StdHashMap::new();
    for task_id in &workflow.task_order {
        let task = orchestrator.engine().task(task_id).await.unwrap().unwrap();
        by_description.insert(task.description.clone(), task);
    }

    assert_eq!(by_description["step a"].status, TaskStatus::Completed);
    assert_eq!(by_description["step b"].status, TaskStatus::Failed);
    assert_eq!(
        by_description["step b"].error.as_deref(),
        Some("tool crashed")
    );
    assert_eq!(by_description["step c"].status, TaskStatus::Completed);
}

#[tokio::test]
async fn collaborator_exceptions_become_task_failures() {
    let orchestrator = orchestrator(Arc::new(PanickySpawner));

    let id = orchestrator
        .create_workflow(vec![WorkflowStep::new("code-creator", "fragile step")])
        .await
        .unwrap();
    let status = orchestrator.execute_workflow(id).await.unwrap();
    assert_eq!(status, WorkflowStatus::Failed);

    let workflow = orchestrator.get_workflow(id).unwrap();
    let task = orchestrator
        .engine()
        .task(&workflow.task_order[0])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.error.as_deref(), Some("collaborator exploded"));
}

#[tokio::test]
async fn unmatched_dependency_names_are_dropped() {
    let spawner = Arc::new(ScriptedSpawner::accept_all());
    let orchestrator = orchestrator(spawner.clone() as Arc<dyn SubagentSpawner>);

    let id = orchestrator
        .create_workflow(vec![
            WorkflowStep::new("code-creator", "real step").depends_on("no such step")
        ])
        .await
        .unwrap();

    let workflow = orchestrator.get_workflow(id).unwrap();
    let prereqs = &workflow.prerequisites[&workflow.task_order[0]];
    assert!(prereqs.is_empty());

    // The dropped edge leaves the step immediately dispatchable.
    let status = orchestrator.execute_workflow(id).await.unwrap();
    assert_eq!(status, WorkflowStatus::Completed);
}

#[tokio::test]
async fn cancel_workflow_cancels_every_non_terminal_task() {
    let orchestrator = orchestrator(Arc::new(ScriptedSpawner::accept_all()));

    let id = orchestrator
        .create_workflow(pipeline_steps())
        .await
        .unwrap();
    orchestrator.cancel_workflow(id).await.unwrap();

    let workflow = orchestrator.get_workflow(id).unwrap();
    assert_eq!(workflow.status, WorkflowStatus::Cancelled);
    for task_id in &workflow.task_order {
        let task = orchestrator.engine().task(task_id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Cancelled);
    }

    // Executing a cancelled workflow is a no-op ending in cancellation.
    let status = orchestrator.execute_workflow(id).await.unwrap();
    assert_eq!(status, WorkflowStatus::Cancelled);
}

#[tokio::test]
async fn security_gate_fails_denied_dispatches() {
    use crate::security::{AuthProvider, SecurityContext, SecurityService};

    let security = Arc::new(SecurityService::new());
    let user = security
        .authenticate_user(AuthProvider::Local, &StdHashMap::new())
        .await;
    let device = security.verify_device("build-box").await;
    let session = security
        .create_session(&user.id, &device.id, vec!["readonly".into()])
        .await;

    let engine = Arc::new(TaskEngine::new(Arc::new(InMemoryTaskStore::new())));
    let orchestrator = Orchestrator::new(engine, Arc::new(ScriptedSpawner::accept_all()))
        .with_security(security, SecurityContext::for_session(&session));

    let id = orchestrator
        .create_workflow(vec![WorkflowStep::new("code-creator", "gated step")])
        .await
        .unwrap();
    let status = orchestrator.execute_workflow(id).await.unwrap();
    assert_eq!(status, WorkflowStatus::Failed);

    let workflow = orchestrator.get_workflow(id).unwrap();
    let task = orchestrator
        .engine()
        .task(&workflow.task_order[0])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.error.as_deref().unwrap().contains("agent:invoke"));
}

#[tokio::test]
async fn workflow_events_are_published_in_order() {
    let orchestrator = orchestrator(Arc::new(ScriptedSpawner::accept_all()));
    let mut events = orchestrator.event_bus().subscribe();

    let id = orchestrator
        .create_workflow(vec![WorkflowStep::new("code-creator", "observable step")])
        .await
        .unwrap();
    orchestrator.execute_workflow(id).await.unwrap();

    assert!(matches!(
        events.try_recv().unwrap(),
        WorkflowEvent::WorkflowStarted { .. }
    ));
    assert!(matches!(
        events.try_recv().unwrap(),
        WorkflowEvent::TaskDispatched { .. }
    ));
    assert!(matches!(
        events.try_recv().unwrap(),
        WorkflowEvent::TaskCompleted { .. }
    ));
    assert!(matches!(
        events.try_recv().unwrap(),
        WorkflowEvent::WorkflowCompleted { .. }
    ));
}
