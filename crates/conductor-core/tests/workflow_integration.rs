//! End-to-end workflow and runtime scenarios over the public API.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use conductor_core::{
    DeploymentMode, InMemoryTaskStore, LocalTransport, NewTask, Orchestrator, RoleRegistry,
    Runtime, SpawnContext, SpawnOutcome, SpawnRequest, SubagentSpawner, TaskEngine,
    TaskEventKind, TaskStatus, TaskSubmission, WorkflowStatus, WorkflowStep,
};

/// Accepts every spawn and records the instant each task was dispatched.
struct RecordingSpawner {
    dispatched: Mutex<Vec<(String, chrono::DateTime<chrono::Utc>)>>,
}

impl RecordingSpawner {
    fn new() -> Self {
        Self {
            dispatched: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl SubagentSpawner for RecordingSpawner {
    async fn spawn(
        &self,
        request: SpawnRequest,
        _context: SpawnContext,
    ) -> Result<SpawnOutcome, Box<dyn std::error::Error + Send + Sync>> {
        self.dispatched
            .lock()
            .unwrap()
            .push((request.label.clone(), chrono::Utc::now()));
        Ok(SpawnOutcome::accepted(format!("child-of-{}", request.label)))
    }
}

fn build_orchestrator() -> (Orchestrator, Arc<RecordingSpawner>) {
    let engine = Arc::new(TaskEngine::new(Arc::new(InMemoryTaskStore::new())));
    let spawner = Arc::new(RecordingSpawner::new());
    (
        Orchestrator::new(engine, spawner.clone() as Arc<dyn SubagentSpawner>),
        spawner,
    )
}

#[tokio::test]
async fn diamond_workflow_respects_dependency_ordering() {
    let (orchestrator, _spawner) = build_orchestrator();

    // a -> (b, c) -> d
    let id = orchestrator
        .create_workflow(vec![
            WorkflowStep::new("architecture-advisor", "plan it"),
            WorkflowStep::new("code-creator", "build the api").depends_on("plan it"),
            WorkflowStep::new("code-creator", "build the ui").depends_on("plan it"),
            WorkflowStep::new("code-reviewer", "review everything")
                .depends_on("build the api")
                .depends_on("build the ui"),
        ])
        .await
        .unwrap();

    let status = orchestrator.execute_workflow(id).await.unwrap();
    assert_eq!(status, WorkflowStatus::Completed);

    // Every task's prerequisites reached a terminal state before the task
    // left pending: the prerequisite's completion event precedes the
    // dependent's first status change.
    let workflow = orchestrator.get_workflow(id).unwrap();
    for (task_id, prereqs) in &workflow.prerequisites {
        let events = orchestrator.engine().events(task_id).await.unwrap();
        let first_transition = events
            .iter()
            .find(|e| e.kind == TaskEventKind::StatusChanged)
            .unwrap()
            .timestamp;
        for prereq_id in prereqs {
            let prereq_events = orchestrator.engine().events(prereq_id).await.unwrap();
            let terminal = prereq_events
                .iter()
                .find(|e| e.new_status.is_some_and(|s| s.is_terminal()))
                .unwrap()
                .timestamp;
            assert!(
                terminal <= first_transition,
                "prerequisite finished after dependent started"
            );
        }
    }
}

#[tokio::test]
async fn journal_invariants_hold_across_a_full_run() {
    let (orchestrator, _spawner) = build_orchestrator();
    let id = orchestrator
        .create_workflow(vec![
            WorkflowStep::new("code-creator", "first"),
            WorkflowStep::new("test-generator", "second").depends_on("first"),
        ])
        .await
        .unwrap();
    orchestrator.execute_workflow(id).await.unwrap();

    let workflow = orchestrator.get_workflow(id).unwrap();
    for task_id in &workflow.task_order {
        let events = orchestrator.engine().events(task_id).await.unwrap();
        assert_eq!(events[0].kind, TaskEventKind::Created, "first event kind");
        for pair in events.windows(2) {
            assert!(pair[0].timestamp <= pair[1].timestamp, "journal ordering");
        }

        let task = orchestrator.engine().task(task_id).await.unwrap().unwrap();
        assert!(task.status.is_terminal());
        assert!(task.completed_at.is_some());
        if let Some(p) = task.progress {
            assert!(p <= 100);
        }
        // No events after the terminal status change.
        let terminal_index = events
            .iter()
            .position(|e| e.new_status.is_some_and(|s| s.is_terminal()))
            .unwrap();
        assert_eq!(terminal_index, events.len() - 1);
    }
}

#[tokio::test]
async fn runtime_round_trip_matches_submission() {
    let engine = Arc::new(TaskEngine::new(Arc::new(InMemoryTaskStore::new())));
    let transport = LocalTransport::new(
        Arc::clone(&engine),
        Arc::new(RecordingSpawner::new()),
        Arc::new(RoleRegistry::builtin()),
    );
    let runtime = Runtime::new(Arc::new(transport), DeploymentMode::LocalOnly)
        .with_engine(Arc::clone(&engine));

    let submitted = runtime
        .submit_task(TaskSubmission {
            agent_role: "code-creator".into(),
            description: "round trip".into(),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(submitted.status, TaskStatus::Pending);

    let queried = runtime
        .query_task_state(&submitted.task_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(queried.task_id, submitted.task_id);

    // Drive to terminal and confirm the facade still reports it.
    let stream = runtime.stream_task_updates(&submitted.task_id).await.unwrap();
    let states = stream.collect().await.unwrap();
    assert!(states.last().unwrap().status.is_terminal());

    let status = runtime.get_status().await;
    assert_eq!(status.total_tasks, 1);
    assert!(status.healthy);
}

#[tokio::test]
async fn waiting_tasks_resume_and_complete() {
    // The resumability edge: running -> waiting -> running -> completed.
    let engine = TaskEngine::new(Arc::new(InMemoryTaskStore::new()));
    let task = engine
        .create_task(NewTask::with_description("suspendable"))
        .await
        .unwrap();

    engine
        .update_status(&task.id, TaskStatus::Planning)
        .await
        .unwrap();
    engine
        .update_status(&task.id, TaskStatus::Running)
        .await
        .unwrap();
    engine
        .update_status(&task.id, TaskStatus::Waiting)
        .await
        .unwrap();
    engine
        .update_status(&task.id, TaskStatus::Running)
        .await
        .unwrap();
    let done = engine
        .update_status(&task.id, TaskStatus::Completed)
        .await
        .unwrap();

    assert_eq!(done.status, TaskStatus::Completed);
    let observed: Vec<TaskStatus> = engine
        .events(&task.id)
        .await
        .unwrap()
        .iter()
        .filter_map(|e| e.new_status)
        .collect();
    assert_eq!(
        observed,
        vec![
            TaskStatus::Pending,
            TaskStatus::Planning,
            TaskStatus::Running,
            TaskStatus::Waiting,
            TaskStatus::Running,
            TaskStatus::Completed,
        ]
    );
}

#[tokio::test]
async fn concurrent_workflows_do_not_interfere() {
    let (orchestrator, _spawner) = build_orchestrator();
    let orchestrator = Arc::new(orchestrator);

    let mut ids = Vec::new();
    for n in 0..4 {
        let id = orchestrator
            .create_workflow(vec![
                WorkflowStep::new("code-creator", format!("job {n} step 1")),
                WorkflowStep::new("code-reviewer", format!("job {n} step 2"))
                    .depends_on(format!("job {n} step 1")),
            ])
            .await
            .unwrap();
        ids.push(id);
    }

    let handles: Vec<_> = ids
        .iter()
        .map(|&id| {
            let orchestrator = Arc::clone(&orchestrator);
            tokio::spawn(async move { orchestrator.execute_workflow(id).await })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), WorkflowStatus::Completed);
    }

    let mut sessions = HashMap::new();
    for id in ids {
        let workflow = orchestrator.get_workflow(id).unwrap();
        for task_id in &workflow.task_order {
            let task = orchestrator.engine().task(task_id).await.unwrap().unwrap();
            assert_eq!(task.status, TaskStatus::Completed);
            // Child session handles are recorded and unique per task.
            let session = task.session_id.expect("session handle set");
            assert!(sessions.insert(session, task_id.clone()).is_none());
        }
    }
}
