//! Task lifecycle engine
//!
//! Owns the validated state machine over the task store: legal transitions,
//! progress and output updates, cancellation, the append-only event journal,
//! synchronous subscriber fan-out, and buffered update streams.
//!
//! State machine:
//!
//! ```text
//! pending   -> planning | cancelled
//! planning  -> running  | failed | cancelled
//! running   -> waiting  | completed | failed | cancelled
//! waiting   -> running  | failed | cancelled
//! completed | failed | cancelled -> (terminal)
//! ```
//!
//! Any other transition fails with [`EngineError::InvalidTransition`] and
//! leaves the task unchanged.

use dashmap::DashMap;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use crate::error::{EngineError, TransportError};
use crate::ids;
use crate::store::TaskStore;
use crate::task::{Task, TaskEvent, TaskEventKind, TaskFilter, TaskState, TaskStatus};

/// Callback invoked for every journaled event of a subscribed task.
///
/// Called synchronously on the thread that produced the update, in journal
/// order; callbacks must not block.
pub type UpdateCallback = Arc<dyn Fn(&TaskEvent) + Send + Sync>;

enum SubscriberSink {
    Callback(UpdateCallback),
    Stream(mpsc::UnboundedSender<Result<TaskState, TransportError>>),
}

struct Subscriber {
    id: u64,
    sink: SubscriberSink,
}

/// Fields accepted when creating a task.
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    /// Human description of the work
    pub description: String,
    /// Agent role tag
    pub agent_role: Option<String>,
    /// Session scope
    pub session_id: Option<String>,
    /// Parent task id
    pub parent_id: Option<String>,
    /// Free-form metadata
    pub metadata: HashMap<String, serde_json::Value>,
}

impl NewTask {
    /// Create a request with just a description.
    #[must_use]
    pub fn with_description(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Self::default()
        }
    }
}

/// Lazy, finite sequence of task state snapshots.
///
/// Begins with the current-state snapshot, yields one value per subsequent
/// change, and completes after the terminal state has been delivered (the
/// producer drops its sender once the final update is in the buffer, so
/// every buffered snapshot is yielded before the stream ends). Backed by an
/// unbounded channel so a slow consumer never blocks the producer or other
/// subscribers.
pub struct TaskUpdateStream {
    rx: mpsc::UnboundedReceiver<Result<TaskState, TransportError>>,
    done: bool,
}

/// Producer half used by transports that synthesize their own streams.
pub(crate) struct TaskUpdateSender {
    tx: mpsc::UnboundedSender<Result<TaskState, TransportError>>,
}

impl TaskUpdateStream {
    /// Create a connected sender/stream pair.
    pub(crate) fn channel() -> (TaskUpdateSender, TaskUpdateStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        (TaskUpdateSender { tx }, TaskUpdateStream { rx, done: false })
    }

    /// Next snapshot, or `None` once the producer has delivered its final
    /// update and the buffer is drained.
    pub async fn next(&mut self) -> Option<Result<TaskState, TransportError>> {
        if self.done {
            return None;
        }
        let item = self.rx.recv().await?;
        if item.is_err() {
            self.done = true;
        }
        Some(item)
    }

    /// Drain the stream, collecting every remaining snapshot. Fails on the
    /// first transport error.
    pub async fn collect(mut self) -> Result<Vec<TaskState>, TransportError> {
        let mut states = Vec::new();
        while let Some(item) = self.next().await {
            states.push(item?);
        }
        Ok(states)
    }
}

impl TaskUpdateSender {
    /// Send a snapshot. Returns `false` when the consumer is gone.
    pub(crate) fn send(&self, state: TaskState) -> bool {
        self.tx.send(Ok(state)).is_ok()
    }

    /// Fail the stream. The consumer must resubscribe.
    pub(crate) fn fail(&self, err: TransportError) {
        let _ = self.tx.send(Err(err));
    }
}

/// Handle returned by [`TaskEngine::subscribe`]; unsubscribes when dropped
/// or when [`unsubscribe`](Self::unsubscribe) is called.
pub struct SubscriptionHandle {
    task_id: String,
    subscriber_id: u64,
    subscribers: Arc<DashMap<String, Vec<Subscriber>>>,
}

impl SubscriptionHandle {
    /// Stop receiving updates.
    pub fn unsubscribe(self) {
        // Drop does the work.
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        if let Some(mut subs) = self.subscribers.get_mut(&self.task_id) {
            subs.retain(|s| s.id != self.subscriber_id);
        }
    }
}

/// The task lifecycle engine.
///
/// State transitions are read-modify-write sequences serialized per task id;
/// the store write itself is a whole-record replacement, so concurrent
/// writers on different ids never conflict.
pub struct TaskEngine {
    store: Arc<dyn TaskStore>,
    locks: DashMap<String, Arc<Mutex<()>>>,
    subscribers: Arc<DashMap<String, Vec<Subscriber>>>,
    next_subscriber_id: AtomicU64,
}

impl TaskEngine {
    /// Create an engine over the given store.
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self {
            store,
            locks: DashMap::new(),
            subscribers: Arc::new(DashMap::new()),
            next_subscriber_id: AtomicU64::new(1),
        }
    }

    /// The backing store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    fn task_lock(&self, task_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(task_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Create a new `pending` task and journal its `created` event.
    pub async fn create_task(&self, req: NewTask) -> Result<Task, EngineError> {
        let mut task = Task::new(ids::new_task_id(), req.description, ids::now());
        task.agent_role = req.agent_role;
        task.session_id = req.session_id;
        task.parent_id = req.parent_id;
        task.metadata = req.metadata;

        self.store.save(&task).await?;
        let event = TaskEvent {
            task_id: task.id.clone(),
            timestamp: ids::now(),
            kind: TaskEventKind::Created,
            old_status: None,
            new_status: Some(TaskStatus::Pending),
            data: None,
        };
        self.store.save_event(&event).await?;
        debug!(task_id = %task.id, "Task created");
        Ok(task)
    }

    /// Load a task snapshot. `None` for unknown ids.
    pub async fn task(&self, task_id: &str) -> Result<Option<Task>, EngineError> {
        Ok(self.store.load(task_id).await?)
    }

    /// List tasks matching `filter`.
    pub async fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>, EngineError> {
        Ok(self.store.list(filter).await?)
    }

    /// Event journal for a task, in insertion order.
    pub async fn events(&self, task_id: &str) -> Result<Vec<TaskEvent>, EngineError> {
        Ok(self.store.events(task_id).await?)
    }

    /// Apply a status transition.
    ///
    /// Entering `planning` or `running` sets `started_at` if still unset;
    /// entering a terminal state sets `completed_at`. Illegal transitions
    /// fail with [`EngineError::InvalidTransition`] without mutating the
    /// task or journaling anything.
    pub async fn update_status(&self, task_id: &str, to: TaskStatus) -> Result<Task, EngineError> {
        let lock = self.task_lock(task_id);
        let _guard = lock.lock().await;

        let mut task = self
            .store
            .load(task_id)
            .await?
            .ok_or_else(|| EngineError::TaskNotFound(task_id.to_string()))?;

        let from = task.status;
        if !from.can_transition_to(to) {
            return Err(EngineError::InvalidTransition { from, to });
        }

        task.status = to;
        match to {
            TaskStatus::Planning | TaskStatus::Running if task.started_at.is_none() => {
                task.started_at = Some(ids::now());
            }
            _ => {}
        }
        if to.is_terminal() {
            task.completed_at = Some(ids::now());
        }

        self.store.save(&task).await?;
        let event = TaskEvent {
            task_id: task.id.clone(),
            timestamp: ids::now(),
            kind: TaskEventKind::StatusChanged,
            old_status: Some(from),
            new_status: Some(to),
            data: None,
        };
        self.store.save_event(&event).await?;
        debug!(task_id = %task.id, from = %from, to = %to, "Task status changed");
        self.notify(&task, &event);
        Ok(task)
    }

    /// Store a progress value, clamped to [0, 100]. Does not touch status.
    ///
    /// Journals an event only when the clamped value actually differs from
    /// the current one. Rejected on terminal tasks.
    pub async fn update_progress(&self, task_id: &str, progress: i32) -> Result<Task, EngineError> {
        let lock = self.task_lock(task_id);
        let _guard = lock.lock().await;

        let mut task = self
            .store
            .load(task_id)
            .await?
            .ok_or_else(|| EngineError::TaskNotFound(task_id.to_string()))?;

        if task.status.is_terminal() {
            return Err(EngineError::TerminalImmutable(task_id.to_string()));
        }

        let clamped = progress.clamp(0, 100) as u8;
        if task.progress == Some(clamped) {
            return Ok(task);
        }

        task.progress = Some(clamped);
        self.store.save(&task).await?;
        let event = TaskEvent {
            task_id: task.id.clone(),
            timestamp: ids::now(),
            kind: TaskEventKind::ProgressUpdated,
            old_status: None,
            new_status: None,
            data: Some(json!({ "progress": clamped })),
        };
        self.store.save_event(&event).await?;
        self.notify(&task, &event);
        Ok(task)
    }

    /// Record the session handle a task runs under. Not part of the journal
    /// contract, so no event is appended. Rejected on terminal tasks.
    pub async fn assign_session(
        &self,
        task_id: &str,
        session_id: impl Into<String>,
    ) -> Result<Task, EngineError> {
        let lock = self.task_lock(task_id);
        let _guard = lock.lock().await;

        let mut task = self
            .store
            .load(task_id)
            .await?
            .ok_or_else(|| EngineError::TaskNotFound(task_id.to_string()))?;
        if task.status.is_terminal() {
            return Err(EngineError::TerminalImmutable(task_id.to_string()));
        }
        task.session_id = Some(session_id.into());
        self.store.save(&task).await?;
        Ok(task)
    }

    /// Overwrite the output string. Legal in any non-terminal state.
    pub async fn set_output(
        &self,
        task_id: &str,
        output: impl Into<String>,
    ) -> Result<Task, EngineError> {
        let lock = self.task_lock(task_id);
        let _guard = lock.lock().await;

        let mut task = self
            .store
            .load(task_id)
            .await?
            .ok_or_else(|| EngineError::TaskNotFound(task_id.to_string()))?;

        if task.status.is_terminal() {
            return Err(EngineError::TerminalImmutable(task_id.to_string()));
        }

        task.output = Some(output.into());
        self.store.save(&task).await?;
        let event = TaskEvent {
            task_id: task.id.clone(),
            timestamp: ids::now(),
            kind: TaskEventKind::OutputAdded,
            old_status: None,
            new_status: None,
            data: None,
        };
        self.store.save_event(&event).await?;
        self.notify(&task, &event);
        Ok(task)
    }

    /// Set the error string and transition to `failed` atomically.
    ///
    /// The `error_set` event is journaled before the terminal
    /// `status_changed` event so the terminal event is the journal's last.
    pub async fn set_error(
        &self,
        task_id: &str,
        message: impl Into<String>,
    ) -> Result<Task, EngineError> {
        let lock = self.task_lock(task_id);
        let _guard = lock.lock().await;

        let mut task = self
            .store
            .load(task_id)
            .await?
            .ok_or_else(|| EngineError::TaskNotFound(task_id.to_string()))?;

        let from = task.status;
        if !from.can_transition_to(TaskStatus::Failed) {
            return Err(EngineError::InvalidTransition {
                from,
                to: TaskStatus::Failed,
            });
        }

        let message = message.into();
        task.error = Some(message.clone());
        task.status = TaskStatus::Failed;
        task.completed_at = Some(ids::now());
        self.store.save(&task).await?;

        let error_event = TaskEvent {
            task_id: task.id.clone(),
            timestamp: ids::now(),
            kind: TaskEventKind::ErrorSet,
            old_status: None,
            new_status: None,
            data: Some(json!({ "error": message })),
        };
        self.store.save_event(&error_event).await?;
        self.notify(&task, &error_event);

        let status_event = TaskEvent {
            task_id: task.id.clone(),
            timestamp: ids::now(),
            kind: TaskEventKind::StatusChanged,
            old_status: Some(from),
            new_status: Some(TaskStatus::Failed),
            data: None,
        };
        self.store.save_event(&status_event).await?;
        debug!(task_id = %task.id, from = %from, error = %message, "Task failed");
        self.notify(&task, &status_event);
        Ok(task)
    }

    /// Cancel a task if it is non-terminal.
    ///
    /// Returns `false` (journaling nothing) for tasks already terminal.
    /// Cancellation is non-preemptive: transports honor it at their next
    /// observation point, and work already issued externally may continue.
    pub async fn cancel(&self, task_id: &str) -> Result<bool, EngineError> {
        let lock = self.task_lock(task_id);
        let _guard = lock.lock().await;

        let mut task = self
            .store
            .load(task_id)
            .await?
            .ok_or_else(|| EngineError::TaskNotFound(task_id.to_string()))?;

        let from = task.status;
        if from.is_terminal() {
            return Ok(false);
        }

        task.status = TaskStatus::Cancelled;
        task.completed_at = Some(ids::now());
        self.store.save(&task).await?;
        let event = TaskEvent {
            task_id: task.id.clone(),
            timestamp: ids::now(),
            kind: TaskEventKind::StatusChanged,
            old_status: Some(from),
            new_status: Some(TaskStatus::Cancelled),
            data: None,
        };
        self.store.save_event(&event).await?;
        debug!(task_id = %task.id, from = %from, "Task cancelled");
        self.notify(&task, &event);
        Ok(true)
    }

    /// Subscribe a callback to every subsequent update of `task_id`.
    ///
    /// Callbacks observe events in journal order; dropping the handle
    /// unsubscribes.
    pub fn subscribe(&self, task_id: &str, callback: UpdateCallback) -> SubscriptionHandle {
        let subscriber_id = self.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .entry(task_id.to_string())
            .or_default()
            .push(Subscriber {
                id: subscriber_id,
                sink: SubscriberSink::Callback(callback),
            });
        SubscriptionHandle {
            task_id: task_id.to_string(),
            subscriber_id,
            subscribers: Arc::clone(&self.subscribers),
        }
    }

    /// Stream updates for a task: the current-state snapshot first, then one
    /// snapshot per subsequent event, completing after a terminal state.
    ///
    /// Stream consumers are decoupled from callback subscribers; buffering
    /// sits between notification and consumption, so a slow consumer never
    /// blocks anyone.
    pub async fn stream_updates(&self, task_id: &str) -> Result<TaskUpdateStream, EngineError> {
        let lock = self.task_lock(task_id);
        // Snapshot and registration happen under the task lock so no event
        // lands between them.
        let _guard = lock.lock().await;

        let task = self
            .store
            .load(task_id)
            .await?
            .ok_or_else(|| EngineError::TaskNotFound(task_id.to_string()))?;

        let (sender, stream) = TaskUpdateStream::channel();
        sender.send(task.state());
        if !task.status.is_terminal() {
            let subscriber_id = self.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
            self.subscribers
                .entry(task_id.to_string())
                .or_default()
                .push(Subscriber {
                    id: subscriber_id,
                    sink: SubscriberSink::Stream(sender.tx),
                });
        }
        Ok(stream)
    }

    /// Fan an event out to subscribers, synchronously and in journal order.
    ///
    /// Stream sinks are pruned once their consumer is gone or this event is
    /// the terminal `status_changed` (their sequence is complete, and
    /// dropping the sender closes the stream). The decision keys off the
    /// event itself, not `task.status`: `set_error` journals an `error_set`
    /// event after the task already reads `failed`, and that event must
    /// still reach every subscriber.
    fn notify(&self, task: &Task, event: &TaskEvent) {
        let is_final = event.new_status.is_some_and(|s| s.is_terminal());
        if let Some(mut subs) = self.subscribers.get_mut(&task.id) {
            subs.retain(|sub| match &sub.sink {
                SubscriberSink::Callback(cb) => {
                    cb(event);
                    true
                }
                SubscriberSink::Stream(tx) => tx.send(Ok(task.state())).is_ok() && !is_final,
            });
        }
    }
}
