//! Workflow event bus
//!
//! Broadcast fan-out of workflow progress to observers. Uses
//! `tokio::broadcast` so multiple subscribers receive the same events; a
//! slow subscriber lags (missing events) rather than blocking the
//! orchestrator.

use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Events emitted while a workflow executes.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    /// The execution loop started
    WorkflowStarted {
        /// Workflow identifier
        workflow_id: Uuid,
    },
    /// A task left `pending` and entered its dispatch routine
    TaskDispatched {
        /// Workflow identifier
        workflow_id: Uuid,
        /// Task identifier
        task_id: String,
        /// Role executing the task
        agent_role: String,
    },
    /// A dispatched task completed
    TaskCompleted {
        /// Workflow identifier
        workflow_id: Uuid,
        /// Task identifier
        task_id: String,
    },
    /// A dispatched task failed
    TaskFailed {
        /// Workflow identifier
        workflow_id: Uuid,
        /// Task identifier
        task_id: String,
        /// Failure description
        error: String,
    },
    /// Every task completed
    WorkflowCompleted {
        /// Workflow identifier
        workflow_id: Uuid,
    },
    /// At least one task failed, or the loop got stuck
    WorkflowFailed {
        /// Workflow identifier
        workflow_id: Uuid,
        /// Failure description
        error: String,
    },
    /// The workflow was cancelled
    WorkflowCancelled {
        /// Workflow identifier
        workflow_id: Uuid,
    },
}

/// Broadcast-based bus for workflow events.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<WorkflowEvent>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to all future events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.sender.subscribe()
    }

    /// Publish an event. Returns how many subscribers received it; with no
    /// subscribers the event is dropped.
    pub fn publish(&self, event: WorkflowEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
