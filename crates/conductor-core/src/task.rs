//! Task data model
//!
//! A [`Task`] is the unit of work tracked by the lifecycle state machine.
//! Every change to a task is recorded in an append-only journal of
//! [`TaskEvent`]s owned by the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// Task lifecycle status.
///
/// The seven strings below are part of the wire and CLI surface and are
/// preserved verbatim by the serde representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Created, not yet picked up
    Pending,
    /// A transport is preparing execution
    Planning,
    /// Actively executing
    Running,
    /// Suspended, resumable across process boundaries
    Waiting,
    /// Finished successfully (terminal)
    Completed,
    /// Finished with an error (terminal)
    Failed,
    /// Stopped by operator intent (terminal)
    Cancelled,
}

impl TaskStatus {
    /// Whether this status is terminal. Terminal tasks are immutable except
    /// for deletion by the store.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether the transition `self -> to` is in the lifecycle table.
    #[must_use]
    pub fn can_transition_to(&self, to: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, to),
            (Pending, Planning | Cancelled)
                | (Planning, Running | Failed | Cancelled)
                | (Running, Waiting | Completed | Failed | Cancelled)
                | (Waiting, Running | Failed | Cancelled)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Planning => "planning",
            Self::Running => "running",
            Self::Waiting => "waiting",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// A tracked unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Globally unique opaque identifier
    pub id: String,
    /// Current lifecycle status
    pub status: TaskStatus,
    /// Human description of the work
    pub description: String,
    /// Agent role tag driving how a spawned agent behaves
    #[serde(default)]
    pub agent_role: Option<String>,
    /// Session this task is scoped to
    #[serde(default)]
    pub session_id: Option<String>,
    /// Parent task, for subtask fan-out
    #[serde(default)]
    pub parent_id: Option<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Set on first entry into `planning` or `running`; never overwritten
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    /// Set iff the task is terminal
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Final or intermediate output
    #[serde(default)]
    pub output: Option<String>,
    /// Failure description; set iff status is `failed`
    #[serde(default)]
    pub error: Option<String>,
    /// Completion percentage, clamped to [0, 100]
    #[serde(default)]
    pub progress: Option<u8>,
    /// Free-form metadata
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl Task {
    /// Create a new `pending` task.
    #[must_use]
    pub fn new(id: String, description: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            status: TaskStatus::Pending,
            description: description.into(),
            agent_role: None,
            session_id: None,
            parent_id: None,
            created_at,
            started_at: None,
            completed_at: None,
            output: None,
            error: None,
            progress: None,
            metadata: HashMap::new(),
        }
    }

    /// Snapshot view of this task's current state.
    #[must_use]
    pub fn state(&self) -> TaskState {
        TaskState {
            task_id: self.id.clone(),
            status: self.status,
            progress: self.progress,
            output: self.output.clone(),
            error: self.error.clone(),
            observed_at: crate::ids::now(),
        }
    }
}

/// Kind of journal event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskEventKind {
    /// Task record created
    Created,
    /// Legal status transition applied
    StatusChanged,
    /// Progress value changed
    ProgressUpdated,
    /// Output string set
    OutputAdded,
    /// Error string set
    ErrorSet,
}

/// Append-only journal record attached to a task.
///
/// For any task, events are totally ordered and the first event is
/// always `created`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEvent {
    /// Task this event belongs to
    pub task_id: String,
    /// When the event was journaled
    pub timestamp: DateTime<Utc>,
    /// What happened
    pub kind: TaskEventKind,
    /// Status before a `status_changed` event
    #[serde(default)]
    pub old_status: Option<TaskStatus>,
    /// Status after a `status_changed` event
    #[serde(default)]
    pub new_status: Option<TaskStatus>,
    /// Free-form event payload
    #[serde(default)]
    pub data: Option<Value>,
}

/// Lightweight state snapshot shared by the engine's streams and the
/// transport adapters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskState {
    /// Task identifier (remote task id for the remote transport)
    pub task_id: String,
    /// Observed status
    pub status: TaskStatus,
    /// Observed progress, if any
    #[serde(default)]
    pub progress: Option<u8>,
    /// Observed output, if any
    #[serde(default)]
    pub output: Option<String>,
    /// Observed error, if any
    #[serde(default)]
    pub error: Option<String>,
    /// When the snapshot was taken
    pub observed_at: DateTime<Utc>,
}

/// Filter for [`TaskStore::list`](crate::store::TaskStore::list).
///
/// When both fields are set the filter is a conjunction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskFilter {
    /// Match tasks with this exact status
    #[serde(default)]
    pub status: Option<TaskStatus>,
    /// Match tasks scoped to this session
    #[serde(default)]
    pub session_id: Option<String>,
}

impl TaskFilter {
    /// Whether `task` passes the filter.
    #[must_use]
    pub fn matches(&self, task: &Task) -> bool {
        if let Some(status) = self.status {
            if task.status != status {
                return false;
            }
        }
        if let Some(session_id) = &self.session_id {
            if task.session_id.as_deref() != Some(session_id.as_str()) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings_are_verbatim() {
        for (status, expected) in [
            (TaskStatus::Pending, "\"pending\""),
            (TaskStatus::Planning, "\"planning\""),
            (TaskStatus::Running, "\"running\""),
            (TaskStatus::Waiting, "\"waiting\""),
            (TaskStatus::Completed, "\"completed\""),
            (TaskStatus::Failed, "\"failed\""),
            (TaskStatus::Cancelled, "\"cancelled\""),
        ] {
            assert_eq!(serde_json::to_string(&status).unwrap(), expected);
            assert_eq!(format!("\"{}\"", status), expected);
        }
    }

    #[test]
    fn terminal_states() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Waiting.is_terminal());
    }

    #[test]
    fn transition_table() {
        use TaskStatus::*;
        // Legal edges
        assert!(Pending.can_transition_to(Planning));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Planning.can_transition_to(Running));
        assert!(Planning.can_transition_to(Failed));
        assert!(Running.can_transition_to(Waiting));
        assert!(Running.can_transition_to(Completed));
        assert!(Waiting.can_transition_to(Running));
        // Illegal edges
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Pending.can_transition_to(Running));
        assert!(!Waiting.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Running));
        assert!(!Failed.can_transition_to(Pending));
        assert!(!Cancelled.can_transition_to(Cancelled));
    }

    #[test]
    fn filter_is_conjunctive() {
        let mut task = Task::new("task-1".into(), "build the thing", chrono::Utc::now());
        task.session_id = Some("sess-a".into());

        let both = TaskFilter {
            status: Some(TaskStatus::Pending),
            session_id: Some("sess-a".into()),
        };
        assert!(both.matches(&task));

        let wrong_session = TaskFilter {
            status: Some(TaskStatus::Pending),
            session_id: Some("sess-b".into()),
        };
        assert!(!wrong_session.matches(&task));

        assert!(TaskFilter::default().matches(&task));
    }
}
