//! Task persistence
//!
//! [`TaskStore`] is the seam between the engine and storage. The default
//! [`InMemoryTaskStore`] keeps everything in process memory; a durable
//! backend (file, relational, key-value) satisfies the same contract.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::task::{Task, TaskEvent, TaskFilter};

/// Persistence contract for task records and their event journals.
///
/// All reads return deep copies: mutating a returned value never mutates
/// stored state. Missing ids are `None`/empty, never errors; I/O failures
/// surface as [`StoreError::Unavailable`] and are never partially observed.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Persist a task record (whole-record replacement keyed by id).
    async fn save(&self, task: &Task) -> Result<(), StoreError>;

    /// Load a task record by id.
    async fn load(&self, task_id: &str) -> Result<Option<Task>, StoreError>;

    /// List task records matching `filter` (conjunctive when both fields
    /// are set).
    async fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>, StoreError>;

    /// Remove a task record and its event journal atomically.
    async fn delete(&self, task_id: &str) -> Result<bool, StoreError>;

    /// Append an event to the journal of `event.task_id`.
    async fn save_event(&self, event: &TaskEvent) -> Result<(), StoreError>;

    /// Events for a task, in insertion order. Empty for unknown ids.
    async fn events(&self, task_id: &str) -> Result<Vec<TaskEvent>, StoreError>;
}

#[derive(Default)]
struct StoreInner {
    tasks: HashMap<String, Task>,
    journals: HashMap<String, Vec<TaskEvent>>,
}

/// In-memory implementation for development, tests, and single-process use.
///
/// Record map and journals live behind one lock so `delete` removes both
/// under a single write guard.
#[derive(Default)]
pub struct InMemoryTaskStore {
    inner: RwLock<StoreInner>,
}

impl InMemoryTaskStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn save(&self, task: &Task) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn load(&self, task_id: &str) -> Result<Option<Task>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.tasks.get(task_id).cloned())
    }

    async fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .tasks
            .values()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect())
    }

    async fn delete(&self, task_id: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        let removed = inner.tasks.remove(task_id).is_some();
        inner.journals.remove(task_id);
        Ok(removed)
    }

    async fn save_event(&self, event: &TaskEvent) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner
            .journals
            .entry(event.task_id.clone())
            .or_default()
            .push(event.clone());
        Ok(())
    }

    async fn events(&self, task_id: &str) -> Result<Vec<TaskEvent>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.journals.get(task_id).cloned().unwrap_or_default())
    }
}
