//! Error types for conductor-core
//!
//! Each subsystem has its own error enum; the crate-level [`Error`] wraps
//! them for callers that work across subsystems.

use thiserror::Error;

use crate::task::TaskStatus;

/// Task storage error
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The storage backend could not be reached or the operation did not
    /// complete. Callers never partially observe a failed save.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Task lifecycle engine error
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// Attempted state change is not in the transition table. The task is
    /// left unchanged and nothing is journaled.
    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition {
        /// Status the task was in
        from: TaskStatus,
        /// Status the caller asked for
        to: TaskStatus,
    },

    /// Attempted to mutate progress or output on a task in a terminal state.
    #[error("task {0} is terminal and immutable")]
    TerminalImmutable(String),

    /// A mutation referenced a task id the store has no record of.
    /// Lookups return `None` instead; only mutations raise this.
    #[error("task not found: {0}")]
    TaskNotFound(String),

    /// Underlying storage failure
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Transport adapter error
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The transport could not reach its execution backend. Transient;
    /// the caller may retry or resubscribe.
    #[error("transport unavailable: {0}")]
    Unavailable(String),

    /// The remote side answered with something the adapter cannot map.
    #[error("invalid transport response: {0}")]
    InvalidResponse(String),

    /// Engine failure surfaced through the adapter
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Workflow orchestration error
#[derive(Debug, Clone, Error)]
pub enum WorkflowError {
    /// The step list forms a dependency cycle. Raised at creation time;
    /// no tasks are created.
    #[error("workflow dependency graph is cyclic")]
    Cyclic,

    /// The execution loop found no dispatchable task while non-terminal
    /// tasks remain. Safety net behind the creation-time cycle check.
    #[error("workflow {0} is stuck: no dispatchable tasks remain")]
    Stuck(String),

    /// Referenced workflow id is unknown.
    #[error("workflow not found: {0}")]
    NotFound(String),

    /// Storage failure during workflow execution; workflow-fatal.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Engine failure outside the per-task dispatch path
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Security service error
///
/// Ordinary denials are *not* errors; they come back as
/// [`AccessDecision`](crate::security::AccessDecision) values. This enum
/// covers internal corruption only.
#[derive(Debug, Clone, Error)]
pub enum SecurityError {
    /// Session id does not resolve to a known session.
    #[error("unknown session: {0}")]
    UnknownSession(String),

    /// Device id does not resolve to a registered device.
    #[error("unknown device: {0}")]
    UnknownDevice(String),

    /// Device trust levels never downgrade implicitly.
    #[error("device {device_id} trust cannot downgrade from {current} to {requested}")]
    TrustDowngrade {
        /// Device whose promotion was attempted
        device_id: String,
        /// Level currently recorded
        current: String,
        /// Lower level that was requested
        requested: String,
    },
}

/// Crate-level error type
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Storage error
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Task engine error
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Transport error
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Workflow error
    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    /// Security service error
    #[error(transparent)]
    Security(#[from] SecurityError),

    /// An authorization gate refused the operation; the reason names the
    /// missing permission or failing policy rule.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
