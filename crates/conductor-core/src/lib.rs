//! Conductor Core - Workflow Orchestration Engine
//!
//! This crate provides the core of the Conductor multi-agent orchestrator:
//! - Task Engine: validated lifecycle state machine with an event journal
//! - Orchestrator: workflow DAGs executed in parallel waves
//! - Transports: in-process subagent spawn, or a remote execution node
//! - Runtime: the facade routing adapter operations and reporting health
//! - Security: identity, device trust, sessions, permissions, and audit
//! - Roles: built-in and custom agent role metadata

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod engine;
pub mod error;
pub mod event_bus;
pub mod ids;
pub mod orchestrator;
pub mod roles;
pub mod runtime;
pub mod security;
pub mod spawn;
pub mod store;
pub mod task;
pub mod transport;

pub use engine::{NewTask, SubscriptionHandle, TaskEngine, TaskUpdateStream, UpdateCallback};
pub use error::{
    EngineError, Error, Result, SecurityError, StoreError, TransportError, WorkflowError,
};
pub use event_bus::{EventBus, WorkflowEvent};
pub use orchestrator::{Orchestrator, Workflow, WorkflowStatus, WorkflowStep, WorkflowTask};
pub use roles::{AgentRole, RoleRegistry};
pub use runtime::{DeploymentMode, Runtime, RuntimeStatus};
pub use security::{
    AccessDecision, AgentPolicy, AuditEntry, AuditFilter, AuditResult, AuthProvider, Device,
    DeviceType, Permission, RepoPolicy, ResourceType, SecurityContext, SecurityService, Session,
    SkillPolicy, TrustLevel, UserIdentity,
};
pub use spawn::{SpawnContext, SpawnOutcome, SpawnRequest, SpawnStatus, SubagentSpawner};
pub use store::{InMemoryTaskStore, TaskStore};
pub use task::{Task, TaskEvent, TaskEventKind, TaskFilter, TaskState, TaskStatus};
pub use transport::{
    AgentInfo, LocalTransport, RemoteConfig, RemoteTransport, SkillInfo, TaskSubmission,
    TransportAdapter,
};
