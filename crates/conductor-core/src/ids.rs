//! Identifier and clock services
//!
//! Every record in the system is keyed by an opaque string id backed by a
//! v4 UUID (128 bits of entropy; collisions are treated as impossible).
//! Prefixes exist purely for log legibility.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Mint a task id.
#[must_use]
pub fn new_task_id() -> String {
    format!("task-{}", Uuid::new_v4())
}

/// Mint a workflow id.
#[must_use]
pub fn new_workflow_id() -> Uuid {
    Uuid::new_v4()
}

/// Mint a session id.
#[must_use]
pub fn new_session_id() -> String {
    format!("sess-{}", Uuid::new_v4())
}

/// Mint a user id.
#[must_use]
pub fn new_user_id() -> String {
    format!("user-{}", Uuid::new_v4())
}

/// Mint an audit entry id.
#[must_use]
pub fn new_audit_id() -> String {
    format!("audit-{}", Uuid::new_v4())
}

/// Current instant.
///
/// Single seam for time so timestamp ordering is easy to reason about in
/// tests. Timestamps from this function are monotonic enough for journal
/// ordering (events are appended under a per-task lock).
#[must_use]
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_prefixed() {
        let a = new_task_id();
        let b = new_task_id();
        assert_ne!(a, b);
        assert!(a.starts_with("task-"));
        assert!(new_session_id().starts_with("sess-"));
        assert!(new_audit_id().starts_with("audit-"));
    }

    #[test]
    fn clock_is_monotonic_across_calls() {
        let t1 = now();
        let t2 = now();
        assert!(t1 <= t2);
    }
}
