//! Security domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// Identity provider tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthProvider {
    /// OpenID Connect
    Oidc,
    /// GitHub OAuth
    Github,
    /// Google OAuth
    Google,
    /// Locally asserted identity
    Local,
}

/// An authenticated (or locally asserted) user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserIdentity {
    /// Unique user id
    pub id: String,
    /// Which provider vouched for this identity
    pub provider: AuthProvider,
    /// Email, if known
    #[serde(default)]
    pub email: Option<String>,
    /// Display name, if known
    #[serde(default)]
    pub display_name: Option<String>,
    /// Whether the provider verified the identity
    pub verified: bool,
}

/// Kind of device a session originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    /// Workstation or laptop
    Desktop,
    /// Phone or tablet
    Mobile,
    /// Long-lived server
    Server,
    /// CI runner
    Ci,
}

/// Device trust level. Ordered: `Untrusted < Verified < Trusted`; trust
/// never downgrades implicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustLevel {
    /// Default on first registration
    Untrusted,
    /// Ownership verified out of band
    Verified,
    /// Fully trusted
    Trusted,
}

impl fmt::Display for TrustLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Untrusted => write!(f, "untrusted"),
            Self::Verified => write!(f, "verified"),
            Self::Trusted => write!(f, "trusted"),
        }
    }
}

/// A registered device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    /// Device id
    pub id: String,
    /// Kind of device
    pub device_type: DeviceType,
    /// Current trust level
    pub trust_level: TrustLevel,
    /// Last time the device was seen
    pub last_seen: DateTime<Utc>,
}

/// An authenticated user-plus-device binding carrying a time-bounded
/// permission set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Session id
    pub id: String,
    /// Owning user
    pub user_id: String,
    /// Owning device
    pub device_id: String,
    /// Role names whose permissions this session unions
    pub roles: Vec<String>,
    /// When the session was granted
    pub granted_at: DateTime<Utc>,
    /// When the session stops being valid
    pub expires_at: DateTime<Utc>,
    /// Repo paths this session is confined to (empty = unscoped)
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl Session {
    /// Whether the session has expired at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// The closed permission vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Permission {
    /// Submit tasks
    #[serde(rename = "task:submit")]
    TaskSubmit,
    /// Read task state and journals
    #[serde(rename = "task:read")]
    TaskRead,
    /// Cancel tasks
    #[serde(rename = "task:cancel")]
    TaskCancel,
    /// Dispatch agents
    #[serde(rename = "agent:invoke")]
    AgentInvoke,
    /// Execute skills
    #[serde(rename = "skill:execute")]
    SkillExecute,
    /// Read configuration
    #[serde(rename = "config:read")]
    ConfigRead,
    /// Write configuration
    #[serde(rename = "config:write")]
    ConfigWrite,
    /// Superpower satisfying every check
    #[serde(rename = "admin:all")]
    AdminAll,
}

impl Permission {
    /// Resource category this permission acts on.
    #[must_use]
    pub fn resource_type(&self) -> ResourceType {
        match self {
            Self::TaskSubmit | Self::TaskRead | Self::TaskCancel => ResourceType::Task,
            Self::AgentInvoke => ResourceType::Agent,
            Self::SkillExecute => ResourceType::Skill,
            Self::ConfigRead | Self::ConfigWrite | Self::AdminAll => ResourceType::Config,
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::TaskSubmit => "task:submit",
            Self::TaskRead => "task:read",
            Self::TaskCancel => "task:cancel",
            Self::AgentInvoke => "agent:invoke",
            Self::SkillExecute => "skill:execute",
            Self::ConfigRead => "config:read",
            Self::ConfigWrite => "config:write",
            Self::AdminAll => "admin:all",
        };
        write!(f, "{}", s)
    }
}

/// Per-agent rules inside a repo policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentPolicy {
    /// Agent (role) id the rule applies to
    pub agent_id: String,
    /// Roles allowed to dispatch this agent (empty = any role)
    #[serde(default)]
    pub allowed_roles: Vec<String>,
    /// Roles explicitly barred from this agent
    #[serde(default)]
    pub denied_roles: Vec<String>,
    /// Minimum device trust to dispatch this agent
    #[serde(default)]
    pub required_trust: Option<TrustLevel>,
}

/// Per-skill rules inside a repo policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillPolicy {
    /// Skill id the rule applies to
    pub skill_id: String,
    /// Permissions each individually required to execute the skill
    #[serde(default)]
    pub required_permissions: Vec<Permission>,
    /// Roles allowed to execute this skill (empty = any role)
    #[serde(default)]
    pub allowed_roles: Vec<String>,
    /// Minimum device trust to execute this skill
    #[serde(default)]
    pub required_trust: Option<TrustLevel>,
    /// Dangerous skills are refused on untrusted devices regardless of role
    #[serde(default)]
    pub dangerous: bool,
}

/// Scoped authorization rules keyed by a repository path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoPolicy {
    /// Repo path the policy governs
    pub repo_path: String,
    /// Whether the minimum trust level is enforced
    #[serde(default)]
    pub enforce_trust: bool,
    /// Minimum device trust when `enforce_trust` is set
    #[serde(default)]
    pub min_trust_level: Option<TrustLevel>,
    /// Roles allowed to operate in this repo (empty = any role)
    #[serde(default)]
    pub allowed_roles: Vec<String>,
    /// Users explicitly allowed (None = everyone not denied)
    #[serde(default)]
    pub allowed_users: Option<Vec<String>>,
    /// Users explicitly denied
    #[serde(default)]
    pub denied_users: Option<Vec<String>>,
    /// Per-agent rules
    #[serde(default)]
    pub agent_policies: Vec<AgentPolicy>,
    /// Per-skill rules
    #[serde(default)]
    pub skill_policies: Vec<SkillPolicy>,
}

impl RepoPolicy {
    /// A policy with no restrictions beyond its path.
    #[must_use]
    pub fn new(repo_path: impl Into<String>) -> Self {
        Self {
            repo_path: repo_path.into(),
            enforce_trust: false,
            min_trust_level: None,
            allowed_roles: Vec::new(),
            allowed_users: None,
            denied_users: None,
            agent_policies: Vec::new(),
            skill_policies: Vec::new(),
        }
    }

    /// Rule for a specific agent, if present.
    #[must_use]
    pub fn agent_policy(&self, agent_id: &str) -> Option<&AgentPolicy> {
        self.agent_policies.iter().find(|p| p.agent_id == agent_id)
    }

    /// Rule for a specific skill, if present.
    #[must_use]
    pub fn skill_policy(&self, skill_id: &str) -> Option<&SkillPolicy> {
        self.skill_policies.iter().find(|p| p.skill_id == skill_id)
    }
}

/// Resource category named in audit entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    /// A task
    Task,
    /// An agent
    Agent,
    /// A skill
    Skill,
    /// Configuration
    Config,
}

/// Outcome recorded in an audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditResult {
    /// The action was allowed
    Allowed,
    /// The action was denied
    Denied,
    /// The action failed internally
    Error,
}

/// Append-only audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Entry id
    pub id: String,
    /// When the decision was made
    pub timestamp: DateTime<Utc>,
    /// Action name, e.g. `task:submit`
    pub action: String,
    /// Acting user, if known
    #[serde(default)]
    pub user_id: Option<String>,
    /// Acting device, if known
    #[serde(default)]
    pub device_id: Option<String>,
    /// Session the decision was made under
    #[serde(default)]
    pub session_id: Option<String>,
    /// Resource category
    pub resource_type: ResourceType,
    /// Resource id
    pub resource_id: String,
    /// Decision outcome
    pub result: AuditResult,
    /// Why, for denials and errors
    #[serde(default)]
    pub reason: Option<String>,
    /// Free-form extra data
    #[serde(default)]
    pub metadata: Option<HashMap<String, Value>>,
}

/// Audit query filter; all set fields must match.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    /// Match entries for this user
    pub user_id: Option<String>,
    /// Match entries with this action name
    pub action: Option<String>,
    /// Match entries at or after this instant
    pub since: Option<DateTime<Utc>>,
}

impl AuditFilter {
    pub(crate) fn matches(&self, entry: &AuditEntry) -> bool {
        if let Some(user_id) = &self.user_id {
            if entry.user_id.as_deref() != Some(user_id.as_str()) {
                return false;
            }
        }
        if let Some(action) = &self.action {
            if entry.action != *action {
                return false;
            }
        }
        if let Some(since) = self.since {
            if entry.timestamp < since {
                return false;
            }
        }
        true
    }
}

/// Caller identity handed to authorization checks.
#[derive(Debug, Clone)]
pub struct SecurityContext {
    /// Session the caller acts under
    pub session_id: String,
}

impl SecurityContext {
    /// Context for a session.
    #[must_use]
    pub fn for_session(session: &Session) -> Self {
        Self {
            session_id: session.id.clone(),
        }
    }
}

/// Result of an authorization check. Denials are values, not errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessDecision {
    /// Whether the action may proceed
    pub allowed: bool,
    /// Why not, when denied
    #[serde(default)]
    pub reason: Option<String>,
    /// Permissions the check required
    #[serde(default)]
    pub required: Vec<Permission>,
    /// Required permissions absent from the effective set
    #[serde(default)]
    pub missing: Vec<Permission>,
}

impl AccessDecision {
    /// An unconditional allow.
    #[must_use]
    pub fn allowed() -> Self {
        Self {
            allowed: true,
            reason: None,
            required: Vec::new(),
            missing: Vec::new(),
        }
    }

    /// A denial with reason and permission context.
    #[must_use]
    pub fn denied(
        reason: impl Into<String>,
        required: Vec<Permission>,
        missing: Vec<Permission>,
    ) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
            required,
            missing,
        }
    }
}

#[cfg(test)]
mod serde_tests {
    use super::*;

    #[test]
    fn permission_strings_are_the_wire_vocabulary() {
        for (perm, expected) in [
            (Permission::TaskSubmit, "task:submit"),
            (Permission::TaskRead, "task:read"),
            (Permission::TaskCancel, "task:cancel"),
            (Permission::AgentInvoke, "agent:invoke"),
            (Permission::SkillExecute, "skill:execute"),
            (Permission::ConfigRead, "config:read"),
            (Permission::ConfigWrite, "config:write"),
            (Permission::AdminAll, "admin:all"),
        ] {
            assert_eq!(perm.to_string(), expected);
            assert_eq!(
                serde_json::to_string(&perm).unwrap(),
                format!("\"{}\"", expected)
            );
        }
    }

    #[test]
    fn trust_levels_are_ordered() {
        assert!(TrustLevel::Untrusted < TrustLevel::Verified);
        assert!(TrustLevel::Verified < TrustLevel::Trusted);
    }
}
