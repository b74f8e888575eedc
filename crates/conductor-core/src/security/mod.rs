//! Security service
//!
//! Identity, device trust, sessions, permission checks, repo policies, and
//! the audit log. Ordinary denials come back as [`AccessDecision`] values;
//! the service raises [`SecurityError`] only on internal corruption such as
//! an unknown session id.
//!
//! The role->permission table is read-only at runtime; `admin:all` satisfies
//! every check.

mod types;

pub use types::{
    AccessDecision, AgentPolicy, AuditEntry, AuditFilter, AuditResult, AuthProvider, Device,
    DeviceType, Permission, RepoPolicy, ResourceType, SecurityContext, Session, SkillPolicy,
    TrustLevel, UserIdentity,
};

use chrono::Duration;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::SecurityError;
use crate::ids;

/// Default session lifetime.
const SESSION_TTL_HOURS: i64 = 24;

/// The security service. All dispatch decisions flow through here.
pub struct SecurityService {
    role_permissions: HashMap<String, Vec<Permission>>,
    users: RwLock<HashMap<String, UserIdentity>>,
    devices: RwLock<HashMap<String, Device>>,
    sessions: RwLock<HashMap<String, Session>>,
    policies: RwLock<HashMap<String, RepoPolicy>>,
    audit_log: RwLock<Vec<AuditEntry>>,
}

impl SecurityService {
    /// Service with the default role table (`admin`, `developer`,
    /// `operator`, `readonly`).
    #[must_use]
    pub fn new() -> Self {
        Self::with_role_permissions(default_role_permissions())
    }

    /// Service with a caller-supplied role table. The table is immutable
    /// afterwards.
    #[must_use]
    pub fn with_role_permissions(role_permissions: HashMap<String, Vec<Permission>>) -> Self {
        Self {
            role_permissions,
            users: RwLock::new(HashMap::new()),
            devices: RwLock::new(HashMap::new()),
            sessions: RwLock::new(HashMap::new()),
            policies: RwLock::new(HashMap::new()),
            audit_log: RwLock::new(Vec::new()),
        }
    }

    /// Establish a user identity for the given provider.
    ///
    /// Credential *verification* belongs to an identity collaborator; this
    /// service records the identity it is handed. Locally asserted
    /// identities are marked verified.
    pub async fn authenticate_user(
        &self,
        provider: AuthProvider,
        credentials: &HashMap<String, String>,
    ) -> UserIdentity {
        let id = credentials
            .get("user_id")
            .cloned()
            .unwrap_or_else(ids::new_user_id);
        let user = UserIdentity {
            id: id.clone(),
            provider,
            email: credentials.get("email").cloned(),
            display_name: credentials.get("display_name").cloned(),
            verified: matches!(provider, AuthProvider::Local),
        };
        self.users.write().await.insert(id, user.clone());
        info!(user_id = %user.id, provider = ?provider, "User authenticated");
        user
    }

    /// Return the device for `device_id`, registering it at `untrusted` on
    /// first sight and refreshing `last_seen` otherwise.
    pub async fn verify_device(&self, device_id: &str) -> Device {
        self.verify_device_of_type(device_id, DeviceType::Desktop)
            .await
    }

    /// Like [`verify_device`](Self::verify_device) with an explicit type for
    /// first registration.
    pub async fn verify_device_of_type(&self, device_id: &str, device_type: DeviceType) -> Device {
        let mut devices = self.devices.write().await;
        let device = devices
            .entry(device_id.to_string())
            .or_insert_with(|| Device {
                id: device_id.to_string(),
                device_type,
                trust_level: TrustLevel::Untrusted,
                last_seen: ids::now(),
            });
        device.last_seen = ids::now();
        device.clone()
    }

    /// Promote a device's trust level. Promotion is monotonic: a downgrade
    /// request is rejected.
    pub async fn promote_device(
        &self,
        device_id: &str,
        level: TrustLevel,
    ) -> Result<Device, SecurityError> {
        let mut devices = self.devices.write().await;
        let device = devices
            .get_mut(device_id)
            .ok_or_else(|| SecurityError::UnknownDevice(device_id.to_string()))?;
        if level < device.trust_level {
            return Err(SecurityError::TrustDowngrade {
                device_id: device_id.to_string(),
                current: device.trust_level.to_string(),
                requested: level.to_string(),
            });
        }
        device.trust_level = level;
        info!(device_id = %device_id, level = %level, "Device trust promoted");
        Ok(device.clone())
    }

    /// Create a session binding a user and device to a role set, valid for
    /// 24 hours. There is no automatic refresh.
    pub async fn create_session(
        &self,
        user_id: &str,
        device_id: &str,
        roles: Vec<String>,
    ) -> Session {
        self.create_session_with_scope(user_id, device_id, roles, Vec::new())
            .await
    }

    /// Create a session confined to the given repo paths.
    pub async fn create_session_with_scope(
        &self,
        user_id: &str,
        device_id: &str,
        roles: Vec<String>,
        scopes: Vec<String>,
    ) -> Session {
        let granted_at = ids::now();
        let session = Session {
            id: ids::new_session_id(),
            user_id: user_id.to_string(),
            device_id: device_id.to_string(),
            roles,
            granted_at,
            expires_at: granted_at + Duration::hours(SESSION_TTL_HOURS),
            scopes,
        };
        self.sessions
            .write()
            .await
            .insert(session.id.clone(), session.clone());
        debug!(session_id = %session.id, user_id = %user_id, "Session created");
        session
    }

    /// The set-union of the permissions of the session's roles.
    #[must_use]
    pub fn effective_permissions(&self, session: &Session) -> HashSet<Permission> {
        session
            .roles
            .iter()
            .filter_map(|role| self.role_permissions.get(role))
            .flatten()
            .copied()
            .collect()
    }

    async fn session(&self, ctx: &SecurityContext) -> Result<Session, SecurityError> {
        self.sessions
            .read()
            .await
            .get(&ctx.session_id)
            .cloned()
            .ok_or_else(|| SecurityError::UnknownSession(ctx.session_id.clone()))
    }

    /// Permission decision without auditing; every public check funnels
    /// through here and audits exactly once.
    fn decide_permission(&self, session: &Session, permission: Permission) -> AccessDecision {
        if session.is_expired(ids::now()) {
            return AccessDecision::denied(
                format!("session expired: {}", session.id),
                vec![permission],
                vec![permission],
            );
        }
        let effective = self.effective_permissions(session);
        if effective.contains(&Permission::AdminAll) || effective.contains(&permission) {
            AccessDecision::allowed()
        } else {
            AccessDecision::denied(
                format!("missing permission: {}", permission),
                vec![permission],
                vec![permission],
            )
        }
    }

    /// Check a single permission. Both outcomes are audited.
    pub async fn check_permission(
        &self,
        ctx: &SecurityContext,
        permission: Permission,
        resource: Option<&str>,
    ) -> Result<AccessDecision, SecurityError> {
        let session = self.session(ctx).await?;
        let decision = self.decide_permission(&session, permission);
        self.record_decision(
            &session,
            permission.to_string(),
            permission.resource_type(),
            resource.unwrap_or("*"),
            &decision,
        )
        .await;
        Ok(decision)
    }

    /// Repo policy for the session's first scope entry, if any.
    async fn scoped_policy(&self, session: &Session) -> Option<RepoPolicy> {
        let scope = session.scopes.first()?;
        self.policies.read().await.get(scope).cloned()
    }

    /// Repo-wide gates shared by agent and skill checks: user allow/deny
    /// lists, the repo-wide allowed role list, and the enforced minimum
    /// trust level.
    fn decide_repo_gates(
        &self,
        policy: &RepoPolicy,
        session: &Session,
        device: Option<&Device>,
    ) -> Option<AccessDecision> {
        if let Some(denied) = &policy.denied_users {
            if denied.iter().any(|u| *u == session.user_id) {
                return Some(AccessDecision::denied(
                    format!("user {} is denied in {}", session.user_id, policy.repo_path),
                    Vec::new(),
                    Vec::new(),
                ));
            }
        }
        if let Some(allowed) = &policy.allowed_users {
            if !allowed.iter().any(|u| *u == session.user_id) {
                return Some(AccessDecision::denied(
                    format!(
                        "user {} is not in the allow list for {}",
                        session.user_id, policy.repo_path
                    ),
                    Vec::new(),
                    Vec::new(),
                ));
            }
        }
        if !policy.allowed_roles.is_empty()
            && !session
                .roles
                .iter()
                .any(|r| policy.allowed_roles.contains(r))
        {
            return Some(AccessDecision::denied(
                format!(
                    "repo {} allows roles [{}]",
                    policy.repo_path,
                    policy.allowed_roles.join(", ")
                ),
                Vec::new(),
                Vec::new(),
            ));
        }
        if policy.enforce_trust {
            if let Some(min) = policy.min_trust_level {
                let trust = device.map_or(TrustLevel::Untrusted, |d| d.trust_level);
                if trust < min {
                    return Some(AccessDecision::denied(
                        format!(
                            "repo {} requires device trust {} (device trust: {})",
                            policy.repo_path, min, trust
                        ),
                        Vec::new(),
                        Vec::new(),
                    ));
                }
            }
        }
        None
    }

    /// May this session dispatch the given agent?
    ///
    /// Checks `agent:invoke`, then the scoped repo policy's agent rule:
    /// role intersection and required device trust.
    pub async fn check_agent_access(
        &self,
        ctx: &SecurityContext,
        agent_id: &str,
    ) -> Result<AccessDecision, SecurityError> {
        let session = self.session(ctx).await?;
        let decision = self.decide_agent_access(&session, agent_id).await;
        self.record_decision(
            &session,
            Permission::AgentInvoke.to_string(),
            ResourceType::Agent,
            agent_id,
            &decision,
        )
        .await;
        Ok(decision)
    }

    async fn decide_agent_access(&self, session: &Session, agent_id: &str) -> AccessDecision {
        let base = self.decide_permission(session, Permission::AgentInvoke);
        if !base.allowed {
            return base;
        }

        let Some(policy) = self.scoped_policy(session).await else {
            return AccessDecision::allowed();
        };
        let device = self.devices.read().await.get(&session.device_id).cloned();

        if let Some(denied) = self.decide_repo_gates(&policy, session, device.as_ref()) {
            return denied;
        }

        let Some(agent_policy) = policy.agent_policy(agent_id) else {
            return AccessDecision::allowed();
        };

        if session
            .roles
            .iter()
            .any(|r| agent_policy.denied_roles.contains(r))
        {
            return AccessDecision::denied(
                format!("a session role is denied for agent {}", agent_id),
                Vec::new(),
                Vec::new(),
            );
        }

        if !agent_policy.allowed_roles.is_empty()
            && !session
                .roles
                .iter()
                .any(|r| agent_policy.allowed_roles.contains(r))
        {
            return AccessDecision::denied(
                format!(
                    "agent {} allows roles [{}]",
                    agent_id,
                    agent_policy.allowed_roles.join(", ")
                ),
                Vec::new(),
                Vec::new(),
            );
        }

        if let Some(required) = agent_policy.required_trust {
            let trust = device.map_or(TrustLevel::Untrusted, |d| d.trust_level);
            if trust < required {
                return AccessDecision::denied(
                    format!(
                        "agent {} requires device trust {} (device trust: {})",
                        agent_id, required, trust
                    ),
                    Vec::new(),
                    Vec::new(),
                );
            }
        }

        AccessDecision::allowed()
    }

    /// May this session execute the given skill?
    ///
    /// Checks `skill:execute`, each of the skill rule's required permissions
    /// individually, role intersection, required trust, and the dangerous
    /// flag (refused outright on untrusted devices).
    pub async fn check_skill_access(
        &self,
        ctx: &SecurityContext,
        skill_id: &str,
    ) -> Result<AccessDecision, SecurityError> {
        let session = self.session(ctx).await?;
        let decision = self.decide_skill_access(&session, skill_id).await;
        self.record_decision(
            &session,
            Permission::SkillExecute.to_string(),
            ResourceType::Skill,
            skill_id,
            &decision,
        )
        .await;
        Ok(decision)
    }

    async fn decide_skill_access(&self, session: &Session, skill_id: &str) -> AccessDecision {
        let base = self.decide_permission(session, Permission::SkillExecute);
        if !base.allowed {
            return base;
        }

        let Some(policy) = self.scoped_policy(session).await else {
            return AccessDecision::allowed();
        };
        let device = self.devices.read().await.get(&session.device_id).cloned();

        if let Some(denied) = self.decide_repo_gates(&policy, session, device.as_ref()) {
            return denied;
        }

        let Some(skill_policy) = policy.skill_policy(skill_id) else {
            return AccessDecision::allowed();
        };

        for permission in &skill_policy.required_permissions {
            let check = self.decide_permission(session, *permission);
            if !check.allowed {
                return check;
            }
        }

        if !skill_policy.allowed_roles.is_empty()
            && !session
                .roles
                .iter()
                .any(|r| skill_policy.allowed_roles.contains(r))
        {
            return AccessDecision::denied(
                format!(
                    "skill {} allows roles [{}]",
                    skill_id,
                    skill_policy.allowed_roles.join(", ")
                ),
                Vec::new(),
                Vec::new(),
            );
        }

        let trust = device.map_or(TrustLevel::Untrusted, |d| d.trust_level);

        if let Some(required) = skill_policy.required_trust {
            if trust < required {
                return AccessDecision::denied(
                    format!(
                        "skill {} requires device trust {} (device trust: {})",
                        skill_id, required, trust
                    ),
                    Vec::new(),
                    Vec::new(),
                );
            }
        }

        if skill_policy.dangerous && trust == TrustLevel::Untrusted {
            return AccessDecision::denied(
                format!(
                    "skill {} is dangerous and cannot run from an untrusted device \
                     (device trust: {})",
                    skill_id, trust
                ),
                Vec::new(),
                Vec::new(),
            );
        }

        AccessDecision::allowed()
    }

    async fn record_decision(
        &self,
        session: &Session,
        action: String,
        resource_type: ResourceType,
        resource_id: &str,
        decision: &AccessDecision,
    ) {
        let entry = AuditEntry {
            id: ids::new_audit_id(),
            timestamp: ids::now(),
            action,
            user_id: Some(session.user_id.clone()),
            device_id: Some(session.device_id.clone()),
            session_id: Some(session.id.clone()),
            resource_type,
            resource_id: resource_id.to_string(),
            result: if decision.allowed {
                AuditResult::Allowed
            } else {
                AuditResult::Denied
            },
            reason: decision.reason.clone(),
            metadata: None,
        };
        self.audit(entry).await;
    }

    /// Append an entry to the audit log.
    pub async fn audit(&self, entry: AuditEntry) {
        self.audit_log.write().await.push(entry);
    }

    /// Audit entries matching `filter`, in append order.
    pub async fn get_audit_log(&self, filter: &AuditFilter) -> Vec<AuditEntry> {
        self.audit_log
            .read()
            .await
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect()
    }

    /// The policy for a repo path, if one is set.
    pub async fn get_repo_policy(&self, repo_path: &str) -> Option<RepoPolicy> {
        self.policies.read().await.get(repo_path).cloned()
    }

    /// Install or replace a repo policy.
    pub async fn set_repo_policy(&self, policy: RepoPolicy) {
        self.policies
            .write()
            .await
            .insert(policy.repo_path.clone(), policy);
    }
}

impl Default for SecurityService {
    fn default() -> Self {
        Self::new()
    }
}

fn default_role_permissions() -> HashMap<String, Vec<Permission>> {
    use Permission::*;
    HashMap::from([
        ("admin".to_string(), vec![AdminAll]),
        (
            "developer".to_string(),
            vec![
                TaskSubmit,
                TaskRead,
                TaskCancel,
                AgentInvoke,
                SkillExecute,
                ConfigRead,
            ],
        ),
        (
            "operator".to_string(),
            vec![TaskSubmit, TaskRead, TaskCancel, ConfigRead, ConfigWrite],
        ),
        ("readonly".to_string(), vec![TaskRead, ConfigRead]),
    ])
}
