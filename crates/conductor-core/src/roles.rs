//! Agent role registry
//!
//! A role is an immutable bundle of capability metadata and a system prompt
//! that drives how a spawned agent behaves. Seven roles ship built in;
//! custom roles supplied at build time override built-ins of the same name.
//! The registry is read-only after load; reloading means rebuilding.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Immutable agent role metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRole {
    /// Unique role name, e.g. `code-creator`
    pub name: String,
    /// What the role is for
    pub description: String,
    /// Specialized capabilities
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Tools the role may use
    #[serde(default)]
    pub tools: Vec<String>,
    /// System prompt for spawned agents
    pub system_prompt: String,
    /// Model tag, e.g. `sonnet`
    #[serde(default = "default_model")]
    pub model: String,
    /// Thinking-depth tag, e.g. `standard` or `deep`
    #[serde(default = "default_thinking")]
    pub thinking: String,
    /// Optional behavioral constraints
    #[serde(default)]
    pub constraints: Option<Vec<String>>,
}

fn default_model() -> String {
    "sonnet".to_string()
}

fn default_thinking() -> String {
    "standard".to_string()
}

/// Registry of built-in and custom agent roles, keyed by name.
#[derive(Debug)]
pub struct RoleRegistry {
    roles: HashMap<String, AgentRole>,
}

impl RoleRegistry {
    /// Registry with only the seven built-in roles.
    #[must_use]
    pub fn builtin() -> Self {
        let mut roles = HashMap::new();
        for role in builtin_roles() {
            roles.insert(role.name.clone(), role);
        }
        Self { roles }
    }

    /// Registry with built-ins plus custom roles. Custom roles override
    /// built-ins of the same name.
    #[must_use]
    pub fn with_custom(custom: impl IntoIterator<Item = AgentRole>) -> Self {
        let mut registry = Self::builtin();
        for role in custom {
            registry.roles.insert(role.name.clone(), role);
        }
        registry
    }

    /// Look up a role by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&AgentRole> {
        self.roles.get(name)
    }

    /// All roles, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &AgentRole> {
        self.roles.values()
    }

    /// Number of registered roles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.roles.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }
}

impl Default for RoleRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

fn builtin_roles() -> Vec<AgentRole> {
    vec![
        AgentRole {
            name: "code-creator".into(),
            description: "Writes new code from a task description".into(),
            capabilities: vec!["implementation".into(), "scaffolding".into()],
            tools: vec!["read_file".into(), "write_file".into(), "shell".into()],
            system_prompt: "You write production-quality code that satisfies the given \
                            task description. Follow the project's existing conventions."
                .into(),
            model: "sonnet".into(),
            thinking: "standard".into(),
            constraints: None,
        },
        AgentRole {
            name: "code-reviewer".into(),
            description: "Reviews diffs for correctness and style".into(),
            capabilities: vec!["review".into(), "defect-detection".into()],
            tools: vec!["read_file".into()],
            system_prompt: "You review code changes. Report correctness issues first, \
                            then style. Be specific about file and line."
                .into(),
            model: "sonnet".into(),
            thinking: "deep".into(),
            constraints: Some(vec!["read-only".into()]),
        },
        AgentRole {
            name: "test-generator".into(),
            description: "Produces tests for existing code".into(),
            capabilities: vec!["testing".into()],
            tools: vec!["read_file".into(), "write_file".into(), "shell".into()],
            system_prompt: "You write focused tests covering the behavior described in \
                            the task, including edge cases."
                .into(),
            model: "sonnet".into(),
            thinking: "standard".into(),
            constraints: None,
        },
        AgentRole {
            name: "bug-analyzer".into(),
            description: "Diagnoses reported defects and locates root causes".into(),
            capabilities: vec!["debugging".into(), "root-cause-analysis".into()],
            tools: vec!["read_file".into(), "shell".into()],
            system_prompt: "You investigate the reported defect, reproduce it where \
                            possible, and name the root cause with evidence."
                .into(),
            model: "sonnet".into(),
            thinking: "deep".into(),
            constraints: None,
        },
        AgentRole {
            name: "refactor-agent".into(),
            description: "Restructures code without changing behavior".into(),
            capabilities: vec!["refactoring".into()],
            tools: vec!["read_file".into(), "write_file".into(), "shell".into()],
            system_prompt: "You refactor the named code, preserving observable behavior. \
                            Keep changes reviewable."
                .into(),
            model: "sonnet".into(),
            thinking: "standard".into(),
            constraints: Some(vec!["behavior-preserving".into()]),
        },
        AgentRole {
            name: "documentation-agent".into(),
            description: "Writes and updates documentation".into(),
            capabilities: vec!["documentation".into()],
            tools: vec!["read_file".into(), "write_file".into()],
            system_prompt: "You document the described code or feature for its intended \
                            audience. Prefer examples over prose."
                .into(),
            model: "haiku".into(),
            thinking: "standard".into(),
            constraints: None,
        },
        AgentRole {
            name: "architecture-advisor".into(),
            description: "Evaluates designs and proposes structure".into(),
            capabilities: vec!["architecture".into(), "design-review".into()],
            tools: vec!["read_file".into()],
            system_prompt: "You assess the described design problem and propose a \
                            structure, naming trade-offs explicitly."
                .into(),
            model: "opus".into(),
            thinking: "deep".into(),
            constraints: Some(vec!["read-only".into()]),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    const BUILTINS: [&str; 7] = [
        "code-creator",
        "code-reviewer",
        "test-generator",
        "bug-analyzer",
        "refactor-agent",
        "documentation-agent",
        "architecture-advisor",
    ];

    #[test]
    fn seven_builtin_roles_exist() {
        let registry = RoleRegistry::builtin();
        assert_eq!(registry.len(), 7);
        for name in BUILTINS {
            let role = registry.get(name).unwrap();
            assert!(!role.system_prompt.is_empty());
            assert!(!role.description.is_empty());
        }
    }

    #[test]
    fn custom_roles_override_builtins_by_name() {
        let custom = AgentRole {
            name: "code-reviewer".into(),
            description: "House-style reviewer".into(),
            capabilities: vec![],
            tools: vec![],
            system_prompt: "Review per the house style guide.".into(),
            model: "opus".into(),
            thinking: "deep".into(),
            constraints: None,
        };
        let registry = RoleRegistry::with_custom([custom]);
        assert_eq!(registry.len(), 7);
        assert_eq!(
            registry.get("code-reviewer").unwrap().description,
            "House-style reviewer"
        );
    }

    #[test]
    fn custom_roles_extend_the_set() {
        let custom = AgentRole {
            name: "db-migrator".into(),
            description: "Schema migrations".into(),
            capabilities: vec!["sql".into()],
            tools: vec!["shell".into()],
            system_prompt: "Write reversible migrations.".into(),
            model: "sonnet".into(),
            thinking: "standard".into(),
            constraints: None,
        };
        let registry = RoleRegistry::with_custom([custom]);
        assert_eq!(registry.len(), 8);
        assert!(registry.get("db-migrator").is_some());
    }
}
