//! Project-context loading
//!
//! A project opts into Conductor by carrying a `.conductor/` directory:
//!
//! ```text
//! .conductor/
//!   context.yaml       project metadata
//!   rules.yaml         coding standards
//!   architecture.md    free-text architecture notes
//!   agents/*.yaml      custom agent role definitions
//! ```
//!
//! The orchestrator and role registry read this tree at startup and never
//! write it. Individual files that fail to parse are skipped with a
//! warning; a missing tree is not an error.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

use conductor_core::roles::AgentRole;

/// Well-known directory name, relative to the project root.
pub const CONTEXT_DIR: &str = ".conductor";

/// Context loading error
#[derive(Debug, Error)]
pub enum ContextError {
    /// Directory or file could not be read
    #[error("io error at {path}: {source}")]
    Io {
        /// Path the operation failed on
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
}

/// Project metadata from `context.yaml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectMeta {
    /// Project name
    #[serde(default)]
    pub name: Option<String>,
    /// Short description
    #[serde(default)]
    pub description: Option<String>,
    /// Primary language
    #[serde(default)]
    pub language: Option<String>,
    /// Repository URL
    #[serde(default)]
    pub repository: Option<String>,
}

/// Coding standards from `rules.yaml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectRules {
    /// Rules agents must follow
    #[serde(default)]
    pub rules: Vec<String>,
    /// Paths agents must not touch
    #[serde(default)]
    pub protected_paths: Vec<String>,
}

/// Everything read from the `.conductor/` tree.
#[derive(Debug, Clone, Default)]
pub struct ProjectContext {
    /// Where the tree was found
    pub root: PathBuf,
    /// `context.yaml` contents, if present and parseable
    pub meta: Option<ProjectMeta>,
    /// `rules.yaml` contents, if present and parseable
    pub rules: Option<ProjectRules>,
    /// `architecture.md` contents, if present
    pub architecture: Option<String>,
    /// Custom roles from `agents/*.yaml`
    pub custom_roles: Vec<AgentRole>,
}

impl ProjectContext {
    /// Whether a context tree exists under `project_root`.
    #[must_use]
    pub fn exists(project_root: &Path) -> bool {
        project_root.join(CONTEXT_DIR).is_dir()
    }

    /// Load the context tree rooted at `project_root`.
    ///
    /// A missing tree yields an empty context. Unparseable YAML files are
    /// skipped with a warning so one bad file never takes the project down.
    pub fn load(project_root: &Path) -> Result<Self, ContextError> {
        let root = project_root.join(CONTEXT_DIR);
        let mut context = Self {
            root: root.clone(),
            ..Self::default()
        };
        if !root.is_dir() {
            debug!(path = %root.display(), "No project context directory");
            return Ok(context);
        }

        context.meta = load_yaml(&root.join("context.yaml"));
        context.rules = load_yaml(&root.join("rules.yaml"));

        let architecture = root.join("architecture.md");
        if architecture.is_file() {
            context.architecture = Some(std::fs::read_to_string(&architecture).map_err(
                |source| ContextError::Io {
                    path: architecture,
                    source,
                },
            )?);
        }

        context.custom_roles = load_custom_roles(&root.join("agents"))?;
        debug!(
            path = %root.display(),
            custom_roles = context.custom_roles.len(),
            "Project context loaded"
        );
        Ok(context)
    }
}

fn load_yaml<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
    if !path.is_file() {
        return None;
    }
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Context file unreadable; skipped");
            return None;
        }
    };
    match serde_yaml::from_str(&text) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Context file unparseable; skipped");
            None
        }
    }
}

/// Load every `agents/*.yaml` role definition, skipping bad files.
fn load_custom_roles(dir: &Path) -> Result<Vec<AgentRole>, ContextError> {
    let mut roles = Vec::new();
    if !dir.is_dir() {
        return Ok(roles);
    }

    let entries = std::fs::read_dir(dir).map_err(|source| ContextError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    for entry in entries.flatten() {
        let path = entry.path();
        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e == "yaml" || e == "yml");
        if !is_yaml {
            continue;
        }
        if let Some(role) = load_yaml::<AgentRole>(&path) {
            debug!(role = %role.name, path = %path.display(), "Custom role loaded");
            roles.push(role);
        }
    }
    Ok(roles)
}

/// Template for `context.yaml` written by `conductor init`.
pub const CONTEXT_TEMPLATE: &str = "\
# Project metadata read by conductor at startup.
name: my-project
description: \"\"
language: \"\"
repository: \"\"
";

/// Template for `rules.yaml` written by `conductor init`.
pub const RULES_TEMPLATE: &str = "\
# Coding standards handed to every spawned agent.
rules:
  - Follow the existing code style.
protected_paths: []
";

/// Template for `architecture.md` written by `conductor init`.
pub const ARCHITECTURE_TEMPLATE: &str = "\
# Architecture

Describe the system here. Spawned agents receive this file as context.
";

/// Template for `agents/example.yaml` written by `conductor init`.
pub const AGENT_TEMPLATE: &str = "\
# Custom agent role. The name overrides a built-in role of the same name.
name: example-agent
description: Example custom role
capabilities: []
tools: []
system_prompt: |
  Describe how this agent should behave.
model: sonnet
thinking: standard
";

/// Create the `.conductor/` tree with starter templates. Existing files are
/// left alone.
pub fn init_context_dir(project_root: &Path) -> Result<PathBuf, ContextError> {
    let root = project_root.join(CONTEXT_DIR);
    let agents = root.join("agents");
    std::fs::create_dir_all(&agents).map_err(|source| ContextError::Io {
        path: agents.clone(),
        source,
    })?;

    for (name, contents) in [
        ("context.yaml", CONTEXT_TEMPLATE),
        ("rules.yaml", RULES_TEMPLATE),
        ("architecture.md", ARCHITECTURE_TEMPLATE),
    ] {
        let path = root.join(name);
        if !path.exists() {
            std::fs::write(&path, contents)
                .map_err(|source| ContextError::Io { path, source })?;
        }
    }
    let example = agents.join("example.yaml");
    if !example.exists() {
        std::fs::write(&example, AGENT_TEMPLATE).map_err(|source| ContextError::Io {
            path: example,
            source,
        })?;
    }
    Ok(root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_tree_loads_empty() {
        let dir = TempDir::new().unwrap();
        assert!(!ProjectContext::exists(dir.path()));
        let context = ProjectContext::load(dir.path()).unwrap();
        assert!(context.meta.is_none());
        assert!(context.custom_roles.is_empty());
    }

    #[test]
    fn init_creates_the_full_tree() {
        let dir = TempDir::new().unwrap();
        let root = init_context_dir(dir.path()).unwrap();

        assert!(root.join("context.yaml").is_file());
        assert!(root.join("rules.yaml").is_file());
        assert!(root.join("architecture.md").is_file());
        assert!(root.join("agents/example.yaml").is_file());
        assert!(ProjectContext::exists(dir.path()));

        // Idempotent: a second init leaves existing files alone.
        std::fs::write(root.join("context.yaml"), "name: customized\n").unwrap();
        init_context_dir(dir.path()).unwrap();
        let text = std::fs::read_to_string(root.join("context.yaml")).unwrap();
        assert_eq!(text, "name: customized\n");
    }

    #[test]
    fn loads_metadata_rules_and_custom_roles() {
        let dir = TempDir::new().unwrap();
        let root = init_context_dir(dir.path()).unwrap();
        std::fs::write(
            root.join("context.yaml"),
            "name: demo\nlanguage: rust\n",
        )
        .unwrap();
        std::fs::write(
            root.join("agents/reviewer.yaml"),
            "name: strict-reviewer\ndescription: Reviews strictly\nsystem_prompt: Be strict.\n",
        )
        .unwrap();

        let context = ProjectContext::load(dir.path()).unwrap();
        assert_eq!(context.meta.unwrap().name.as_deref(), Some("demo"));
        assert!(context.rules.is_some());
        assert!(context.architecture.unwrap().contains("# Architecture"));
        assert!(context
            .custom_roles
            .iter()
            .any(|r| r.name == "strict-reviewer"));
    }

    #[test]
    fn bad_yaml_is_skipped_not_fatal() {
        let dir = TempDir::new().unwrap();
        let root = init_context_dir(dir.path()).unwrap();
        std::fs::write(root.join("context.yaml"), ":: not yaml ::").unwrap();
        std::fs::write(root.join("agents/broken.yaml"), "{{{{").unwrap();

        let context = ProjectContext::load(dir.path()).unwrap();
        assert!(context.meta.is_none());
        // The example role still loads.
        assert_eq!(context.custom_roles.len(), 1);
    }

    #[test]
    fn custom_roles_feed_the_registry() {
        use conductor_core::roles::RoleRegistry;

        let dir = TempDir::new().unwrap();
        let root = init_context_dir(dir.path()).unwrap();
        std::fs::write(
            root.join("agents/code-reviewer.yaml"),
            "name: code-reviewer\ndescription: House reviewer\nsystem_prompt: House rules.\n",
        )
        .unwrap();

        let context = ProjectContext::load(dir.path()).unwrap();
        let registry = RoleRegistry::with_custom(context.custom_roles);
        assert_eq!(
            registry.get("code-reviewer").unwrap().description,
            "House reviewer"
        );
    }
}
