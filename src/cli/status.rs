//! `conductor status` - report whether the project-context tree exists

use anyhow::{bail, Result};
use std::path::Path;

use conductor_core::roles::RoleRegistry;
use conductor_context::{ProjectContext, CONTEXT_DIR};

/// Print the context status for `path` (default: current directory).
///
/// Exit code is zero only when the tree exists; a missing tree is the
/// failure scripting callers probe for.
pub fn run(path: Option<&str>) -> Result<()> {
    let root = Path::new(path.unwrap_or("."));
    if !ProjectContext::exists(root) {
        bail!(
            "no {} directory under {} (run `conductor init`)",
            CONTEXT_DIR,
            root.display()
        );
    }

    let context = ProjectContext::load(root)?;
    let registry = RoleRegistry::with_custom(context.custom_roles.clone());
    println!("project context: {}", context.root.display());
    if let Some(meta) = &context.meta {
        if let Some(name) = &meta.name {
            println!("project: {}", name);
        }
    }
    println!("roles: {}", registry.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn status_fails_without_a_context_tree() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().to_str().unwrap().to_string();
        assert!(run(Some(&path)).is_err());
    }

    #[test]
    fn status_succeeds_after_init() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().to_str().unwrap().to_string();
        conductor_context::init_context_dir(dir.path()).unwrap();
        run(Some(&path)).unwrap();
    }
}
