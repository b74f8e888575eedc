//! `conductor init` - create the project-context tree

use anyhow::{Context, Result};
use std::path::Path;
use tracing::info;

use conductor_context::init_context_dir;

/// Create `.conductor/` under `path` (default: current directory) with
/// starter templates. Idempotent; existing files are preserved.
pub fn run(path: Option<&str>) -> Result<()> {
    let root = Path::new(path.unwrap_or("."));
    let created = init_context_dir(root)
        .with_context(|| format!("failed to initialize project context under {}", root.display()))?;
    info!(path = %created.display(), "Project context initialized");
    println!("initialized {}", created.display());
    Ok(())
}
