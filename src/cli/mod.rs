//! CLI for Conductor
//!
//! Commands:
//! - `init [path]`: create the project-context directory tree
//! - `status [path]`: report whether the tree exists

use clap::{Parser, Subcommand};

pub mod init;
pub mod status;

/// Conductor workflow orchestrator CLI
#[derive(Parser, Debug)]
#[command(name = "conductor")]
#[command(about = "AI agent workflow orchestrator")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the project-context directory tree
    Init {
        /// Project root (defaults to the current directory)
        path: Option<String>,
    },
    /// Report whether the project-context tree exists
    Status {
        /// Project root (defaults to the current directory)
        path: Option<String>,
    },
}
