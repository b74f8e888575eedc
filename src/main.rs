//! Conductor - AI agent workflow orchestrator
//!
//! CLI entry point. The heavy lifting lives in `conductor-core`; this
//! binary manages the project-context directory that opts a repository
//! into orchestration.

#![forbid(unsafe_code)]

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cli;

use cli::{Cli, Commands};

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("conductor=info")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Init { path } => cli::init::run(path.as_deref()),
        Commands::Status { path } => cli::status::run(path.as_deref()),
    };

    match result {
        Ok(()) => {}
        Err(e) => {
            // Machine-readable single-line error for scripting callers.
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    }
}
