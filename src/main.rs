//! # Main Entry Point
//!
//! Wires the layers together:
//! - Domain: configuration and types
//! - Infrastructure: workspace store, sandbox executor, generation backend
//! - Application: action parser and agent loop

mod application;
mod domain;
mod infrastructure;
mod strings;

use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use crate::application::engine::AgentLoop;
use crate::domain::config::{AgentMode, AppConfig};
use crate::domain::types::Action;
use crate::infrastructure::executor::SandboxExecutor;
use crate::infrastructure::llm::HttpGenerator;
use crate::infrastructure::store::WorkspaceStore;

#[derive(Parser)]
#[command(name = "devagent", version, about = "Iterative coding agent with a sandboxed workspace")]
struct Cli {
    /// The task to work on
    prompt: String,

    /// Path to config.yaml (or .json); defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the workspace directory
    #[arg(short, long)]
    workspace: Option<String>,

    /// Override the iteration budget
    #[arg(long)]
    max_iterations: Option<u32>,

    /// Auto-approve every action instead of asking
    #[arg(long)]
    autonomous: bool,

    /// Context documents appended to the system prompt
    #[arg(long = "doc")]
    docs: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Configuration
    let mut config = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };
    if let Some(workspace) = &cli.workspace {
        config.workspace.path = workspace.clone();
    }
    if let Some(max_iterations) = cli.max_iterations {
        config.agent.max_iterations = max_iterations;
    }
    if cli.autonomous {
        config.agent.mode = AgentMode::Autonomous;
    }

    // 2. Logging: everything to a session log file, info to the console.
    std::fs::create_dir_all("logs").context("Failed to create logs directory")?;
    let file_appender = tracing_appender::rolling::never("logs", "session.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,hyper=warn,reqwest=warn"));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false);
    let console_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .init();

    tracing::info!("Starting devagent");

    // 3. Infrastructure
    let store = WorkspaceStore::new(&config.workspace).context("Failed to open workspace")?;
    let executor = SandboxExecutor::new(&config.executor, store.root());
    let generator = Arc::new(HttpGenerator::new(&config.model));

    // 4. Agent loop
    let mut agent = AgentLoop::new(config.clone(), generator, store, executor)
        .with_on_action(Box::new(approve_on_stdin))
        .with_on_iteration_complete(Box::new(|record| {
            for (action, result) in &record.actions {
                println!(
                    "[iteration {}] {} -> {:?}",
                    record.index,
                    action.kind.as_str(),
                    result.status
                );
            }
        }));

    for path in &cli.docs {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read context doc {}", path.display()))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        agent.add_context_doc(name, content);
    }

    // Ctrl-C requests a stop at the next iteration boundary.
    let handle = agent.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            handle.stop();
        }
    });

    let summary = agent.run(&cli.prompt).await?;
    tracing::info!(
        "Run finished: {:?} after {} iterations",
        agent.state(),
        summary.iterations
    );
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

/// Decision hook for approval mode: show the action and ask on stdin.
fn approve_on_stdin(action: &Action) -> bool {
    let rendered =
        serde_json::to_string_pretty(action).unwrap_or_else(|_| action.kind.as_str().to_string());
    eprintln!("Proposed action:\n{rendered}");
    eprint!("Approve? [y/N] ");
    let _ = std::io::stderr().flush();
    let mut line = String::new();
    if std::io::stdin().read_line(&mut line).is_err() {
        return false;
    }
    matches!(line.trim(), "y" | "Y" | "yes")
}
