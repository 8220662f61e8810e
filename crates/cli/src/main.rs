//! `rusty-automation` CLI entry-point.
//!
//! Available sub-commands:
//! - `serve`    — start the API server and the scheduler.
//! - `worker`   — start only the scheduler (wait-ticket poller, cron triggers).
//! - `migrate`  — run pending database migrations.
//! - `validate` — validate a workflow JSON file.
//! - `run`      — fire a stored workflow's manual trigger and run it inline.

mod config;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use api::AppState;
use db::DbPool;
use engine::{RunOutcome, WorkflowDefinition, WorkflowExecutor};
use nodes::Collaborators;
use scheduler::{Scheduler, WorkerPool};

use crate::config::AppConfig;

#[derive(Parser)]
#[command(
    name = "rusty-automation",
    about = "Workflow automation engine",
    version
)]
struct Cli {
    /// JSON configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Overrides `database_url` from the configuration file.
    #[arg(long, global = true, env = "DATABASE_URL")]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the REST API server together with the scheduler.
    Serve {
        /// Overrides `bind` from the configuration file.
        #[arg(long)]
        bind: Option<std::net::SocketAddr>,
    },
    /// Start only the scheduler.
    Worker,
    /// Run pending database migrations.
    Migrate,
    /// Validate a workflow definition JSON file.
    Validate {
        /// Path to the workflow JSON file.
        path: PathBuf,
    },
    /// Fire a stored workflow's manual trigger and advance it until it
    /// completes, fails or suspends.
    Run {
        workflow_id: String,
        /// Initial context as a JSON object.
        #[arg(long, default_value = "{}")]
        input: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(url) = cli.database_url {
        config.database_url = url;
    }

    match cli.command {
        Command::Serve { bind } => {
            if let Some(bind) = bind {
                config.bind = bind;
            }
            let (workers, scheduler) = start_engine(&config).await?;
            let executor = workers.executor().clone();
            let shutdown = shutdown_on_ctrl_c();

            let scheduler_task = tokio::spawn({
                let shutdown = shutdown.clone();
                async move { scheduler.run(shutdown).await }
            });
            api::serve(config.bind, AppState::new(workers), shutdown.clone())
                .await
                .context("API server failed")?;

            executor.shutdown();
            scheduler_task.await??;
        }
        Command::Worker => {
            let (workers, scheduler) = start_engine(&config).await?;
            scheduler.run(shutdown_on_ctrl_c()).await?;
            workers.executor().shutdown();
        }
        Command::Migrate => {
            info!("Running migrations against {}", config.database_url);
            connect(&config).await?;
            info!("Migrations applied successfully");
        }
        Command::Validate { path } => validate(&path)?,
        Command::Run { workflow_id, input } => {
            let input: serde_json::Value = serde_json::from_str(&input).context("--input is not JSON")?;
            let pool = connect(&config).await?;
            let executor = WorkflowExecutor::new(pool, Collaborators::local(), config.executor.clone());

            let exec = executor.fire_manual(&workflow_id, None, input).await?;
            info!(execution_id = %exec.id, "execution started");
            match executor.run(exec.id).await? {
                RunOutcome::Completed { result } => {
                    println!("{}", serde_json::to_string_pretty(&result)?)
                }
                RunOutcome::Suspended(ticket) => {
                    println!("Execution {} is waiting at '{}': {:?}", exec.id, ticket.node_id, ticket.wake)
                }
                RunOutcome::Failed { node_id, error } => {
                    bail!("execution {} failed at '{node_id}': {error}", exec.id)
                }
                other => println!("Execution {} stopped: {other:?}", exec.id),
            }
        }
    }

    Ok(())
}

async fn connect(config: &AppConfig) -> anyhow::Result<DbPool> {
    let pool = db::pool::create_pool(&config.database_url, config.max_connections)
        .await
        .context("failed to connect to database")?;
    db::pool::run_migrations(&pool).await.context("migration failed")?;
    Ok(pool)
}

/// One executor and one worker pool per process, shared by the API and
/// the scheduler.
async fn start_engine(config: &AppConfig) -> anyhow::Result<(WorkerPool, Scheduler)> {
    let pool = connect(config).await?;
    let executor = Arc::new(WorkflowExecutor::new(pool, Collaborators::local(), config.executor.clone()));
    let workers = WorkerPool::new(executor, config.scheduler.workers);
    let scheduler = Scheduler::new(workers.clone(), config.scheduler.clone());
    Ok((workers, scheduler))
}

fn shutdown_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    tokio::spawn({
        let token = token.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "cannot listen for ctrl-c");
                return;
            }
            info!("shutdown requested");
            token.cancel();
        }
    });
    token
}

fn validate(path: &Path) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read file {}", path.display()))?;
    let workflow: WorkflowDefinition = serde_json::from_str(&content).context("invalid workflow JSON")?;

    match engine::validate(&workflow) {
        Ok(graph) => {
            println!("✅ Workflow is valid. Node order: {:?}", graph.topological_order());
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ Validation failed: {e}");
            std::process::exit(1);
        }
    }
}
