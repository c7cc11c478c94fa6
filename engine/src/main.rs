//! CLI entry point: wires the six components together and dispatches to
//! the operator-facing subcommands of §6/§10.

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use eyre::{eyre, Context, Result};
use serde::Deserialize;
use tracing::info;

use rmri::cli::{Cli, Command};
use rmri::config::EngineConfig;
use rmri::domain::{Paper, Run, RunStatus};
use rmri::llm::Gateway;
use rmri::observer::{spawn_bridge, ObserverChannel};
use rmri::orchestrator::Orchestrator;
use rmri::queue::QueueRegistry;
use rmri::store::EngineStore;
use rmri::watchdog::Watchdog;

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();
}

#[derive(Debug, Deserialize)]
struct PaperInput {
    title: String,
    #[serde(default)]
    r#abstract: Option<String>,
    #[serde(default)]
    full_text: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging();
    let cli = Cli::parse();
    let config = EngineConfig::load(cli.config.as_ref()).context("failed to load configuration")?;

    let store = Arc::new(EngineStore::spawn(&config.store_path).context("failed to open persistence store")?);
    let gateway = Arc::new(Gateway::new(&config).context("failed to initialize LLM gateway")?);
    let queues = Arc::new(QueueRegistry::new());
    let orchestrator = Orchestrator::new(store.clone(), gateway, queues);
    tokio::spawn(Watchdog::new(store.clone()).run());
    spawn_bridge(store.clone(), ObserverChannel::new());

    match cli.command {
        Command::Run { workspace, owner, query, papers, domains, max_iterations, convergence_threshold } => {
            run_command(&store, &orchestrator, workspace, owner, query, papers, domains, max_iterations, convergence_threshold).await
        }
        Command::Status { run_id } => status_command(&store, &run_id).await,
        Command::Results { run_id } => results_command(&store, &run_id).await,
        Command::Cancel { run_id } => cancel_command(&orchestrator, &run_id).await,
        Command::Watch { run_id } => watch_command(&store, &run_id).await,
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_command(
    store: &EngineStore,
    orchestrator: &Orchestrator,
    workspace: String,
    owner: String,
    query: String,
    papers_path: std::path::PathBuf,
    domains: Vec<String>,
    max_iterations: u32,
    convergence_threshold: f64,
) -> Result<()> {
    let raw = fs::read_to_string(&papers_path).with_context(|| format!("failed to read {}", papers_path.display()))?;
    let inputs: Vec<PaperInput> = serde_json::from_str(&raw).context("papers file is not valid JSON")?;
    if inputs.is_empty() {
        return Err(eyre!("ERR_NO_PAPERS: papers file contains no papers"));
    }

    let run = Run::new(workspace, owner, query, domains, max_iterations, convergence_threshold);
    store.create_run(run.clone()).await.context("failed to persist run")?;
    for (i, input) in inputs.into_iter().enumerate() {
        let paper = Paper::new(&run.run_id, input.title, input.r#abstract, input.full_text, i as u32);
        store.create_paper(paper).await.context("failed to persist paper")?;
    }

    info!(run_id = %run.run_id, "run submitted");
    println!("{}", serde_json::json!({ "run_id": run.run_id, "status": "pending" }));

    orchestrator.drive_run(&run.run_id).await.map_err(|e| eyre!("{e}"))?;

    let finished = store.get_run(&run.run_id).await?.ok_or_else(|| eyre!("run disappeared"))?;
    println!("{}", serde_json::to_string_pretty(&finished)?);
    Ok(())
}

async fn status_command(store: &EngineStore, run_id: &str) -> Result<()> {
    let run = store.get_run(run_id).await?.ok_or_else(|| eyre!("run not found: {run_id}"))?;
    println!("{}", serde_json::to_string_pretty(&run)?);
    Ok(())
}

async fn results_command(store: &EngineStore, run_id: &str) -> Result<()> {
    let run = store.get_run(run_id).await?.ok_or_else(|| eyre!("run not found: {run_id}"))?;
    if !matches!(run.status, RunStatus::Converged | RunStatus::Completed) {
        return Err(eyre!("ERR_CONFLICT: run {run_id} is not terminal-success (status={})", run.status));
    }
    let result = store.get_result(run_id).await?.ok_or_else(|| eyre!("no result record for {run_id}"))?;
    println!("{}", serde_json::to_string_pretty(&result.data)?);
    Ok(())
}

async fn cancel_command(orchestrator: &Orchestrator, run_id: &str) -> Result<()> {
    orchestrator.cancel_run(run_id).await.map_err(|e| eyre!("{e}"))?;
    println!("{}", serde_json::json!({ "run_id": run_id, "status": "cancelled" }));
    Ok(())
}

/// Polls the Persistence Store rather than attaching to the in-process
/// Observer Channel: a `watch` invocation is a separate process from
/// whichever one is driving the run, so the broadcast channel (which is
/// in-memory) isn't reachable across the process boundary.
async fn watch_command(store: &EngineStore, run_id: &str) -> Result<()> {
    let mut last_seen_log = 0usize;
    loop {
        let run = store.get_run(run_id).await?.ok_or_else(|| eyre!("run not found: {run_id}"))?;
        let logs = store.list_logs(run_id).await?;
        for entry in logs.iter().skip(last_seen_log) {
            println!("{}", serde_json::json!({ "type": "log", "payload": entry }));
        }
        last_seen_log = logs.len();
        println!(
            "{}",
            serde_json::json!({ "type": "status", "payload": { "status": run.status, "progress_percentage": run.progress_percentage, "current_iteration": run.current_iteration } })
        );
        if run.status.is_terminal() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_secs(2)).await;
    }
}
