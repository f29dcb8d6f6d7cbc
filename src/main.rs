use anyhow::{Context, Result, bail};
use clap::Parser;
use serde_json::{Value, json};
use uuid::Uuid;

use resolva::audit::AuditRecord;
use resolva::checkpoint::MemoryCheckpointStore;
use resolva::cli::{Cli, Command};
use resolva::config::ResolvaConfig;
use resolva::dispute::DisputeOrchestrator;
use resolva::orchestrator::Orchestrate;
use resolva::ui::DisputeProgress;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = ResolvaConfig::load()?;
    if let Some(max_retries) = cli.max_retries {
        config.max_retries = max_retries;
    }

    match cli.command {
        Command::Run {
            description,
            file,
            task_id,
        } => {
            let input = task_input(description, file, task_id)?;
            run_dispute(&config, &input, cli.verbose).await
        }
        Command::Resume { task_id } => {
            run_dispute(&config, &json!({ "task_id": task_id }), cli.verbose).await
        }
        Command::Status { task_id } => show_status(&config, &task_id).await,
        Command::Demo => run_demo(cli.verbose).await,
    }
}

/// Assemble the task mapping from the CLI arguments.
fn task_input(
    description: Option<String>,
    file: Option<String>,
    task_id: Option<String>,
) -> Result<Value> {
    if let Some(path) = file {
        let contents =
            std::fs::read_to_string(&path).with_context(|| format!("failed to read {path}"))?;
        return serde_json::from_str(&contents)
            .with_context(|| format!("{path} is not valid JSON"));
    }

    let Some(description) = description else {
        bail!("provide a dispute description or --file");
    };
    let task_id = task_id.unwrap_or_else(|| Uuid::new_v4().to_string());
    Ok(json!({ "task_id": task_id, "description": description }))
}

async fn run_dispute(config: &ResolvaConfig, input: &Value, verbose: bool) -> Result<()> {
    let mut orch = DisputeOrchestrator::from_config(config);
    orch.register_default_handlers()?;

    let task_id = input
        .get("task_id")
        .and_then(Value::as_str)
        .unwrap_or("<missing>")
        .to_string();
    let progress = DisputeProgress::start(&task_id);

    match orch.execute(input).await {
        Ok(workflow) => {
            let record = AuditRecord::from_workflow(&workflow);
            progress.finish(&record);
            if verbose {
                println!("{}", serde_json::to_string_pretty(&record)?);
                for entry in orch.execution_log().entries() {
                    println!("  [{}] {} {}", entry.recorded_at, entry.step, entry.status);
                }
            }
            Ok(())
        }
        Err(err) => {
            progress.fail(&err.to_string());
            Err(err.into())
        }
    }
}

async fn show_status(config: &ResolvaConfig, task_id: &str) -> Result<()> {
    let orch = DisputeOrchestrator::from_config(config);
    match orch.recover_workflow_from_checkpoint(task_id).await? {
        Some(workflow) => {
            let history: Vec<String> = workflow
                .state_history
                .iter()
                .map(|s| s.to_string())
                .collect();
            println!("task:       {}", workflow.task_id);
            println!("state:      {}", workflow.current_state);
            println!("history:    {}", history.join(" → "));
            println!("updated:    {}", workflow.updated_at);
            println!("retries:    {}", workflow.retry_count);
            if !workflow.invariant_violations.is_empty() {
                println!("violations: {}", workflow.invariant_violations.join("; "));
            }
        }
        None => println!("No checkpoint found for task {task_id}"),
    }
    Ok(())
}

/// Built-in demonstration: one dispute that resolves and one that escalates,
/// both against an in-memory store.
async fn run_demo(verbose: bool) -> Result<()> {
    let cases = [
        json!({
            "task_id": "demo-duplicate",
            "description": "I was charged twice for the same order",
            "transaction_id": "tx-1001",
            "order_id": "o-77",
        }),
        json!({
            "task_id": "demo-vague",
            "description": "something looks off on my statement",
        }),
    ];

    let mut orch = DisputeOrchestrator::new(std::sync::Arc::new(MemoryCheckpointStore::new()));
    orch.register_default_handlers()?;

    for input in &cases {
        let task_id = input["task_id"].as_str().unwrap_or_default().to_string();
        let progress = DisputeProgress::start(&task_id);
        match orch.execute(input).await {
            Ok(workflow) => {
                let record = AuditRecord::from_workflow(&workflow);
                progress.finish(&record);
                if verbose {
                    println!("{}", serde_json::to_string_pretty(&record)?);
                }
            }
            Err(err) => progress.fail(&err.to_string()),
        }
    }
    Ok(())
}
