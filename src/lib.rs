// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod logging;
pub mod types;
pub mod ui;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::config::model::{Configuration, Task};
use crate::dag::{ContainerDependencyGraph, resolve_execution_order};
use crate::engine::stages::{RunStagePlanOptions, plan_run_stage};
use crate::engine::state_machine::FAILED_EXIT_CODE;
use crate::engine::task_runner::TaskRunner;
use crate::exec::{CancellationContext, DockerCliRuntime};
use crate::fs::RealFileSystem;
use crate::ui::SimpleEventLogger;

/// High-level entry point used by `main.rs`. Returns the process exit code.
///
/// This wires together:
/// - config loading
/// - task listing and dry runs
/// - the task runner with the Docker CLI runtime
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<i32> {
    let config_path = PathBuf::from(&args.config);
    let config = load_and_validate(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    if args.list_tasks {
        print!("{}", task_list(&config));
        return Ok(0);
    }

    let task_name = args
        .task
        .clone()
        .context("no task given; use --list-tasks to see the available tasks")?;

    if args.dry_run {
        print!("{}", dry_run(&config, &task_name, &args)?);
        return Ok(0);
    }

    let cancellation = CancellationContext::new();
    {
        let cancellation = cancellation.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            info!("Ctrl+C received");
            cancellation.cancel();
        });
    }

    let runner = TaskRunner::new(
        Arc::new(config),
        Arc::new(DockerCliRuntime::new()),
        Arc::new(RealFileSystem),
        cancellation,
        args.task_run_options(),
    )
    .with_logger(Arc::new(SimpleEventLogger::new(args.output)));

    let exit_code = runner.run_with_prerequisites(&task_name).await?;
    info!(task = %task_name, exit_code, "done");

    Ok(i32::try_from(exit_code).unwrap_or(FAILED_EXIT_CODE as i32))
}

/// Tasks grouped by their `group`, ungrouped tasks last.
pub fn task_list(config: &Configuration) -> String {
    let mut groups: BTreeMap<Option<&str>, Vec<&Task>> = BTreeMap::new();
    for task in config.tasks.values() {
        groups.entry(task.group.as_deref()).or_default().push(task);
    }

    let mut out = String::new();
    let ungrouped = groups.remove(&None);
    let sections = groups
        .into_iter()
        .map(|(group, tasks)| (format!("{}:", group.unwrap_or_default()), tasks))
        .chain(ungrouped.map(|tasks| ("Ungrouped tasks:".to_string(), tasks)));

    for (heading, tasks) in sections {
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&heading);
        out.push('\n');
        for task in tasks {
            match &task.description {
                Some(description) => out.push_str(&format!("- {}: {}\n", task.name, description)),
                None => out.push_str(&format!("- {}\n", task.name)),
            }
        }
    }

    out
}

/// Execution order and planned run-stage rules, without touching the runtime.
pub fn dry_run(config: &Configuration, task_name: &str, args: &CliArgs) -> crate::errors::Result<String> {
    let order = resolve_execution_order(config, task_name, args.skip_prerequisites)?;
    let mut out = format!("taskbox dry-run for '{task_name}'\n");

    for (index, task) in order.iter().enumerate() {
        out.push_str(&format!("\n{}. {}\n", index + 1, task.name));

        if task.run.is_none() {
            out.push_str("   (no container to run)\n");
            continue;
        }

        let graph = ContainerDependencyGraph::for_task(config, task)?;
        let additional_arguments = if index + 1 == order.len() {
            args.additional_arguments.clone()
        } else {
            Vec::new()
        };
        let options = RunStagePlanOptions {
            project_name: config.project_name.clone(),
            additional_arguments,
        };

        out.push_str(&format!(
            "   containers (startup order): {}\n",
            graph.startup_order().join(", ")
        ));
        for rule in plan_run_stage(&graph, &options) {
            out.push_str(&format!("   - {rule}\n"));
        }
    }

    debug!("dry-run complete (no execution)");
    Ok(out)
}
