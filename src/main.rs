mod cli;
mod config;
mod correlate;
mod dispatch;
mod error;
mod orchestrator;
mod preparer;
mod store;
mod task;
mod ui;
mod validator;

use anyhow::Result;
use clap::Parser;

use cli::{Cli, Command};
use config::BatchConfig;
use correlate::{CorrelateOptions, CorrelatorCache, ResultCorrelator};
use dispatch::AnyGenerator;
use error::PipelineError;
use orchestrator::BatchOrchestrator;
use preparer::{PrepareLimits, PrepareOutcome, TaskPreparer};
use task::Task;
use validator::Validator;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = BatchConfig::load(cli.config.as_deref())?;
    if let Some(max) = cli.max_retries {
        config.max_retries = max;
    }

    match cli.command {
        Command::Run { task } => run_batch(config, task).await,
        Command::Correlate { task } => correlate_tasks(config, task, cli.verbose).await,
        Command::Validate => validate_tasks(config).await,
    }
}

/// Narrow the configured task list to one task when a filter is given.
fn select_tasks(config: &mut BatchConfig, filter: Option<String>) -> Result<()> {
    if let Some(name) = filter {
        config.tasks.retain(|t| t.name == name);
        if config.tasks.is_empty() {
            return Err(PipelineError::TaskNotFound(name).into());
        }
    }
    Ok(())
}

async fn run_batch(mut config: BatchConfig, filter: Option<String>) -> Result<()> {
    select_tasks(&mut config, filter)?;
    let generator = AnyGenerator::from_config(&config)?;
    let orchestrator = BatchOrchestrator::new(generator, config);
    let report = orchestrator.run().await?;
    ui::print_report(&report);
    Ok(())
}

async fn correlate_tasks(
    mut config: BatchConfig,
    filter: Option<String>,
    verbose: bool,
) -> Result<()> {
    select_tasks(&mut config, filter)?;
    if config.tasks.is_empty() {
        return Err(PipelineError::NoTasks.into());
    }

    let cache = CorrelatorCache::new();
    let options = CorrelateOptions {
        workers: config.workers,
    };
    for task_config in &config.tasks {
        let task = Task::from_config(task_config);
        let pairs = ResultCorrelator::correlate(&task, &cache, options).await?;
        ui::print_pairs(&task.name, &pairs);
        if verbose {
            for pair in &pairs {
                if pair.failed {
                    let error = pair
                        .record
                        .as_ref()
                        .and_then(|r| r.error.as_deref())
                        .unwrap_or("no result record");
                    eprintln!("    {}: {error}", pair.source.display());
                }
                if pair.ref_failed == Some(true) {
                    let error = pair
                        .reference_record
                        .as_ref()
                        .and_then(|r| r.error.as_deref())
                        .unwrap_or("no reference record");
                    eprintln!("    {}: reference: {error}", pair.source.display());
                }
            }
        }
    }
    Ok(())
}

/// Prepare every task and print the accept/reject table without dispatching
/// anything. Still creates each ready task's output layout.
async fn validate_tasks(config: BatchConfig) -> Result<()> {
    if config.tasks.is_empty() {
        return Err(PipelineError::NoTasks.into());
    }

    let limits = PrepareLimits {
        parallel: config.parallel_validation,
        workers: config.workers,
    };
    let mut rejected_total = 0usize;
    for task_config in &config.tasks {
        let task = Task::from_config(task_config);
        let progress = ui::TaskProgress::start(&task.name);
        match TaskPreparer::prepare(task, &config.rules, limits).await? {
            PrepareOutcome::Skipped { task_name, reason } => {
                progress.warn(&format!("{task_name}: {reason}"));
            }
            PrepareOutcome::Ready(prepared) => {
                for candidate in &prepared.accepted {
                    // Probe again for the printed attributes.
                    let outcome = Validator::validate(candidate, &config.rules);
                    let detail = match (outcome.width, outcome.height, outcome.duration_secs) {
                        (Some(w), Some(h), Some(d)) => {
                            format!("{} ({w}x{h}, {d:.1}s)", candidate.file_name())
                        }
                        (Some(w), Some(h), None) => {
                            format!("{} ({w}x{h})", candidate.file_name())
                        }
                        _ => candidate.file_name().to_string(),
                    };
                    progress.file_done(&detail, true);
                }
                for rejection in &prepared.rejections {
                    progress.file_done(&rejection.file, false);
                    progress.warn(&rejection.reason);
                }
                rejected_total += prepared.rejections.len();
            }
        }
        progress.finish();
    }

    if rejected_total > 0 {
        println!("{rejected_total} file(s) would be rejected");
    } else {
        println!("All candidate files pass validation");
    }
    Ok(())
}
