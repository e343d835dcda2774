use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::sleep;
use uuid::Uuid;

use crate::config::BatchConfig;
use crate::dispatch::{Dispatcher, Generate, RetryPolicy};
use crate::error::PipelineError;
use crate::preparer::{PrepareLimits, PrepareOutcome, PreparedTask, TaskPreparer};
use crate::task::Task;
use crate::ui::{self, TaskProgress};

/// Outcome tally for one task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSummary {
    pub task: String,
    pub dispatched: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Present when the task never dispatched (missing inputs, empty scan,
    /// all files rejected, or an unexpected task error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<String>,
}

impl TaskSummary {
    fn skipped(task: String, reason: String) -> Self {
        Self {
            task,
            dispatched: 0,
            succeeded: 0,
            failed: 0,
            skipped: Some(reason),
        }
    }
}

/// Whole-run report, printed at the end of `run`.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub tasks: Vec<TaskSummary>,
}

impl RunReport {
    pub fn total_succeeded(&self) -> usize {
        self.tasks.iter().map(|t| t.succeeded).sum()
    }

    pub fn total_failed(&self) -> usize {
        self.tasks.iter().map(|t| t.failed).sum()
    }
}

/// Sequences preparation, validation policy, scheduling, and dispatch
/// across all configured tasks.
pub struct BatchOrchestrator<G: Generate + Send + Sync + 'static> {
    generator: Arc<G>,
    config: Arc<BatchConfig>,
}

impl<G: Generate + Send + Sync + 'static> BatchOrchestrator<G> {
    pub fn new(generator: G, config: BatchConfig) -> Self {
        Self {
            generator: Arc::new(generator),
            config: Arc::new(config),
        }
    }

    /// Run the whole batch. Fails fast only on configuration problems and,
    /// in strict mode, on any validation rejection; per-task trouble,
    /// preparation included, is contained and tallied, never propagated.
    pub async fn run(&self) -> Result<RunReport> {
        if self.config.tasks.is_empty() {
            return Err(PipelineError::NoTasks.into());
        }
        let started_at = Utc::now();

        let limits = PrepareLimits {
            parallel: self.config.parallel_validation,
            workers: self.config.workers,
        };

        // Phase 1: prepare every task before dispatching anything, so the
        // strict validation gate can see the whole batch.
        let mut summaries: Vec<TaskSummary> = Vec::new();
        let mut prepared: Vec<PreparedTask> = Vec::new();
        for task_config in &self.config.tasks {
            let task = Task::from_config(task_config);
            let task_name = task.name.clone();
            match TaskPreparer::prepare(task, &self.config.rules, limits).await {
                Ok(PrepareOutcome::Skipped { task_name, reason }) => {
                    ui::warn_line(&format!("Skipping task {task_name}: {reason}"));
                    summaries.push(TaskSummary::skipped(task_name, reason));
                }
                Ok(PrepareOutcome::Ready(p)) => prepared.push(p),
                // An IO fault in one task's tree must not take down the
                // rest of the batch.
                Err(e) => {
                    let reason = format!("preparation failed: {e}");
                    ui::warn_line(&format!("Skipping task {task_name}: {reason}"));
                    summaries.push(TaskSummary::skipped(task_name, reason));
                }
            }
        }

        // Phase 2: validation policy gate.
        if self.config.strict_validation {
            let rejected: Vec<String> = prepared
                .iter()
                .flat_map(|p| {
                    p.rejections
                        .iter()
                        .map(|r| format!("  - {}: {}: {}", p.task.name, r.file, r.reason))
                })
                .collect();
            if !rejected.is_empty() {
                // Legacy all-or-nothing: nothing dispatches anywhere.
                return Err(PipelineError::ValidationFailed {
                    file_count: rejected.len(),
                    report: rejected.join("\n"),
                }
                .into());
            }
        }

        let mut runnable: Vec<PreparedTask> = Vec::new();
        for p in prepared {
            if p.accepted.is_empty() {
                let reason = format!(
                    "all {} candidate file(s) rejected: {}",
                    p.rejections.len(),
                    p.rejections
                        .iter()
                        .map(|r| format!("{} ({})", r.file, r.reason))
                        .collect::<Vec<_>>()
                        .join(", ")
                );
                ui::warn_line(&format!("Skipping task {}: {reason}", p.task.name));
                summaries.push(TaskSummary::skipped(p.task.name.clone(), reason));
            } else {
                for r in &p.rejections {
                    ui::warn_line(&format!("{}: rejected {}: {}", p.task.name, r.file, r.reason));
                }
                runnable.push(p);
            }
        }

        // Phase 3: dispatch.
        if self.config.parallel_tasks {
            summaries.extend(self.run_tasks_concurrent(runnable).await);
        } else {
            summaries.extend(self.run_tasks_sequential(runnable).await);
        }

        Ok(RunReport {
            run_id: Uuid::new_v4().to_string(),
            started_at,
            finished_at: Utc::now(),
            tasks: summaries,
        })
    }

    async fn run_tasks_sequential(&self, tasks: Vec<PreparedTask>) -> Vec<TaskSummary> {
        let mut summaries = Vec::with_capacity(tasks.len());
        for (i, prepared) in tasks.into_iter().enumerate() {
            if i > 0 {
                sleep(Duration::from_millis(self.config.task_delay_ms)).await;
            }
            summaries.push(
                Self::run_one_task(Arc::clone(&self.generator), Arc::clone(&self.config), prepared)
                    .await,
            );
        }
        summaries
    }

    /// Independent tasks over a bounded pool. Each task owns its directory
    /// subtree, so there is no cross-task state to lock.
    async fn run_tasks_concurrent(&self, tasks: Vec<PreparedTask>) -> Vec<TaskSummary> {
        let semaphore = Arc::new(Semaphore::new(self.config.workers.max(1)));
        let mut set = JoinSet::new();
        for prepared in tasks {
            let semaphore = Arc::clone(&semaphore);
            let generator = Arc::clone(&self.generator);
            let config = Arc::clone(&self.config);
            set.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("task semaphore closed");
                Self::run_one_task(generator, config, prepared).await
            });
        }

        let mut summaries = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(summary) => summaries.push(summary),
                // A panicking task must not take the rest of the run down.
                Err(e) => summaries.push(TaskSummary::skipped(
                    "<unknown>".to_string(),
                    format!("task aborted: {e}"),
                )),
            }
        }
        summaries
    }

    async fn run_one_task(
        generator: Arc<G>,
        config: Arc<BatchConfig>,
        prepared: PreparedTask,
    ) -> TaskSummary {
        wait_for_schedule(&prepared.task).await;

        let policy = RetryPolicy {
            max_retries: config.max_retries,
            delay_ms: config.retry_delay_ms,
        };
        let progress = TaskProgress::start(&prepared.task.name);
        let dispatcher = Dispatcher::new(
            generator.as_ref(),
            policy,
            Duration::from_millis(config.file_delay_ms),
            &progress,
        );
        let records = dispatcher.dispatch_all(&prepared.accepted, &prepared.task).await;
        progress.finish();

        let succeeded = records.iter().filter(|r| r.success).count();
        TaskSummary {
            task: prepared.task.name,
            dispatched: records.len(),
            succeeded,
            failed: records.len() - succeeded,
            skipped: None,
        }
    }
}

/// Sleep until the task's `start_at`, when it lies in the future.
async fn wait_for_schedule(task: &Task) {
    if let Some(start_at) = task.start_at {
        let now = Utc::now();
        if start_at > now {
            let wait = (start_at - now).to_std().unwrap_or(Duration::ZERO);
            ui::warn_line(&format!(
                "Task {} scheduled for {start_at}, waiting {}s",
                task.name,
                wait.as_secs()
            ));
            sleep(wait).await;
        }
    }
}
