//! Task preparation: discover candidate files, validate them, and set up
//! the task's output layout.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::task::{FileCandidate, Task};
use crate::validator::{ValidationOutcome, ValidationRules, Validator};

/// One rejected file with its reason, for the aggregated report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub file: String,
    pub reason: String,
}

/// A task whose inputs were scanned and validated, ready for dispatch if
/// anything was accepted.
#[derive(Debug)]
pub struct PreparedTask {
    pub task: Task,
    pub accepted: Vec<FileCandidate>,
    pub rejections: Vec<Rejection>,
}

/// The preparer's verdict on a task.
#[derive(Debug)]
pub enum PrepareOutcome {
    Ready(PreparedTask),
    /// Nothing to do: input directory absent or no matching files.
    /// Logged and skipped, never an error.
    Skipped { task_name: String, reason: String },
}

/// Validation concurrency limits, taken from config.
#[derive(Debug, Clone, Copy)]
pub struct PrepareLimits {
    pub parallel: bool,
    pub workers: usize,
}

pub struct TaskPreparer;

impl TaskPreparer {
    /// Scan a task's input directory, validate every candidate, and create
    /// the output/metadata directories when anything passed.
    pub async fn prepare(
        task: Task,
        rules: &ValidationRules,
        limits: PrepareLimits,
    ) -> Result<PrepareOutcome> {
        if !task.input_dir.is_dir() {
            return Ok(PrepareOutcome::Skipped {
                reason: format!("input directory {} does not exist", task.input_dir.display()),
                task_name: task.name,
            });
        }

        let candidates = Self::scan(&task)?;
        if candidates.is_empty() {
            return Ok(PrepareOutcome::Skipped {
                reason: format!(
                    "no {} files in {}",
                    task.kind,
                    task.input_dir.display()
                ),
                task_name: task.name,
            });
        }

        let results = if limits.parallel {
            Self::validate_pooled(candidates, rules.clone(), limits.workers).await
        } else {
            Self::validate_sequential(candidates, rules)
        };

        let mut accepted = Vec::new();
        let mut rejections = Vec::new();
        for (candidate, outcome) in results {
            if outcome.accepted {
                accepted.push(candidate);
            } else {
                rejections.push(Rejection {
                    file: candidate.file_name().to_string(),
                    reason: outcome.reason,
                });
            }
        }

        if !accepted.is_empty() {
            std::fs::create_dir_all(&task.output_dir)?;
            std::fs::create_dir_all(&task.metadata_dir)?;
        }

        Ok(PrepareOutcome::Ready(PreparedTask {
            task,
            accepted,
            rejections,
        }))
    }

    /// One directory listing, filtered by the kind's extension set
    /// (case-insensitive), sorted by path for deterministic ordering.
    fn scan(task: &Task) -> Result<Vec<FileCandidate>> {
        let mut candidates: Vec<FileCandidate> = std::fs::read_dir(&task.input_dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && task.kind.matches(path))
            .map(|path| FileCandidate::new(path, task.kind))
            .collect();
        candidates.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(candidates)
    }

    fn validate_sequential(
        candidates: Vec<FileCandidate>,
        rules: &ValidationRules,
    ) -> Vec<(FileCandidate, ValidationOutcome)> {
        candidates
            .into_iter()
            .map(|c| {
                let outcome = Validator::validate(&c, rules);
                (c, outcome)
            })
            .collect()
    }

    /// Bounded worker pool. Validation is pure and per-file independent, so
    /// the only shared state is the semaphore.
    async fn validate_pooled(
        candidates: Vec<FileCandidate>,
        rules: ValidationRules,
        workers: usize,
    ) -> Vec<(FileCandidate, ValidationOutcome)> {
        let semaphore = Arc::new(Semaphore::new(workers.max(1)));
        let rules = Arc::new(rules);
        let mut set = JoinSet::new();

        for candidate in candidates {
            let semaphore = Arc::clone(&semaphore);
            let rules = Arc::clone(&rules);
            set.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("validation semaphore closed");
                tokio::task::spawn_blocking(move || {
                    let outcome = Validator::validate(&candidate, &rules);
                    (candidate, outcome)
                })
                .await
                .expect("validation worker panicked")
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = set.join_next().await {
            results.push(joined.expect("validation worker panicked"));
        }
        results.sort_by(|a, b| a.0.path.cmp(&b.0.path));
        results
    }
}
