//! File dispatch: one bounded-retry generator call loop per input file,
//! ending in exactly one persisted result record.

pub mod generator;
pub mod machine;

pub use generator::{AnyGenerator, CommandGenerator, Generate, GeneratedArtifact, HttpGenerator};
pub use machine::{AttemptOutcome, DispatchState, RetryMachine, RetryPolicy, Transition};

use std::time::{Duration, Instant};

use tokio::time::sleep;

use crate::store::{ResultRecord, ResultStore};
use crate::task::{FileCandidate, Task};
use crate::ui::TaskProgress;

/// Drives accepted files of one task through the generator under the retry
/// policy, pacing between files with a fixed delay.
pub struct Dispatcher<'a, G: Generate> {
    generator: &'a G,
    policy: RetryPolicy,
    file_delay: Duration,
    progress: &'a TaskProgress,
}

impl<'a, G: Generate> Dispatcher<'a, G> {
    pub fn new(
        generator: &'a G,
        policy: RetryPolicy,
        file_delay: Duration,
        progress: &'a TaskProgress,
    ) -> Self {
        Self {
            generator,
            policy,
            file_delay,
            progress,
        }
    }

    /// Process one input to its terminal outcome. Never propagates an
    /// error — failures land in the record's `error` field. Writes exactly
    /// one record; non-terminal attempts write nothing.
    pub async fn dispatch(&self, candidate: &FileCandidate, task: &Task) -> ResultRecord {
        self.progress.file(candidate.file_name());
        let started = Instant::now();
        let mut machine = RetryMachine::new(self.policy.clone());
        let mut artifact: Option<GeneratedArtifact> = None;
        let mut last_error: Option<String> = None;

        let success = loop {
            let outcome = match self
                .generator
                .generate(&candidate.path, &task.name, &task.params, &task.output_dir)
                .await
            {
                Ok(a) => {
                    artifact = Some(a);
                    AttemptOutcome::Success
                }
                Err(e) => {
                    last_error = Some(e.to_string());
                    AttemptOutcome::Failure(e.to_string())
                }
            };

            match machine.next(outcome) {
                Transition::Retry {
                    next_attempt,
                    reason,
                } => {
                    self.progress.retry(
                        next_attempt,
                        self.policy.max_retries,
                        candidate.file_name(),
                        &reason,
                    );
                    sleep(self.policy.delay()).await;
                }
                Transition::Complete { success } => break success,
            }
        };

        let record = self.build_record(
            candidate,
            task,
            success,
            machine.attempts(),
            started.elapsed(),
            if success { None } else { last_error },
            artifact,
        );
        ResultStore::persist(&record, &task.metadata_dir);
        self.progress.file_done(candidate.file_name(), record.success);
        record
    }

    /// Dispatch a task's files in order, sleeping the fixed inter-file
    /// delay between them. Strictly sequential, never concurrent within a
    /// task.
    pub async fn dispatch_all(&self, candidates: &[FileCandidate], task: &Task) -> Vec<ResultRecord> {
        let mut records = Vec::with_capacity(candidates.len());
        for (i, candidate) in candidates.iter().enumerate() {
            if i > 0 {
                sleep(self.file_delay).await;
            }
            records.push(self.dispatch(candidate, task).await);
        }
        records
    }

    #[allow(clippy::too_many_arguments)]
    fn build_record(
        &self,
        candidate: &FileCandidate,
        task: &Task,
        success: bool,
        attempts: u32,
        elapsed: Duration,
        error: Option<String>,
        artifact: Option<GeneratedArtifact>,
    ) -> ResultRecord {
        // Snapshot of the task parameters, plus artifact locations.
        let mut extra = task.params.clone();
        extra.insert(
            "effect".to_string(),
            serde_json::Value::String(task.name.clone()),
        );
        if let Some(artifact) = artifact {
            let files: Vec<serde_json::Value> = artifact
                .paths
                .iter()
                .map(|p| serde_json::Value::String(p.display().to_string()))
                .collect();
            extra.insert("generated_files".to_string(), serde_json::Value::Array(files));
            if let Some(id) = artifact.generation_id {
                extra.insert("generation_id".to_string(), serde_json::Value::String(id));
            }
        }

        ResultRecord {
            source_image: candidate.file_name().to_string(),
            success,
            attempts,
            processing_time_seconds: elapsed.as_secs_f64(),
            processing_timestamp: ResultRecord::timestamp_now(),
            error,
            extra,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GeneratorError;
    use crate::task::MediaKind;
    use std::path::Path;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Test double: fails the first `failures` calls, then succeeds.
    struct FlakyGenerator {
        failures: u32,
        calls: AtomicU32,
    }

    impl FlakyGenerator {
        fn failing_first(failures: u32) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Generate for FlakyGenerator {
        async fn generate(
            &self,
            input: &Path,
            effect: &str,
            _params: &serde_json::Map<String, serde_json::Value>,
            output_dir: &Path,
        ) -> Result<GeneratedArtifact, GeneratorError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(GeneratorError::InBand("backend busy".to_string()));
            }
            let stem = input.file_stem().and_then(|s| s.to_str()).unwrap_or("in");
            let path = output_dir.join(format!("{stem}_{effect}_generated.mp4"));
            std::fs::write(&path, b"artifact").unwrap();
            Ok(GeneratedArtifact {
                paths: vec![path],
                generation_id: Some("gen-1".to_string()),
            })
        }
    }

    fn test_task(dir: &Path) -> Task {
        let mut params = serde_json::Map::new();
        params.insert(
            "prompt".to_string(),
            serde_json::Value::String("crashing waves".to_string()),
        );
        let task = Task {
            name: "wave".to_string(),
            kind: MediaKind::Image,
            input_dir: dir.join("input"),
            output_dir: dir.join("generated"),
            metadata_dir: dir.join("Metadata"),
            reference_dir: None,
            start_at: None,
            params,
        };
        std::fs::create_dir_all(&task.input_dir).unwrap();
        std::fs::create_dir_all(&task.output_dir).unwrap();
        std::fs::create_dir_all(&task.metadata_dir).unwrap();
        task
    }

    fn candidate(task: &Task, name: &str) -> FileCandidate {
        let path = task.input_dir.join(name);
        std::fs::write(&path, b"input").unwrap();
        FileCandidate::new(path, MediaKind::Image)
    }

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            delay_ms: 0,
        }
    }

    fn quiet_progress() -> TaskProgress {
        TaskProgress::start("test")
    }

    #[tokio::test]
    async fn always_failing_generator_produces_three_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let task = test_task(dir.path());
        let generator = FlakyGenerator::failing_first(u32::MAX);
        let progress = quiet_progress();
        let dispatcher = Dispatcher::new(&generator, fast_policy(3), Duration::ZERO, &progress);

        let record = dispatcher.dispatch(&candidate(&task, "sunset.jpg"), &task).await;

        assert!(!record.success);
        assert_eq!(record.attempts, 3);
        assert_eq!(generator.calls(), 3);
        assert_eq!(record.error.as_deref(), Some("API reported failure: backend busy"));
    }

    #[tokio::test]
    async fn fails_twice_then_succeeds_with_three_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let task = test_task(dir.path());
        let generator = FlakyGenerator::failing_first(2);
        let progress = quiet_progress();
        let dispatcher = Dispatcher::new(&generator, fast_policy(3), Duration::ZERO, &progress);

        let record = dispatcher.dispatch(&candidate(&task, "sunset.jpg"), &task).await;

        assert!(record.success);
        assert_eq!(record.attempts, 3);
        assert!(record.error.is_none());
    }

    #[tokio::test]
    async fn terminal_outcome_writes_exactly_one_record() {
        let dir = tempfile::tempdir().unwrap();
        let task = test_task(dir.path());
        let generator = FlakyGenerator::failing_first(1);
        let progress = quiet_progress();
        let dispatcher = Dispatcher::new(&generator, fast_policy(3), Duration::ZERO, &progress);

        dispatcher.dispatch(&candidate(&task, "sunset.jpg"), &task).await;

        let records: Vec<_> = std::fs::read_dir(&task.metadata_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(records, vec!["sunset_metadata.json"]);
    }

    #[tokio::test]
    async fn record_snapshots_params_and_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let task = test_task(dir.path());
        let generator = FlakyGenerator::failing_first(0);
        let progress = quiet_progress();
        let dispatcher = Dispatcher::new(&generator, fast_policy(3), Duration::ZERO, &progress);

        let record = dispatcher.dispatch(&candidate(&task, "sunset.jpg"), &task).await;

        assert_eq!(record.source_image, "sunset.jpg");
        assert_eq!(
            record.extra.get("prompt").and_then(|v| v.as_str()),
            Some("crashing waves")
        );
        assert_eq!(
            record.extra.get("effect").and_then(|v| v.as_str()),
            Some("wave")
        );
        assert_eq!(
            record.extra.get("generation_id").and_then(|v| v.as_str()),
            Some("gen-1")
        );
        let files = record.extra.get("generated_files").unwrap().as_array().unwrap();
        assert_eq!(files.len(), 1);
    }

    #[tokio::test]
    async fn dispatch_all_is_sequential_and_complete() {
        let dir = tempfile::tempdir().unwrap();
        let task = test_task(dir.path());
        let generator = FlakyGenerator::failing_first(0);
        let progress = quiet_progress();
        let dispatcher = Dispatcher::new(&generator, fast_policy(3), Duration::ZERO, &progress);

        let candidates = vec![
            candidate(&task, "a.jpg"),
            candidate(&task, "b.jpg"),
            candidate(&task, "c.jpg"),
        ];
        let records = dispatcher.dispatch_all(&candidates, &task).await;

        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| r.success));
        let sources: Vec<_> = records.iter().map(|r| r.source_image.as_str()).collect();
        assert_eq!(sources, vec!["a.jpg", "b.jpg", "c.jpg"]);
    }

    #[tokio::test]
    async fn dispatch_survives_missing_metadata_dir() {
        // Persistence failure is reported, not raised; the record still
        // comes back to the caller.
        let dir = tempfile::tempdir().unwrap();
        let task = {
            let mut t = test_task(dir.path());
            std::fs::remove_dir(&t.metadata_dir).unwrap();
            t.metadata_dir = dir.path().join("gone");
            t
        };
        let generator = FlakyGenerator::failing_first(0);
        let progress = quiet_progress();
        let dispatcher = Dispatcher::new(&generator, fast_policy(3), Duration::ZERO, &progress);

        let record = dispatcher.dispatch(&candidate(&task, "sunset.jpg"), &task).await;
        assert!(record.success);
    }
}
