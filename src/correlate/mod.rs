//! Output correlation: reconstruct which generated artifact and which
//! result record belong to which input, despite the generator's lossy,
//! inconsistent naming.

pub mod cache;
pub mod keys;

pub use cache::CorrelatorCache;

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::store::{ResultRecord, ResultStore};
use crate::task::{MediaKind, Task};

/// Correlation options.
#[derive(Debug, Clone, Copy)]
pub struct CorrelateOptions {
    /// Worker pool size for metadata loads.
    pub workers: usize,
}

impl Default for CorrelateOptions {
    fn default() -> Self {
        Self { workers: 4 }
    }
}

/// One input paired with whatever the run produced for it.
///
/// `failed` and `ref_failed` are redundant with the record's own success
/// flag: an artifact missing its record, or a record missing its artifact,
/// still surfaces as a failure.
#[derive(Debug, Clone)]
pub struct MediaPair {
    pub source: PathBuf,
    pub generated: Vec<PathBuf>,
    pub record: Option<ResultRecord>,
    pub failed: bool,
    /// Header-probed dimensions of the first generated image artifact.
    pub artifact_dimensions: Option<(u32, u32)>,
    /// Reference-side artifacts, in comparison mode.
    pub reference_generated: Vec<PathBuf>,
    pub reference_record: Option<ResultRecord>,
    /// `None` outside comparison mode. Independent of `failed`.
    pub ref_failed: Option<bool>,
}

/// A directory's media files and metadata records, bucketed from a single
/// listing and keyed for joining.
struct SideIndex {
    /// Correlation key → artifact paths.
    artifacts: HashMap<String, Vec<PathBuf>>,
    /// Correlation key → loaded result record.
    records: HashMap<String, ResultRecord>,
}

pub struct ResultCorrelator;

impl ResultCorrelator {
    /// Rebuild input ↔ artifact ↔ record correspondence for one task.
    pub async fn correlate(
        task: &Task,
        cache: &CorrelatorCache,
        options: CorrelateOptions,
    ) -> Result<Vec<MediaPair>> {
        let inputs = Self::scan_inputs(&task.input_dir, task.kind)?;

        // Input keys in sorted order; prefix fallback picks the first match.
        let mut input_keys: BTreeMap<String, PathBuf> = BTreeMap::new();
        for input in &inputs {
            let stem = input
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default();
            let key = cache.key_for(input, || keys::input_key(stem));
            input_keys.entry(key).or_insert_with(|| input.clone());
        }

        let primary = Self::index_side(
            &task.output_dir,
            &task.metadata_dir,
            &task.name,
            &input_keys,
            cache,
            options.workers,
        )
        .await?;

        let reference = match &task.reference_dir {
            Some(ref_dir) => Some(
                Self::index_side(
                    &ref_dir.join(task.output_subdir()),
                    &ref_dir.join(task.metadata_subdir()),
                    &task.name,
                    &input_keys,
                    cache,
                    options.workers,
                )
                .await?,
            ),
            None => None,
        };

        // Probe image-artifact dimensions across the same bounded pool as
        // the metadata loads; already-cached paths are skipped.
        let mut pending: Vec<PathBuf> = Vec::new();
        for input in &inputs {
            let stem = input
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default();
            let key = cache.key_for(input, || keys::input_key(stem));
            if let Some(paths) = primary.artifacts.get(&key) {
                if let Some(p) = paths.iter().find(|p| MediaKind::Image.matches(p)) {
                    if cache.dimensions_for(p, || None).is_none() {
                        pending.push(p.clone());
                    }
                }
            }
        }
        pending.sort();
        pending.dedup();
        let probed = Self::probe_dimensions(pending, options.workers).await;

        let mut pairs = Vec::with_capacity(inputs.len());
        for input in inputs {
            let stem = input
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default();
            let key = cache.key_for(&input, || keys::input_key(stem));

            let generated = primary.artifacts.get(&key).cloned().unwrap_or_default();
            let record = primary.records.get(&key).cloned();

            // Redundant failure signals: no artifact on disk, no record, or
            // a record that says so. A stale success flag is overridden by
            // the artifact's absence.
            let failed = generated.is_empty() || !record.as_ref().is_some_and(|r| r.success);

            // Header-only probe, resolved through the per-run cache; a
            // failed probe stays uncached.
            let artifact_dimensions = generated
                .iter()
                .find(|p| MediaKind::Image.matches(p))
                .and_then(|p| cache.dimensions_for(p, || probed.get(p).copied()));

            let (reference_generated, reference_record, ref_failed) = match &reference {
                Some(side) => {
                    let ref_generated = side.artifacts.get(&key).cloned().unwrap_or_default();
                    let ref_record = side.records.get(&key).cloned();
                    let ref_failed =
                        ref_generated.is_empty() || !ref_record.as_ref().is_some_and(|r| r.success);
                    (ref_generated, ref_record, Some(ref_failed))
                }
                None => (Vec::new(), None, None),
            };

            pairs.push(MediaPair {
                source: input,
                generated,
                record,
                failed,
                artifact_dimensions,
                reference_generated,
                reference_record,
                ref_failed,
            });
        }

        Ok(pairs)
    }

    /// Single-pass listing of the input directory, filtered by kind.
    fn scan_inputs(input_dir: &Path, kind: MediaKind) -> Result<Vec<PathBuf>> {
        let mut inputs: Vec<PathBuf> = std::fs::read_dir(input_dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file() && kind.matches(p))
            .collect();
        inputs.sort();
        Ok(inputs)
    }

    /// Index one side (primary or reference): a single listing of the
    /// artifact directory bucketed by media kind, plus the metadata records
    /// loaded across a bounded pool. Missing directories index as empty —
    /// that absence shows up later as failed pairs, not as an error.
    async fn index_side(
        output_dir: &Path,
        metadata_dir: &Path,
        effect: &str,
        input_keys: &BTreeMap<String, PathBuf>,
        cache: &CorrelatorCache,
        workers: usize,
    ) -> Result<SideIndex> {
        let mut artifacts: HashMap<String, Vec<PathBuf>> = HashMap::new();
        for path in Self::scan_media(output_dir) {
            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string();
            let key = cache.key_for(&path, || keys::generated_key(&stem, &[effect]));

            let resolved = if input_keys.contains_key(&key) {
                key
            } else if key == keys::normalize(&stem) {
                // Suffix stripping changed nothing and the key is unknown:
                // fall back to prefix matching against the input keys.
                input_keys
                    .keys()
                    .find(|input_key| keys::matches_prefix(&key, input_key))
                    .cloned()
                    .unwrap_or(key)
            } else {
                key
            };
            artifacts.entry(resolved).or_default().push(path);
        }
        for paths in artifacts.values_mut() {
            paths.sort();
        }

        let records = Self::load_records(metadata_dir, workers).await;
        Ok(SideIndex { artifacts, records })
    }

    /// All media files from one directory listing, either kind. Tolerates a
    /// missing directory.
    fn scan_media(dir: &Path) -> Vec<PathBuf> {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return Vec::new();
        };
        entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.is_file() && (MediaKind::Image.matches(p) || MediaKind::Video.matches(p))
            })
            .collect()
    }

    /// Header-only dimension reads across a bounded pool. Unreadable
    /// artifacts are simply absent from the result.
    async fn probe_dimensions(
        paths: Vec<PathBuf>,
        workers: usize,
    ) -> HashMap<PathBuf, (u32, u32)> {
        let semaphore = Arc::new(Semaphore::new(workers.max(1)));
        let mut set = JoinSet::new();
        for path in paths {
            let semaphore = Arc::clone(&semaphore);
            set.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("probe semaphore closed");
                tokio::task::spawn_blocking(move || {
                    let dims = image::image_dimensions(&path).ok()?;
                    Some((path, dims))
                })
                .await
                .expect("probe worker panicked")
            });
        }

        let mut dims = HashMap::new();
        while let Some(joined) = set.join_next().await {
            if let Some((path, d)) = joined.expect("probe worker panicked") {
                dims.insert(path, d);
            }
        }
        dims
    }

    /// Load every `.json` record in the metadata directory across a bounded
    /// pool. Unparseable records are dropped — a missing record already
    /// marks its pair failed.
    async fn load_records(metadata_dir: &Path, workers: usize) -> HashMap<String, ResultRecord> {
        let Ok(entries) = std::fs::read_dir(metadata_dir) else {
            return HashMap::new();
        };
        let paths: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.is_file() && p.extension().and_then(|e| e.to_str()) == Some("json")
            })
            .collect();

        let semaphore = Arc::new(Semaphore::new(workers.max(1)));
        let mut set = JoinSet::new();
        for path in paths {
            let semaphore = Arc::clone(&semaphore);
            set.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("metadata semaphore closed");
                tokio::task::spawn_blocking(move || {
                    let stem = path
                        .file_stem()
                        .and_then(|s| s.to_str())
                        .unwrap_or_default()
                        .to_string();
                    let record = ResultStore::load(&path).ok()?;
                    Some((keys::metadata_key(&stem), record))
                })
                .await
                .expect("metadata worker panicked")
            });
        }

        let mut records = HashMap::new();
        while let Some(joined) = set.join_next().await {
            if let Some((key, record)) = joined.expect("metadata worker panicked") {
                records.insert(key, record);
            }
        }
        records
    }
}
