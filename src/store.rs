//! Durable per-input result records.
//!
//! One JSON record per processed input, written atomically (temp file in the
//! same directory, then rename) so a crash mid-write never leaves a partial
//! record at the canonical path. The destination key derives from the source
//! file's stem only, so reprocessing an input overwrites its prior record.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// The persisted outcome of processing one input file.
///
/// Core fields are explicit; task parameters and generator-specific fields
/// pass through untouched in the flattened map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultRecord {
    /// Source input filename (with extension).
    pub source_image: String,
    pub success: bool,
    /// Total attempts made, including the terminal one.
    pub attempts: u32,
    pub processing_time_seconds: f64,
    /// Local wall-clock stamp, `YYYY-MM-DD HH:MM:SS`.
    pub processing_timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ResultRecord {
    /// Current wall-clock stamp in the record's format.
    pub fn timestamp_now() -> String {
        Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
    }

    /// Stem of the source file, the basis for the record's filesystem key.
    pub fn source_stem(&self) -> &str {
        Path::new(&self.source_image)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&self.source_image)
    }
}

/// Filesystem key for an input's record: `{stem}_metadata.json`.
pub fn record_file_name(stem: &str) -> String {
    format!("{stem}_metadata.json")
}

/// Writes [`ResultRecord`]s atomically. Failures are reported through the
/// boolean return, never raised — the in-memory outcome is still known to
/// the caller even when it could not be durably recorded.
pub struct ResultStore;

impl ResultStore {
    pub fn persist(record: &ResultRecord, metadata_dir: &Path) -> bool {
        match Self::try_persist(record, metadata_dir) {
            Ok(_) => true,
            Err(e) => {
                eprintln!(
                    "  ! Failed to persist record for {}: {e}",
                    record.source_image
                );
                false
            }
        }
    }

    fn try_persist(record: &ResultRecord, metadata_dir: &Path) -> Result<PathBuf, PipelineError> {
        let name = record_file_name(record.source_stem());
        let canonical = metadata_dir.join(&name);
        let tmp = metadata_dir.join(format!(".{name}.tmp"));

        let bytes = serde_json::to_vec_pretty(record)?;
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, &canonical)?;
        Ok(canonical)
    }

    /// Load a record back from disk (used by the correlator).
    pub fn load(path: &Path) -> Result<ResultRecord, PipelineError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(source: &str, success: bool) -> ResultRecord {
        ResultRecord {
            source_image: source.to_string(),
            success,
            attempts: 1,
            processing_time_seconds: 2.5,
            processing_timestamp: ResultRecord::timestamp_now(),
            error: if success {
                None
            } else {
                Some("backend exploded".to_string())
            },
            extra: serde_json::Map::new(),
        }
    }

    #[test]
    fn persist_writes_record_under_stem_key() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ResultStore::persist(&record("sunset.jpg", true), dir.path()));

        let loaded = ResultStore::load(&dir.path().join("sunset_metadata.json")).unwrap();
        assert_eq!(loaded.source_image, "sunset.jpg");
        assert!(loaded.success);
        assert_eq!(loaded.attempts, 1);
    }

    #[test]
    fn persist_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ResultStore::persist(&record("sunset.jpg", true), dir.path()));

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["sunset_metadata.json"]);
    }

    #[test]
    fn reprocessing_overwrites_wholesale() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ResultStore::persist(&record("sunset.jpg", false), dir.path()));
        assert!(ResultStore::persist(&record("sunset.jpg", true), dir.path()));

        let loaded = ResultStore::load(&dir.path().join("sunset_metadata.json")).unwrap();
        // Fully the new value: success flipped and the old error is gone.
        assert!(loaded.success);
        assert!(loaded.error.is_none());
    }

    #[test]
    fn error_field_omitted_on_success() {
        let json = serde_json::to_string(&record("a.jpg", true)).unwrap();
        assert!(!json.contains("\"error\""));

        let json = serde_json::to_string(&record("a.jpg", false)).unwrap();
        assert!(json.contains("backend exploded"));
    }

    #[test]
    fn extra_fields_flatten_and_roundtrip() {
        let mut rec = record("a.jpg", true);
        rec.extra.insert(
            "prompt".to_string(),
            serde_json::Value::String("dreamy sunset".into()),
        );
        let json = serde_json::to_string(&rec).unwrap();
        assert!(json.contains("\"prompt\":\"dreamy sunset\""));

        let back: ResultRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(
            back.extra.get("prompt").and_then(|v| v.as_str()),
            Some("dreamy sunset")
        );
    }

    #[test]
    fn persist_to_missing_dir_returns_false() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(!ResultStore::persist(&record("a.jpg", true), &missing));
    }

    #[test]
    fn canonical_path_is_never_partial() {
        // A leftover temp file from an interrupted earlier write must not
        // corrupt the canonical record.
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(".sunset_metadata.json.tmp"),
            b"{\"half\": tru",
        )
        .unwrap();

        assert!(ResultStore::persist(&record("sunset.jpg", true), dir.path()));
        let loaded = ResultStore::load(&dir.path().join("sunset_metadata.json")).unwrap();
        assert_eq!(loaded.source_image, "sunset.jpg");
    }
}
