use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::TaskConfig;

/// The media kind a task operates on. Determines which files the scan picks
/// up and which validation rules apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    /// File extensions recognized for this kind, lowercase without the dot.
    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            MediaKind::Image => &["jpg", "jpeg", "png", "webp", "bmp"],
            MediaKind::Video => &["mp4", "mov", "avi", "mkv", "webm"],
        }
    }

    /// Case-insensitive extension match against this kind's set.
    pub fn matches(&self, path: &Path) -> bool {
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return false;
        };
        let lower = ext.to_lowercase();
        self.extensions().contains(&lower.as_str())
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Image => write!(f, "image"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

/// One configured unit of batch work, resolved to absolute layout paths.
///
/// Built once from [`TaskConfig`] at orchestrator start; the dispatcher
/// never mutates it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Task identifier, also the effect name appended by generators to
    /// artifact filenames (the correlator strips it back out).
    pub name: String,
    pub kind: MediaKind,
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub metadata_dir: PathBuf,
    /// Reference tree for comparison mode, laid out like the task dir.
    pub reference_dir: Option<PathBuf>,
    /// Earliest instant dispatch may begin. A past instant means "now".
    pub start_at: Option<DateTime<Utc>>,
    /// Opaque generation parameters, passed through to the generator and
    /// snapshotted into each result record.
    pub params: serde_json::Map<String, serde_json::Value>,
}

impl Task {
    /// Resolve a task's layout from its configuration.
    pub fn from_config(cfg: &TaskConfig) -> Self {
        let dir = PathBuf::from(&cfg.dir);
        Self {
            name: cfg.name.clone(),
            kind: cfg.kind,
            input_dir: dir.join(&cfg.input_subdir),
            output_dir: dir.join(&cfg.output_subdir),
            metadata_dir: dir.join(&cfg.metadata_subdir),
            reference_dir: cfg.reference_dir.as_ref().map(PathBuf::from),
            start_at: cfg.start_at,
            params: cfg.generator_params.clone(),
        }
    }

    /// Output subdirectory name, used to resolve the same layout under a
    /// reference tree.
    pub fn output_subdir(&self) -> &str {
        self.output_dir
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("generated")
    }

    /// Metadata subdirectory name, for the same purpose.
    pub fn metadata_subdir(&self) -> &str {
        self.metadata_dir
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("Metadata")
    }
}

/// A scanned input file with its inferred kind. Transient — produced by the
/// preparer's directory scan, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileCandidate {
    pub path: PathBuf,
    pub kind: MediaKind,
}

impl FileCandidate {
    pub fn new(path: PathBuf, kind: MediaKind) -> Self {
        Self { path, kind }
    }

    /// Full filename including extension.
    pub fn file_name(&self) -> &str {
        self.path.file_name().and_then(|s| s.to_str()).unwrap_or("")
    }
}
