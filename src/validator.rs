//! Declarative file validation for batch inputs.
//!
//! [`Validator::validate`] applies per-kind rules (size, dimensions, aspect
//! ratio, duration) to a candidate file and returns a [`ValidationOutcome`].
//! Rejection is data, not an error: probe failures produce a reject outcome
//! with an error-kind reason instead of propagating.
//!
//! Only metadata is ever read — file size from `fs::metadata`, image
//! dimensions from a header-only decode, video duration/resolution from one
//! ffprobe call. No file is fully decoded.

use std::path::Path;
use std::process::Command;

use serde::Deserialize;

use crate::task::{FileCandidate, MediaKind};

/// Rules applied to image candidates.
#[derive(Debug, Clone, Deserialize)]
pub struct ImageRules {
    /// Maximum file size in megabytes.
    #[serde(default = "default_image_max_mb")]
    pub max_size_mb: f64,
    /// Both width and height must be strictly greater than this.
    #[serde(default = "default_min_dimension")]
    pub min_dimension: u32,
    /// Inclusive bounds on width/height ratio, when present.
    #[serde(default)]
    pub aspect_ratio_range: Option<(f64, f64)>,
}

/// Rules applied to video candidates.
#[derive(Debug, Clone, Deserialize)]
pub struct VideoRules {
    /// Maximum file size in megabytes.
    #[serde(default = "default_video_max_mb")]
    pub max_size_mb: f64,
    /// Inclusive bounds on container duration in seconds.
    #[serde(default = "default_duration_range")]
    pub duration_range: (f64, f64),
    /// Minimum width and height.
    #[serde(default = "default_min_dimension")]
    pub min_dimension: u32,
}

/// Per-kind rule set, loaded from the `[rules]` config section.
#[derive(Debug, Clone, Deserialize)]
pub struct ValidationRules {
    #[serde(default)]
    pub image: ImageRules,
    #[serde(default)]
    pub video: VideoRules,
}

fn default_image_max_mb() -> f64 {
    10.0
}

fn default_video_max_mb() -> f64 {
    100.0
}

fn default_min_dimension() -> u32 {
    256
}

fn default_duration_range() -> (f64, f64) {
    (1.0, 60.0)
}

impl Default for ImageRules {
    fn default() -> Self {
        Self {
            max_size_mb: default_image_max_mb(),
            min_dimension: default_min_dimension(),
            aspect_ratio_range: None,
        }
    }
}

impl Default for VideoRules {
    fn default() -> Self {
        Self {
            max_size_mb: default_video_max_mb(),
            duration_range: default_duration_range(),
            min_dimension: default_min_dimension(),
        }
    }
}

impl Default for ValidationRules {
    fn default() -> Self {
        Self {
            image: ImageRules::default(),
            video: VideoRules::default(),
        }
    }
}

/// Accept/reject decision with the reason and any measured attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationOutcome {
    pub accepted: bool,
    pub reason: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub duration_secs: Option<f64>,
}

impl ValidationOutcome {
    fn accept(width: Option<u32>, height: Option<u32>, duration_secs: Option<f64>) -> Self {
        Self {
            accepted: true,
            reason: "OK".to_string(),
            width,
            height,
            duration_secs,
        }
    }

    fn reject(reason: impl Into<String>) -> Self {
        Self {
            accepted: false,
            reason: reason.into(),
            width: None,
            height: None,
            duration_secs: None,
        }
    }
}

/// Applies [`ValidationRules`] to candidates. Pure: the same file and rules
/// always produce the same outcome.
pub struct Validator;

impl Validator {
    pub fn validate(candidate: &FileCandidate, rules: &ValidationRules) -> ValidationOutcome {
        let size = match std::fs::metadata(&candidate.path) {
            Ok(meta) => meta.len(),
            Err(e) => return ValidationOutcome::reject(format!("Unreadable file: {e}")),
        };

        match candidate.kind {
            MediaKind::Image => Self::validate_image(&candidate.path, size, &rules.image),
            MediaKind::Video => Self::validate_video(&candidate.path, size, &rules.video),
        }
    }

    fn validate_image(path: &Path, size: u64, rules: &ImageRules) -> ValidationOutcome {
        if size > mb_to_bytes(rules.max_size_mb) {
            return ValidationOutcome::reject(format!("Size > {}MB", rules.max_size_mb));
        }

        // Header-only decode; never reads pixel data.
        let (width, height) = match image::image_dimensions(path) {
            Ok(dims) => dims,
            Err(e) => return ValidationOutcome::reject(format!("Unreadable image: {e}")),
        };

        // Strictly greater than: a dimension equal to the minimum rejects.
        if width <= rules.min_dimension || height <= rules.min_dimension {
            return ValidationOutcome::reject(format!(
                "Dimensions {width}x{height} not above minimum {}px",
                rules.min_dimension
            ));
        }

        if let Some((lo, hi)) = rules.aspect_ratio_range {
            let ratio = width as f64 / height as f64;
            if ratio < lo || ratio > hi {
                return ValidationOutcome::reject(format!(
                    "Aspect ratio {ratio:.2} outside {lo}..{hi}"
                ));
            }
        }

        ValidationOutcome::accept(Some(width), Some(height), None)
    }

    fn validate_video(path: &Path, size: u64, rules: &VideoRules) -> ValidationOutcome {
        if size > mb_to_bytes(rules.max_size_mb) {
            return ValidationOutcome::reject(format!("Size > {}MB", rules.max_size_mb));
        }

        let probe = match probe_video(path) {
            Ok(p) => p,
            Err(reason) => return ValidationOutcome::reject(reason),
        };

        let (lo, hi) = rules.duration_range;
        if probe.duration_secs < lo || probe.duration_secs > hi {
            return ValidationOutcome::reject(format!(
                "Duration {:.1}s outside {lo}..{hi}s",
                probe.duration_secs
            ));
        }

        if probe.width < rules.min_dimension || probe.height < rules.min_dimension {
            return ValidationOutcome::reject(format!(
                "Resolution {}x{} below minimum {}px",
                probe.width, probe.height, rules.min_dimension
            ));
        }

        ValidationOutcome::accept(
            Some(probe.width),
            Some(probe.height),
            Some(probe.duration_secs),
        )
    }
}

fn mb_to_bytes(mb: f64) -> u64 {
    (mb * 1024.0 * 1024.0) as u64
}

/// Duration and resolution read from a video container header.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoProbe {
    pub duration_secs: f64,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: FfprobeFormat,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Default, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

/// Probe a video container with ffprobe, returning duration and resolution.
///
/// Failure reasons (ffprobe missing, non-zero exit, unparseable output) come
/// back as `Err(reason)` so the caller can fold them into a rejection.
pub fn probe_video(path: &Path) -> Result<VideoProbe, String> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .output()
        .map_err(|e| format!("ffprobe failed to start: {e}"))?;

    if !output.status.success() {
        return Err(format!(
            "ffprobe failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }

    let parsed: FfprobeOutput = serde_json::from_slice(&output.stdout)
        .map_err(|e| format!("ffprobe output unparseable: {e}"))?;

    let duration_secs = parsed
        .format
        .duration
        .as_deref()
        .and_then(|d| d.parse::<f64>().ok())
        .ok_or_else(|| "ffprobe reported no duration".to_string())?;

    let video_stream = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| "no video stream found".to_string())?;

    let (width, height) = match (video_stream.width, video_stream.height) {
        (Some(w), Some(h)) => (w, h),
        _ => return Err("video stream missing resolution".to_string()),
    };

    Ok(VideoProbe {
        duration_secs,
        width,
        height,
    })
}
