use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("No tasks configured. Add a [[tasks]] entry to mediabatch.toml.")]
    NoTasks,

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Validation failed for {file_count} file(s) across the run:\n{report}")]
    ValidationFailed { file_count: usize, report: String },

    #[error("Generator error: {0}")]
    Generator(#[from] GeneratorError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Errors surfaced by a generator backend for a single attempt.
/// Every variant is retryable — the dispatcher folds them all into the
/// same "this attempt failed" signal.
#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("API returned status {status}: {message}")]
    ApiError { status: u16, message: String },

    #[error("API reported failure: {0}")]
    InBand(String),

    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Failed to parse generator response: {0}")]
    ParseError(String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Generation claimed success but no artifact could be retrieved: {0}")]
    ArtifactUnavailable(String),

    #[error("IO error while saving artifact: {0}")]
    Io(#[from] std::io::Error),
}
