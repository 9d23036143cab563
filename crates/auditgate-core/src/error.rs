//! Error taxonomy for audit orchestration.

use serde::{Deserialize, Serialize};

/// Configuration errors, reported before any audit is dispatched.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no target URLs configured")]
    NoTargets,

    #[error("target URL must not be empty")]
    EmptyUrl,

    #[error("duplicate target URL: {0}")]
    DuplicateUrl(String),

    #[error("runs per URL must be positive")]
    ZeroRuns,

    #[error("concurrency limit must be positive")]
    ZeroConcurrency,

    #[error("per-attempt timeout must be positive")]
    ZeroTimeout,

    #[error("sort metric must not be empty")]
    EmptySortMetric,

    #[error("budget rule for '{key}' is invalid: {reason}")]
    InvalidRule { key: String, reason: String },

    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Failures reported by an audit engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("failed to launch audit engine: {0}")]
    Launch(String),

    #[error("audit engine exited with code {code}: {stderr}")]
    Exited { code: i32, stderr: String },

    #[error("audit engine produced invalid output: {0}")]
    InvalidOutput(String),

    #[error("pre-navigation script failed: {0}")]
    PreNavigation(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from persisting or reading back a verdict.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from a pipeline run that publishes its verdict.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Report(#[from] ReportError),
}

/// Classification of a failed attempt or target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The engine crashed or returned abnormally.
    EngineCrash,
    /// The attempt exceeded its allotted duration.
    Timeout,
    /// The engine returned a report flagged with a runtime error.
    RuntimeMeasurementError,
    /// Abandoned because of an external cancellation signal.
    Cancelled,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureKind::EngineCrash => "engine_crash",
            FailureKind::Timeout => "timeout",
            FailureKind::RuntimeMeasurementError => "runtime_measurement_error",
            FailureKind::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// A classified attempt failure. Never propagated past the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct AttemptError {
    pub kind: FailureKind,
    pub message: String,
}

impl AttemptError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self::new(FailureKind::Cancelled, "cancelled before a result was produced")
    }
}

impl From<EngineError> for AttemptError {
    fn from(err: EngineError) -> Self {
        Self::new(FailureKind::EngineCrash, err.to_string())
    }
}
