//! Pipeline error model.

use kurator_sink::SinkError;

use crate::result::RunSummary;

/// Errors raised by a record source.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("source request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("source i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("source payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Payload decoded but does not describe a record.
    #[error("malformed source payload: {0}")]
    Malformed(String),
}

/// Categorised pipeline error.
///
/// `Configuration` and `ChainConstruction` mean the run never started and
/// are rejections at the request boundary. `RunFailed` means the run was
/// accepted, executed, and ended `Failed`; it carries the full summary.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Malformed run request or invalid process configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A chain dependency could not be resolved before admission.
    #[error("chain construction failed: {0}")]
    ChainConstruction(String),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("run {} failed: {}", .0.run_id, .0.failure_message())]
    RunFailed(Box<RunSummary>),

    /// Host-side failure (task join, closed semaphore, etc.)
    #[error(transparent)]
    Infrastructure(#[from] anyhow::Error),
}

impl PipelineError {
    /// Returns `true` when the run never started because the request or its
    /// chain was unusable.
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::ChainConstruction(_))
    }

    /// The final summary, when the run got far enough to produce one.
    #[must_use]
    pub fn summary(&self) -> Option<&RunSummary> {
        match self {
            Self::RunFailed(summary) => Some(summary),
            _ => None,
        }
    }
}
