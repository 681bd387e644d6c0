//! Structured error model for stage collaborator calls.
//!
//! [`StageError`] is recovered locally by the chain: the record that hit it is
//! failed and annotated, the run carries on.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::provenance::StageKind;

/// Broad classification of a stage failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
#[serde(rename_all = "snake_case")]
pub enum StageErrorKind {
    /// The external validation service answered with an error.
    Service,
    /// The call did not finish within the stage timeout.
    Timeout,
    /// The record could not be interpreted by the collaborator.
    Data,
    /// The sink rejected a completed record.
    Sink,
    /// Bug or panic inside the stage.
    Internal,
}

impl fmt::Display for StageErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Service => "service",
            Self::Timeout => "timeout",
            Self::Data => "data",
            Self::Sink => "sink",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Failure of a single stage while processing a single record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("[{kind}] {stage}: {message}")]
pub struct StageError {
    pub stage: StageKind,
    pub kind: StageErrorKind,
    pub message: String,
}

impl StageError {
    fn make(stage: StageKind, kind: StageErrorKind, message: impl Into<String>) -> Self {
        Self {
            stage,
            kind,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn service(stage: StageKind, message: impl Into<String>) -> Self {
        Self::make(stage, StageErrorKind::Service, message)
    }

    #[must_use]
    pub fn timeout(stage: StageKind, after: std::time::Duration) -> Self {
        Self::make(
            stage,
            StageErrorKind::Timeout,
            format!("collaborator call exceeded {}ms", after.as_millis()),
        )
    }

    #[must_use]
    pub fn data(stage: StageKind, message: impl Into<String>) -> Self {
        Self::make(stage, StageErrorKind::Data, message)
    }

    #[must_use]
    pub fn sink(message: impl Into<String>) -> Self {
        Self::make(StageKind::Sink, StageErrorKind::Sink, message)
    }

    #[must_use]
    pub fn internal(stage: StageKind, message: impl Into<String>) -> Self {
        Self::make(stage, StageErrorKind::Internal, message)
    }
}
