//! Pipeline run result types.

use std::fmt;
use std::time::Duration;

use kurator_types::{Provenance, RecordId, RunId, RunStats, RunStatus};
use serde::Serialize;

/// Why a run ended `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    /// The source failed mid-stream.
    SourceFailed(String),
    /// The run was cancelled by its caller.
    Cancelled(String),
    /// Collaborator errors occurred back to back past the configured limit.
    StageFailureThreshold(u32),
    /// The sink rejected more records than the configured limit.
    SinkFailureThreshold(u32),
    /// A worker exited while records were still in flight.
    RecordsLost(u64),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SourceFailed(msg) => write!(f, "source failed: {msg}"),
            Self::Cancelled(why) => write!(f, "cancelled: {why}"),
            Self::StageFailureThreshold(n) => {
                write!(f, "{n} consecutive stage failures")
            }
            Self::SinkFailureThreshold(n) => write!(f, "sink rejected {n} records"),
            Self::RecordsLost(n) => write!(f, "{n} records lost in flight"),
        }
    }
}

/// How a record left the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    Passed,
    Dropped,
    Failed,
}

/// Provenance trail of a record that stopped before the sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordTrail {
    pub record_id: RecordId,
    pub disposition: Disposition,
    pub provenance: Provenance,
}

/// Result of a pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: RunId,
    pub status: RunStatus,
    pub stats: RunStats,
    pub failure: Option<FailureReason>,
    #[serde(serialize_with = "serialize_millis")]
    pub elapsed: Duration,
    /// Highest number of records in flight at any instant.
    pub peak_in_flight: u64,
    /// Trails of dropped and failed records, in termination order.
    pub trails: Vec<RecordTrail>,
}

impl RunSummary {
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }

    #[must_use]
    pub fn failure_message(&self) -> String {
        self.failure
            .as_ref()
            .map_or_else(|| "unknown failure".to_string(), ToString::to_string)
    }

    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.elapsed.as_millis()).unwrap_or(u64::MAX)
    }

    /// One-line plain text status report.
    #[must_use]
    pub fn status_line(&self) -> String {
        let mut line = format!(
            "run {} {}: {} passed, {} dropped, {} failed of {} admitted in {}ms",
            self.run_id,
            self.status,
            self.stats.passed,
            self.stats.dropped,
            self.stats.failed,
            self.stats.admitted,
            self.elapsed_ms(),
        );
        if let Some(reason) = &self.failure {
            line.push_str(&format!(" ({reason})"));
        }
        line
    }
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}
