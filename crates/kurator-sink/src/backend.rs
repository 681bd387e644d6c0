//! Sink trait definition.
//!
//! [`SummarySink`] is the storage contract for curated record outcomes and run
//! history. Model types live in [`kurator_types`].

use std::collections::BTreeMap;

use kurator_types::{Provenance, Record, RecordId, RunId, RunStats, RunStatus};
use serde::{Deserialize, Serialize};

use crate::error;

/// Whether a write created a new outcome or replaced an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Inserted,
    Replaced,
}

/// A record outcome as persisted by the sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredOutcome {
    pub record_id: RecordId,
    pub run_id: RunId,
    pub fields: BTreeMap<String, String>,
    pub provenance: Provenance,
    /// ISO-8601 UTC timestamp of the last write.
    pub stored_at: String,
}

/// Storage contract for curation results.
///
/// Writes are idempotent per record identity: replaying the same record and
/// provenance leaves exactly one stored outcome. Implementations must be
/// `Send + Sync` for use behind `Arc<dyn SummarySink>`; calls may block and
/// are issued from blocking tasks.
pub trait SummarySink: Send + Sync {
    /// The output target identifier this sink was opened against.
    fn target(&self) -> &str;

    /// Store the final state of a record together with its full provenance.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`](crate::error::SinkError) on storage failure.
    fn write_outcome(
        &self,
        run: &RunId,
        record: &Record,
        provenance: &Provenance,
    ) -> error::Result<WriteOutcome>;

    /// Read back the stored outcome for a record identity.
    ///
    /// Returns `Ok(None)` when nothing was stored for it.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`](crate::error::SinkError) on storage failure.
    fn get_outcome(&self, record: &RecordId) -> error::Result<Option<StoredOutcome>>;

    /// Number of stored record outcomes.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`](crate::error::SinkError) on storage failure.
    fn count_outcomes(&self) -> error::Result<u64>;

    /// Register a run as running, with its request parameters.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`](crate::error::SinkError) on storage failure.
    fn start_run(&self, run: &RunId, params: &serde_json::Value) -> error::Result<()>;

    /// Finalize a run with its terminal status and record accounting.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`](crate::error::SinkError) on storage failure.
    fn complete_run(
        &self,
        run: &RunId,
        status: RunStatus,
        stats: &RunStats,
        elapsed_ms: u64,
    ) -> error::Result<()>;
}
