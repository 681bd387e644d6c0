//! Stage abstraction and the two stage shapes used by the chain.
//!
//! A [`Stage`] consumes one record with its provenance and produces exactly
//! one [`StageOutcome`], appending exactly one provenance entry of its own.
//! [`ValidationStage`] adapts a [`Validator`] collaborator into a stage and
//! bounds its call with a timeout. [`SinkStage`] is the terminal stage that
//! hands completed records to the run's [`SummarySink`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kurator_sink::SummarySink;
use kurator_types::{
    CurationStatus, Provenance, ProvenanceEntry, Record, RunId, StageError, StageKind,
};

/// What a stage decided for one record.
#[derive(Debug)]
pub enum StageOutcome {
    /// Hand the (possibly modified) record to the next stage.
    Forward(Record, Provenance),
    /// Out of scope; the record leaves the chain without error.
    Drop(Provenance),
    /// The record leaves the chain as failed. `error` is set when the
    /// failure came from a collaborator rather than from the record's data.
    Fail {
        provenance: Provenance,
        error: Option<StageError>,
    },
}

impl StageOutcome {
    #[must_use]
    pub fn provenance(&self) -> &Provenance {
        match self {
            Self::Forward(_, provenance)
            | Self::Drop(provenance)
            | Self::Fail { provenance, .. } => provenance,
        }
    }
}

/// One unit of validation or enrichment in the chain.
#[async_trait]
pub trait Stage: Send + Sync {
    fn kind(&self) -> StageKind;

    /// Identity recorded as the actor of this stage's provenance entries.
    fn actor(&self) -> &str;

    /// Process one record. Must append exactly one provenance entry.
    async fn process(&self, record: Record, provenance: Provenance) -> StageOutcome;
}

/// Result of a validation collaborator call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Record is valid as is.
    Pass(String),
    /// Record was repaired or enriched in place.
    Amend(String),
    /// Record data is invalid.
    Reject(String),
    /// Record is outside curation scope.
    Discard(String),
}

/// External validation collaborator behind a stage.
#[async_trait]
pub trait Validator: Send + Sync {
    fn kind(&self) -> StageKind;

    /// Service identifier this collaborator calls.
    fn service(&self) -> &str;

    /// Actor name for provenance; defaults to the service identifier.
    fn actor(&self) -> String {
        self.service().to_string()
    }

    /// Validate and optionally amend `record`.
    ///
    /// # Errors
    ///
    /// Returns [`StageError`] when the collaborator itself fails.
    async fn validate(&self, record: &mut Record) -> Result<Verdict, StageError>;
}

/// Stage that runs a [`Validator`] under a timeout.
pub struct ValidationStage<V> {
    validator: V,
    actor: String,
    timeout: Duration,
}

impl<V: Validator> ValidationStage<V> {
    pub fn new(validator: V, timeout: Duration) -> Self {
        let actor = validator.actor();
        Self {
            validator,
            actor,
            timeout,
        }
    }

    #[must_use]
    pub fn validator(&self) -> &V {
        &self.validator
    }

    fn entry(&self, status: CurationStatus, assertion: impl Into<String>) -> ProvenanceEntry {
        ProvenanceEntry::new(self.validator.kind(), self.actor.clone(), status, assertion)
    }
}

#[async_trait]
impl<V: Validator> Stage for ValidationStage<V> {
    fn kind(&self) -> StageKind {
        self.validator.kind()
    }

    fn actor(&self) -> &str {
        &self.actor
    }

    async fn process(&self, mut record: Record, mut provenance: Provenance) -> StageOutcome {
        let call = tokio::time::timeout(self.timeout, self.validator.validate(&mut record)).await;
        let verdict = match call {
            Ok(result) => result,
            Err(_) => Err(StageError::timeout(self.kind(), self.timeout)),
        };

        match verdict {
            Ok(Verdict::Pass(assertion)) => {
                provenance.append(self.entry(CurationStatus::Pass, assertion));
                StageOutcome::Forward(record, provenance)
            }
            Ok(Verdict::Amend(assertion)) => {
                provenance.append(self.entry(CurationStatus::Modified, assertion));
                StageOutcome::Forward(record, provenance)
            }
            Ok(Verdict::Reject(assertion)) => {
                provenance.append(self.entry(CurationStatus::Fail, assertion));
                StageOutcome::Fail {
                    provenance,
                    error: None,
                }
            }
            Ok(Verdict::Discard(assertion)) => {
                provenance.append(self.entry(CurationStatus::Dropped, assertion));
                StageOutcome::Drop(provenance)
            }
            Err(error) => {
                tracing::warn!(
                    stage = %self.kind(),
                    record = %record.id(),
                    kind = %error.kind,
                    "Stage collaborator error: {}",
                    error.message
                );
                provenance.append(self.entry(CurationStatus::Fail, error.to_string()));
                StageOutcome::Fail {
                    provenance,
                    error: Some(error),
                }
            }
        }
    }
}

/// Terminal stage: stores completed records with their provenance.
pub struct SinkStage {
    sink: Arc<dyn SummarySink>,
    run_id: RunId,
    actor: String,
}

impl SinkStage {
    pub fn new(sink: Arc<dyn SummarySink>, run_id: RunId) -> Self {
        let actor = format!("sink:{}", sink.target());
        Self {
            sink,
            run_id,
            actor,
        }
    }

    fn entry(&self, status: CurationStatus, assertion: impl Into<String>) -> ProvenanceEntry {
        ProvenanceEntry::new(StageKind::Sink, self.actor.clone(), status, assertion)
    }
}

#[async_trait]
impl Stage for SinkStage {
    fn kind(&self) -> StageKind {
        StageKind::Sink
    }

    fn actor(&self) -> &str {
        &self.actor
    }

    async fn process(&self, record: Record, provenance: Provenance) -> StageOutcome {
        let stored = provenance.clone().with(self.entry(
            CurationStatus::Pass,
            format!("stored in {}", self.sink.target()),
        ));

        let sink = Arc::clone(&self.sink);
        let run_id = self.run_id.clone();
        let record_id = record.id().clone();
        let written = tokio::task::spawn_blocking(move || {
            let result = sink.write_outcome(&run_id, &record, &stored);
            (record, stored, result)
        })
        .await;

        let error = match written {
            Ok((record, stored, Ok(outcome))) => {
                tracing::debug!(record = %record.id(), ?outcome, "Record stored");
                return StageOutcome::Forward(record, stored);
            }
            Ok((_, _, Err(e))) => StageError::sink(e.to_string()),
            Err(join_err) => {
                StageError::internal(StageKind::Sink, format!("sink task failed: {join_err}"))
            }
        };

        tracing::error!(record = %record_id, "Sink rejected record: {}", error.message);
        let provenance = provenance.with(self.entry(CurationStatus::Fail, error.to_string()));
        StageOutcome::Fail {
            provenance,
            error: Some(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kurator_sink::SqliteSummarySink;
    use kurator_types::{RecordId, StageErrorKind};

    struct Fixed(Result<Verdict, StageError>);

    #[async_trait]
    impl Validator for Fixed {
        fn kind(&self) -> StageKind {
            StageKind::BasisOfRecord
        }
        fn service(&self) -> &str {
            "test.bor"
        }
        async fn validate(&self, record: &mut Record) -> Result<Verdict, StageError> {
            if matches!(self.0, Ok(Verdict::Amend(_))) {
                record.set_field("basisOfRecord", "PreservedSpecimen");
            }
            self.0.clone()
        }
    }

    struct Slow;

    #[async_trait]
    impl Validator for Slow {
        fn kind(&self) -> StageKind {
            StageKind::Georeference
        }
        fn service(&self) -> &str {
            "test.slow"
        }
        async fn validate(&self, _record: &mut Record) -> Result<Verdict, StageError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Verdict::Pass("late".into()))
        }
    }

    fn stage(result: Result<Verdict, StageError>) -> ValidationStage<Fixed> {
        ValidationStage::new(Fixed(result), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_pass_forwards_with_one_entry() {
        let outcome = stage(Ok(Verdict::Pass("ok".into())))
            .process(Record::new("r1"), Provenance::new())
            .await;
        let StageOutcome::Forward(record, prov) = outcome else {
            panic!("expected forward");
        };
        assert_eq!(record.id().as_str(), "r1");
        assert_eq!(prov.len(), 1);
        assert_eq!(prov.last().unwrap().status, CurationStatus::Pass);
        assert_eq!(prov.last().unwrap().actor, "test.bor");
    }

    #[tokio::test]
    async fn test_amend_marks_modified_and_keeps_changes() {
        let outcome = stage(Ok(Verdict::Amend("canonicalised".into())))
            .process(Record::new("r1"), Provenance::new())
            .await;
        let StageOutcome::Forward(record, prov) = outcome else {
            panic!("expected forward");
        };
        assert_eq!(record.field("basisOfRecord"), Some("PreservedSpecimen"));
        assert_eq!(prov.last().unwrap().status, CurationStatus::Modified);
    }

    #[tokio::test]
    async fn test_reject_fails_without_stage_error() {
        let outcome = stage(Ok(Verdict::Reject("unknown value".into())))
            .process(Record::new("r1"), Provenance::new())
            .await;
        let StageOutcome::Fail { provenance, error } = outcome else {
            panic!("expected fail");
        };
        assert!(error.is_none());
        assert_eq!(provenance.last().unwrap().assertion, "unknown value");
    }

    #[tokio::test]
    async fn test_discard_drops_with_dropped_entry() {
        let outcome = stage(Ok(Verdict::Discard("out of scope".into())))
            .process(Record::new("r1"), Provenance::new())
            .await;
        let StageOutcome::Drop(prov) = outcome else {
            panic!("expected drop");
        };
        assert_eq!(prov.last().unwrap().status, CurationStatus::Dropped);
    }

    #[tokio::test]
    async fn test_collaborator_error_recorded_in_provenance() {
        let err = StageError::service(StageKind::BasisOfRecord, "503 from vocabulary service");
        let outcome = stage(Err(err))
            .process(Record::new("r1"), Provenance::new())
            .await;
        let StageOutcome::Fail { provenance, error } = outcome else {
            panic!("expected fail");
        };
        assert_eq!(error.unwrap().kind, StageErrorKind::Service);
        assert!(provenance.last().unwrap().assertion.contains("503"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_becomes_stage_error() {
        let stage = ValidationStage::new(Slow, Duration::from_millis(100));
        let outcome = stage.process(Record::new("r1"), Provenance::new()).await;
        let StageOutcome::Fail { provenance, error } = outcome else {
            panic!("expected fail");
        };
        assert_eq!(error.unwrap().kind, StageErrorKind::Timeout);
        assert_eq!(provenance.len(), 1);
        assert_eq!(provenance.last().unwrap().stage, StageKind::Georeference);
    }

    #[tokio::test]
    async fn test_sink_stage_stores_record_with_sink_entry() {
        let sink: Arc<dyn SummarySink> = Arc::new(SqliteSummarySink::in_memory().unwrap());
        let stage = SinkStage::new(Arc::clone(&sink), RunId::new("run-1"));
        let outcome = stage
            .process(Record::new("r1").with_field("genus", "Acer"), Provenance::new())
            .await;
        let StageOutcome::Forward(_, prov) = outcome else {
            panic!("expected forward");
        };
        assert_eq!(prov.last().unwrap().stage, StageKind::Sink);

        let stored = sink.get_outcome(&RecordId::new("r1")).unwrap().unwrap();
        assert_eq!(stored.provenance, prov);
        assert_eq!(stored.fields.get("genus").map(String::as_str), Some("Acer"));
    }
}
