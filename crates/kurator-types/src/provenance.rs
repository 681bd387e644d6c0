//! Append-only provenance trail attached to every record in a run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Position of a stage in the fixed curation topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    ScientificName,
    BasisOfRecord,
    EventDate,
    Georeference,
    Sink,
}

impl StageKind {
    /// Chain order, head first.
    pub const ALL: [StageKind; 5] = [
        Self::ScientificName,
        Self::BasisOfRecord,
        Self::EventDate,
        Self::Georeference,
        Self::Sink,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ScientificName => "scientific_name",
            Self::BasisOfRecord => "basis_of_record",
            Self::EventDate => "event_date",
            Self::Georeference => "georeference",
            Self::Sink => "sink",
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a stage concluded about a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CurationStatus {
    /// Record checked and left unchanged.
    Pass,
    /// Record checked and amended in place.
    Modified,
    /// Record failed the check or the check itself failed.
    Fail,
    /// Record is out of scope for curation and was not forwarded.
    Dropped,
}

impl CurationStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Modified => "modified",
            Self::Fail => "fail",
            Self::Dropped => "dropped",
        }
    }

    /// Whether a record carrying this status continues down the chain.
    #[must_use]
    pub fn forwards(self) -> bool {
        matches!(self, Self::Pass | Self::Modified)
    }
}

impl std::fmt::Display for CurationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One stage's annotation of one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceEntry {
    pub stage: StageKind,
    /// Concrete implementation that ran, e.g. `globalnames` or a service id.
    pub actor: String,
    pub status: CurationStatus,
    /// Human-readable assertion explaining the status.
    pub assertion: String,
    pub recorded_at: DateTime<Utc>,
}

impl ProvenanceEntry {
    #[must_use]
    pub fn new(
        stage: StageKind,
        actor: impl Into<String>,
        status: CurationStatus,
        assertion: impl Into<String>,
    ) -> Self {
        Self {
            stage,
            actor: actor.into(),
            status,
            assertion: assertion.into(),
            recorded_at: Utc::now(),
        }
    }
}

/// Ordered, append-only sequence of [`ProvenanceEntry`] values.
///
/// There is deliberately no API to remove or reorder entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Provenance(Vec<ProvenanceEntry>);

impl Provenance {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, entry: ProvenanceEntry) {
        self.0.push(entry);
    }

    /// Consuming variant of [`Provenance::append`].
    #[must_use]
    pub fn with(mut self, entry: ProvenanceEntry) -> Self {
        self.0.push(entry);
        self
    }

    #[must_use]
    pub fn entries(&self) -> &[ProvenanceEntry] {
        &self.0
    }

    #[must_use]
    pub fn last(&self) -> Option<&ProvenanceEntry> {
        self.0.last()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Stages that touched the record, in order.
    pub fn stages(&self) -> impl Iterator<Item = StageKind> + '_ {
        self.0.iter().map(|e| e.stage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_preserves_order() {
        let mut prov = Provenance::new();
        prov.append(ProvenanceEntry::new(
            StageKind::ScientificName,
            "globalnames",
            CurationStatus::Pass,
            "name recognised",
        ));
        prov.append(ProvenanceEntry::new(
            StageKind::BasisOfRecord,
            "bor",
            CurationStatus::Modified,
            "canonicalised",
        ));
        let stages: Vec<_> = prov.stages().collect();
        assert_eq!(
            stages,
            vec![StageKind::ScientificName, StageKind::BasisOfRecord]
        );
        assert_eq!(prov.last().unwrap().status, CurationStatus::Modified);
    }

    #[test]
    fn only_pass_and_modified_forward() {
        assert!(CurationStatus::Pass.forwards());
        assert!(CurationStatus::Modified.forwards());
        assert!(!CurationStatus::Fail.forwards());
        assert!(!CurationStatus::Dropped.forwards());
    }

    #[test]
    fn stage_order_matches_chain() {
        assert_eq!(StageKind::ALL[0], StageKind::ScientificName);
        assert_eq!(StageKind::ALL[4], StageKind::Sink);
        assert_eq!(StageKind::EventDate.to_string(), "event_date");
    }

    #[test]
    fn provenance_serializes_as_array() {
        let prov = Provenance::new().with(ProvenanceEntry::new(
            StageKind::Sink,
            "sqlite",
            CurationStatus::Pass,
            "stored",
        ));
        let json = serde_json::to_value(&prov).unwrap();
        assert!(json.is_array());
        assert_eq!(json[0]["stage"], "sink");
        assert_eq!(json[0]["status"], "pass");
    }
}
