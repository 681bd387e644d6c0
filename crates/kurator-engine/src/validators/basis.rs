//! Basis-of-record controlled vocabulary check.

use async_trait::async_trait;
use kurator_types::record::terms;
use kurator_types::{Record, StageError, StageKind};

use crate::stage::{Validator, Verdict};

/// Darwin Core `basisOfRecord` vocabulary.
pub const VOCABULARY: [&str; 8] = [
    "PreservedSpecimen",
    "FossilSpecimen",
    "LivingSpecimen",
    "MaterialSample",
    "MaterialCitation",
    "HumanObservation",
    "MachineObservation",
    "Occurrence",
];

const ALIASES: [(&str, &str); 7] = [
    ("specimen", "PreservedSpecimen"),
    ("herbariumsheet", "PreservedSpecimen"),
    ("fossil", "FossilSpecimen"),
    ("living", "LivingSpecimen"),
    ("observation", "HumanObservation"),
    ("humanobs", "HumanObservation"),
    ("machineobs", "MachineObservation"),
];

fn normalise(raw: &str) -> String {
    raw.chars()
        .filter(char::is_ascii_alphanumeric)
        .flat_map(|c| c.to_lowercase())
        .collect()
}

/// Map a verbatim value onto the vocabulary.
#[must_use]
pub fn canonical_basis(raw: &str) -> Option<&'static str> {
    let key = normalise(raw);
    VOCABULARY
        .iter()
        .copied()
        .find(|term| normalise(term) == key)
        .or_else(|| {
            ALIASES
                .iter()
                .find(|(alias, _)| *alias == key)
                .map(|(_, term)| *term)
        })
}

pub struct BasisOfRecordValidator {
    service: String,
    drop_values: Vec<String>,
}

impl BasisOfRecordValidator {
    pub fn new(service: impl Into<String>, drop_values: &[String]) -> Self {
        Self {
            service: service.into(),
            drop_values: drop_values.iter().map(|v| normalise(v)).collect(),
        }
    }
}

#[async_trait]
impl Validator for BasisOfRecordValidator {
    fn kind(&self) -> StageKind {
        StageKind::BasisOfRecord
    }

    fn service(&self) -> &str {
        &self.service
    }

    async fn validate(&self, record: &mut Record) -> Result<Verdict, StageError> {
        let Some(raw) = record.field(terms::BASIS_OF_RECORD).map(str::to_string) else {
            return Ok(Verdict::Reject("basisOfRecord is missing".to_string()));
        };
        let Some(canonical) = canonical_basis(&raw) else {
            return Ok(Verdict::Reject(format!(
                "basisOfRecord '{raw}' is not in the vocabulary"
            )));
        };
        if self.drop_values.contains(&normalise(canonical)) {
            return Ok(Verdict::Discard(format!(
                "basisOfRecord {canonical} is out of curation scope"
            )));
        }
        if canonical == raw {
            Ok(Verdict::Pass(format!("basisOfRecord {canonical} is valid")))
        } else {
            record.set_field(terms::BASIS_OF_RECORD, canonical);
            Ok(Verdict::Amend(format!(
                "basisOfRecord '{raw}' standardised to {canonical}"
            )))
        }
    }
}
