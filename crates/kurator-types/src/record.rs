//! Occurrence records carried through the curation chain.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Darwin Core terms the built-in stages read and write.
pub mod terms {
    pub const SCIENTIFIC_NAME: &str = "scientificName";
    pub const SCIENTIFIC_NAME_AUTHORSHIP: &str = "scientificNameAuthorship";
    pub const SCIENTIFIC_NAME_ID: &str = "scientificNameID";
    pub const GENUS: &str = "genus";
    pub const SPECIFIC_EPITHET: &str = "specificEpithet";
    pub const BASIS_OF_RECORD: &str = "basisOfRecord";
    pub const EVENT_DATE: &str = "eventDate";
    pub const YEAR: &str = "year";
    pub const MONTH: &str = "month";
    pub const DAY: &str = "day";
    pub const DECIMAL_LATITUDE: &str = "decimalLatitude";
    pub const DECIMAL_LONGITUDE: &str = "decimalLongitude";
    pub const VERBATIM_LATITUDE: &str = "verbatimLatitude";
    pub const VERBATIM_LONGITUDE: &str = "verbatimLongitude";
}

/// Stable identity of an occurrence record for the lifetime of a run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Create a new record identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RecordId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// An occurrence record under curation: an identity plus a mutable field set.
///
/// Records are moved, never cloned, between stages so that exactly one owner
/// holds a given record at any time.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    id: RecordId,
    #[serde(default)]
    fields: BTreeMap<String, String>,
}

impl Record {
    #[must_use]
    pub fn new(id: impl Into<RecordId>) -> Self {
        Self {
            id: id.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Builder-style field assignment, mostly for sources and tests.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn id(&self) -> &RecordId {
        &self.id
    }

    /// Value of a field, treating blank values as absent.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    /// Set a field, returning the previous value if any.
    pub fn set_field(&mut self, name: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.fields.insert(name.into(), value.into())
    }

    pub fn remove_field(&mut self, name: &str) -> Option<String> {
        self.fields.remove(name)
    }

    #[must_use]
    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }
}
