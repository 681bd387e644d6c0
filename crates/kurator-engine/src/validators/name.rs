//! Scientific name validators.
//!
//! Two variants sit behind the same [`Validator`] interface: the generic
//! authority-parameterised variant, which caches lookups and assigns name
//! GUIDs, and the GlobalNames variant, which only canonicalises.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use kurator_types::record::terms;
use kurator_types::{Record, StageError, StageKind};
use uuid::Uuid;

use crate::stage::{Validator, Verdict};

/// A scientific name split into its canonical parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedName {
    pub genus: String,
    pub specific_epithet: Option<String>,
    pub infraspecific_epithet: Option<String>,
    /// Trailing tokens that read as authorship, e.g. `L.` or `(Mill.) Britton`.
    pub authorship: Option<String>,
}

impl ParsedName {
    /// Genus, epithet and infraspecific epithet, single-space separated.
    #[must_use]
    pub fn canonical(&self) -> String {
        let mut out = self.genus.clone();
        for part in [&self.specific_epithet, &self.infraspecific_epithet]
            .into_iter()
            .flatten()
        {
            out.push(' ');
            out.push_str(part);
        }
        out
    }
}

const RANK_MARKERS: [&str; 6] = ["subsp.", "ssp.", "var.", "f.", "subvar.", "cv."];

fn is_epithet(token: &str) -> bool {
    token.chars().all(|c| c.is_alphabetic() || c == '-') && token.chars().any(char::is_alphabetic)
}

fn capitalise(token: &str) -> String {
    let lower = token.to_lowercase();
    let mut chars = lower.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect()
    })
}

/// Parse a verbatim scientific name.
///
/// Returns `None` when the leading token cannot be a genus.
#[must_use]
pub fn parse_name(raw: &str) -> Option<ParsedName> {
    let mut tokens = raw.split_whitespace().peekable();
    let genus = tokens.next().filter(|t| is_epithet(t) && !t.contains('-'))?;
    let genus = capitalise(genus);

    let mut specific_epithet = None;
    let mut infraspecific_epithet = None;
    if let Some(next) = tokens.peek() {
        if is_epithet(next) && next.chars().next().is_some_and(char::is_lowercase) {
            specific_epithet = tokens.next().map(str::to_lowercase);
        }
    }
    if specific_epithet.is_some() {
        if let Some(next) = tokens.peek() {
            if RANK_MARKERS.contains(&next.to_lowercase().as_str()) {
                tokens.next();
                infraspecific_epithet = tokens
                    .next()
                    .filter(|t| is_epithet(t))
                    .map(str::to_lowercase);
            } else if is_epithet(next) && next.chars().next().is_some_and(char::is_lowercase) {
                infraspecific_epithet = tokens.next().map(str::to_lowercase);
            }
        }
    }

    let rest: Vec<&str> = tokens.collect();
    let authorship = (!rest.is_empty()).then(|| rest.join(" "));
    Some(ParsedName {
        genus,
        specific_epithet,
        infraspecific_epithet,
        authorship,
    })
}

/// Parse the record's name and rewrite it canonically. Returns the parse
/// and whether the record changed, or a rejection message.
fn canonicalise(record: &mut Record) -> Result<(ParsedName, bool), String> {
    let Some(raw) = record.field(terms::SCIENTIFIC_NAME).map(str::to_string) else {
        return Err("scientificName is missing".to_string());
    };
    let Some(parsed) = parse_name(&raw) else {
        return Err(format!("scientificName '{raw}' is not a parseable name"));
    };

    let mut changed = false;
    let canonical = parsed.canonical();
    if canonical != raw {
        record.set_field(terms::SCIENTIFIC_NAME, canonical);
        changed = true;
    }
    if let Some(authorship) = &parsed.authorship {
        if record.field(terms::SCIENTIFIC_NAME_AUTHORSHIP).is_none() {
            record.set_field(terms::SCIENTIFIC_NAME_AUTHORSHIP, authorship.clone());
            changed = true;
        }
    }
    Ok((parsed, changed))
}

/// Generic name validator parameterised by a naming authority.
pub struct ScientificNameValidator {
    service: String,
    authority: String,
    taxonomic_mode: bool,
    use_cache: bool,
    insert_guid: bool,
    cache: Mutex<HashMap<String, Uuid>>,
}

impl ScientificNameValidator {
    pub fn new(service: impl Into<String>, authority: impl Into<String>, taxonomic_mode: bool) -> Self {
        Self {
            service: service.into(),
            authority: authority.into(),
            taxonomic_mode,
            use_cache: true,
            insert_guid: true,
            cache: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn with_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    #[must_use]
    pub fn with_guid_insertion(mut self, insert_guid: bool) -> Self {
        self.insert_guid = insert_guid;
        self
    }

    #[must_use]
    pub fn authority(&self) -> &str {
        &self.authority
    }

    #[must_use]
    pub fn taxonomic_mode(&self) -> bool {
        self.taxonomic_mode
    }

    /// Number of canonical names currently cached.
    #[must_use]
    pub fn cached_names(&self) -> usize {
        self.cache.lock().map_or(0, |c| c.len())
    }

    fn name_guid(&self, canonical: &str) -> Result<Uuid, StageError> {
        let key = format!("{}:{canonical}", self.authority);
        let compute = || Uuid::new_v5(&Uuid::NAMESPACE_URL, key.as_bytes());
        if !self.use_cache {
            return Ok(compute());
        }
        let mut cache = self.cache.lock().map_err(|_| {
            StageError::internal(StageKind::ScientificName, "name cache lock poisoned")
        })?;
        Ok(*cache.entry(canonical.to_string()).or_insert_with(compute))
    }
}

#[async_trait]
impl Validator for ScientificNameValidator {
    fn kind(&self) -> StageKind {
        StageKind::ScientificName
    }

    fn service(&self) -> &str {
        &self.service
    }

    fn actor(&self) -> String {
        format!("{}:{}", self.service, self.authority)
    }

    async fn validate(&self, record: &mut Record) -> Result<Verdict, StageError> {
        let (parsed, mut changed) = match canonicalise(record) {
            Ok(parsed) => parsed,
            Err(reason) => return Ok(Verdict::Reject(reason)),
        };
        let canonical = parsed.canonical();
        let mut notes = Vec::new();
        if changed {
            notes.push(format!("canonical name '{canonical}'"));
        }

        if self.insert_guid && record.field(terms::SCIENTIFIC_NAME_ID).is_none() {
            let guid = self.name_guid(&canonical)?;
            record.set_field(terms::SCIENTIFIC_NAME_ID, format!("urn:uuid:{guid}"));
            notes.push(format!("assigned {} name id", self.authority));
            changed = true;
        }

        if self.taxonomic_mode {
            let mut filled = false;
            if record.field(terms::GENUS).is_none() {
                record.set_field(terms::GENUS, parsed.genus.clone());
                filled = true;
            }
            if let Some(epithet) = &parsed.specific_epithet {
                if record.field(terms::SPECIFIC_EPITHET).is_none() {
                    record.set_field(terms::SPECIFIC_EPITHET, epithet.clone());
                    filled = true;
                }
            }
            if filled {
                notes.push("filled genus and epithet".to_string());
                changed = true;
            }
        }

        if changed {
            Ok(Verdict::Amend(notes.join("; ")))
        } else {
            Ok(Verdict::Pass(format!(
                "'{canonical}' accepted by {}",
                self.authority
            )))
        }
    }
}

/// GlobalNames variant: canonicalises only, no cache or GUIDs.
pub struct GlobalNamesValidator {
    service: String,
}

impl GlobalNamesValidator {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }
}

#[async_trait]
impl Validator for GlobalNamesValidator {
    fn kind(&self) -> StageKind {
        StageKind::ScientificName
    }

    fn service(&self) -> &str {
        &self.service
    }

    async fn validate(&self, record: &mut Record) -> Result<Verdict, StageError> {
        match canonicalise(record) {
            Ok((parsed, true)) => Ok(Verdict::Amend(format!(
                "resolved to '{}'",
                parsed.canonical()
            ))),
            Ok((parsed, false)) => Ok(Verdict::Pass(format!(
                "'{}' resolved",
                parsed.canonical()
            ))),
            Err(reason) => Ok(Verdict::Reject(reason)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_binomial_with_authorship() {
        let parsed = parse_name("Quercus alba L.").unwrap();
        assert_eq!(parsed.genus, "Quercus");
        assert_eq!(parsed.specific_epithet.as_deref(), Some("alba"));
        assert_eq!(parsed.authorship.as_deref(), Some("L."));
        assert_eq!(parsed.canonical(), "Quercus alba");
    }

    #[test]
    fn test_parse_infraspecific_rank_marker() {
        let parsed = parse_name("Acer saccharum subsp. nigrum (F.Michx.) Desmarais").unwrap();
        assert_eq!(parsed.canonical(), "Acer saccharum nigrum");
        assert_eq!(parsed.authorship.as_deref(), Some("(F.Michx.) Desmarais"));
    }

    #[test]
    fn test_parse_normalises_case_and_spacing() {
        let parsed = parse_name("  QUERCUS   alba ").unwrap();
        assert_eq!(parsed.canonical(), "Quercus alba");
    }

    #[test]
    fn test_parse_rejects_non_name() {
        assert!(parse_name("12345").is_none());
        assert!(parse_name("").is_none());
    }

    #[tokio::test]
    async fn test_missing_name_rejected() {
        let validator = ScientificNameValidator::new("kurator.sciname", "IPNI", false);
        let mut record = Record::new("r1");
        let verdict = validator.validate(&mut record).await.unwrap();
        assert!(matches!(verdict, Verdict::Reject(ref m) if m.contains("missing")));
    }

    #[tokio::test]
    async fn test_generic_assigns_stable_guid() {
        let validator = ScientificNameValidator::new("kurator.sciname", "IPNI", false);
        let mut first = Record::new("r1").with_field(terms::SCIENTIFIC_NAME, "Quercus alba");
        let mut second = Record::new("r2").with_field(terms::SCIENTIFIC_NAME, "Quercus alba");
        validator.validate(&mut first).await.unwrap();
        let verdict = validator.validate(&mut second).await.unwrap();

        assert!(matches!(verdict, Verdict::Amend(_)));
        let id = first.field(terms::SCIENTIFIC_NAME_ID).unwrap();
        assert!(id.starts_with("urn:uuid:"));
        assert_eq!(second.field(terms::SCIENTIFIC_NAME_ID), Some(id));
        assert_eq!(validator.cached_names(), 1);
    }

    #[tokio::test]
    async fn test_generic_guid_depends_on_authority() {
        let ipni = ScientificNameValidator::new("svc", "IPNI", false);
        let gbif = ScientificNameValidator::new("svc", "GBIF", false);
        let mut a = Record::new("a").with_field(terms::SCIENTIFIC_NAME, "Acer rubrum");
        let mut b = Record::new("b").with_field(terms::SCIENTIFIC_NAME, "Acer rubrum");
        ipni.validate(&mut a).await.unwrap();
        gbif.validate(&mut b).await.unwrap();
        assert_ne!(
            a.field(terms::SCIENTIFIC_NAME_ID),
            b.field(terms::SCIENTIFIC_NAME_ID)
        );
    }

    #[tokio::test]
    async fn test_taxonomic_mode_fills_genus_and_epithet() {
        let validator = ScientificNameValidator::new("svc", "IPNI", true).with_guid_insertion(false);
        let mut record = Record::new("r1").with_field(terms::SCIENTIFIC_NAME, "Acer rubrum");
        let verdict = validator.validate(&mut record).await.unwrap();
        assert!(matches!(verdict, Verdict::Amend(_)));
        assert_eq!(record.field(terms::GENUS), Some("Acer"));
        assert_eq!(record.field(terms::SPECIFIC_EPITHET), Some("rubrum"));
    }

    #[tokio::test]
    async fn test_clean_record_passes_without_guid_insertion() {
        let validator = ScientificNameValidator::new("svc", "IPNI", false)
            .with_guid_insertion(false)
            .with_cache(false);
        let mut record = Record::new("r1").with_field(terms::SCIENTIFIC_NAME, "Acer rubrum");
        let verdict = validator.validate(&mut record).await.unwrap();
        assert!(matches!(verdict, Verdict::Pass(_)));
        assert_eq!(validator.cached_names(), 0);
        assert_eq!(validator.actor(), "svc:IPNI");
    }

    #[tokio::test]
    async fn test_global_names_splits_authorship() {
        let validator = GlobalNamesValidator::new("globalnames");
        let mut record = Record::new("r1").with_field(terms::SCIENTIFIC_NAME, "Quercus alba L.");
        let verdict = validator.validate(&mut record).await.unwrap();
        assert!(matches!(verdict, Verdict::Amend(_)));
        assert_eq!(record.field(terms::SCIENTIFIC_NAME), Some("Quercus alba"));
        assert_eq!(record.field(terms::SCIENTIFIC_NAME_AUTHORSHIP), Some("L."));
        assert!(record.field(terms::SCIENTIFIC_NAME_ID).is_none());
    }

    #[tokio::test]
    async fn test_global_names_passes_canonical_name() {
        let validator = GlobalNamesValidator::new("globalnames");
        let mut record = Record::new("r1").with_field(terms::SCIENTIFIC_NAME, "Quercus alba");
        let verdict = validator.validate(&mut record).await.unwrap();
        assert!(matches!(verdict, Verdict::Pass(_)));
    }
}
