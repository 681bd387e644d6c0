//! Record source contract and local sources.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use kurator_types::Record;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};

use crate::config::{RunConfig, SourceConfig};
use crate::errors::{PipelineError, SourceError};
use crate::idigbio::IdigbioSource;

/// A lazy, finite sequence of records.
///
/// `next_record` returns `Ok(None)` exactly once, on exhaustion; callers
/// stop polling after it. Sources are not restartable.
#[async_trait]
pub trait RecordSource: Send {
    fn name(&self) -> &str;

    /// # Errors
    ///
    /// Returns [`SourceError`] when the underlying reader fails.
    async fn next_record(&mut self) -> Result<Option<Record>, SourceError>;

    /// Release the underlying reader. Called once, after exhaustion, error,
    /// or cancellation.
    async fn close(&mut self) {}
}

/// Opens the record source for a run.
#[async_trait]
pub trait SourceFactory: Send + Sync {
    /// # Errors
    ///
    /// Returns [`PipelineError`] when the source cannot be opened.
    async fn open(&self, run: &RunConfig) -> Result<Box<dyn RecordSource>, PipelineError>;
}

/// Opens sources as described by the process configuration.
pub struct ConfiguredSourceFactory {
    config: SourceConfig,
}

impl ConfiguredSourceFactory {
    #[must_use]
    pub fn new(config: SourceConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SourceFactory for ConfiguredSourceFactory {
    async fn open(&self, run: &RunConfig) -> Result<Box<dyn RecordSource>, PipelineError> {
        match &self.config {
            SourceConfig::Idigbio {
                base_url,
                page_size,
                request_timeout_secs,
            } => {
                let source = IdigbioSource::new(
                    base_url,
                    &run.query,
                    (*page_size).min(run.limit),
                    std::time::Duration::from_secs(*request_timeout_secs),
                )?;
                Ok(Box::new(source))
            }
            SourceConfig::JsonLines { path } => {
                let source = JsonLinesSource::open(path).await.map_err(|e| {
                    PipelineError::ChainConstruction(format!(
                        "cannot open record file {}: {e}",
                        path.display()
                    ))
                })?;
                Ok(Box::new(source))
            }
        }
    }
}

/// Keys read as the record identity of a flat JSON object, in order.
const ID_KEYS: [&str; 4] = ["id", "uuid", "occurrenceID", "dwc:occurrenceID"];

/// Build a record from a JSON object.
///
/// Accepts the serialised [`Record`] shape (`{"id":..,"fields":{..}}`) or a
/// flat object of Darwin Core terms carrying one of [`ID_KEYS`]. Scalar
/// values are stored as strings; a `dwc:` prefix on keys is removed.
///
/// # Errors
///
/// Returns [`SourceError::Malformed`] when no identity can be found.
pub fn record_from_json(value: Value) -> Result<Record, SourceError> {
    let Value::Object(map) = value else {
        return Err(SourceError::Malformed("record is not a JSON object".into()));
    };

    if matches!(map.get("fields"), Some(Value::Object(_))) {
        return Ok(serde_json::from_value(Value::Object(map))?);
    }

    let id = ID_KEYS
        .iter()
        .find_map(|key| map.get(*key).and_then(scalar_string))
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| SourceError::Malformed("record has no identifier".into()))?;

    let mut record = Record::new(id);
    for (key, value) in &map {
        if key == "id" || key == "uuid" {
            continue;
        }
        if let Some(text) = scalar_string(value) {
            record.set_field(key.strip_prefix("dwc:").unwrap_or(key), text);
        }
    }
    Ok(record)
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// In-memory source, mainly for tests and embedding.
pub struct VecSource {
    name: String,
    records: VecDeque<Result<Record, SourceError>>,
}

impl VecSource {
    pub fn new(records: impl IntoIterator<Item = Record>) -> Self {
        Self {
            name: "memory".to_string(),
            records: records.into_iter().map(Ok).collect(),
        }
    }

    /// Source that yields `records` and then fails with `error`.
    pub fn failing_after(records: impl IntoIterator<Item = Record>, error: SourceError) -> Self {
        let mut source = Self::new(records);
        source.records.push_back(Err(error));
        source
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.records.len()
    }
}

#[async_trait]
impl RecordSource for VecSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn next_record(&mut self) -> Result<Option<Record>, SourceError> {
        self.records.pop_front().transpose()
    }

    async fn close(&mut self) {
        self.records.clear();
    }
}

/// Newline-delimited JSON records read from a local file.
pub struct JsonLinesSource {
    name: String,
    path: PathBuf,
    lines: Option<Lines<BufReader<tokio::fs::File>>>,
    line_no: usize,
}

impl JsonLinesSource {
    /// # Errors
    ///
    /// Returns [`SourceError::Io`] when the file cannot be opened.
    pub async fn open(path: &Path) -> Result<Self, SourceError> {
        let file = tokio::fs::File::open(path).await?;
        Ok(Self {
            name: format!("json_lines:{}", path.display()),
            path: path.to_path_buf(),
            lines: Some(BufReader::new(file).lines()),
            line_no: 0,
        })
    }
}

#[async_trait]
impl RecordSource for JsonLinesSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn next_record(&mut self) -> Result<Option<Record>, SourceError> {
        let Some(lines) = self.lines.as_mut() else {
            return Ok(None);
        };
        loop {
            let Some(line) = lines.next_line().await? else {
                self.lines = None;
                return Ok(None);
            };
            self.line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            let value: Value = serde_json::from_str(&line)?;
            return record_from_json(value).map(Some).map_err(|e| {
                SourceError::Malformed(format!(
                    "{}:{}: {e}",
                    self.path.display(),
                    self.line_no
                ))
            });
        }
    }

    async fn close(&mut self) {
        self.lines = None;
    }
}
