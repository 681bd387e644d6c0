//! iDigBio search API record source.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use kurator_types::Record;
use serde_json::{Map, Value};

use crate::errors::SourceError;
use crate::source::{record_from_json, RecordSource};

/// Pages through `GET {base_url}/search/records` for one query.
pub struct IdigbioSource {
    client: reqwest::Client,
    endpoint: String,
    query: String,
    page_size: u64,
    offset: u64,
    buffer: VecDeque<Record>,
    exhausted: bool,
}

impl IdigbioSource {
    /// # Errors
    ///
    /// Returns [`SourceError::Http`] if the HTTP client cannot be built.
    pub fn new(
        base_url: &str,
        query: &str,
        page_size: u64,
        timeout: Duration,
    ) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("kurator/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/search/records", base_url.trim_end_matches('/')),
            query: query.to_string(),
            page_size: page_size.max(1),
            offset: 0,
            buffer: VecDeque::new(),
            exhausted: false,
        })
    }

    async fn fetch_page(&mut self) -> Result<(), SourceError> {
        tracing::debug!(
            endpoint = %self.endpoint,
            offset = self.offset,
            page_size = self.page_size,
            "Fetching iDigBio page"
        );
        let body: Value = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("rq", self.query.clone()),
                ("limit", self.page_size.to_string()),
                ("offset", self.offset.to_string()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let page = parse_page(&body)?;
        let fetched = page.records.len() as u64;
        self.offset += fetched;
        self.buffer.extend(page.records);
        if fetched == 0 || page.total.is_some_and(|total| self.offset >= total) {
            self.exhausted = true;
        }
        Ok(())
    }
}

#[async_trait]
impl RecordSource for IdigbioSource {
    fn name(&self) -> &str {
        "idigbio"
    }

    async fn next_record(&mut self) -> Result<Option<Record>, SourceError> {
        while self.buffer.is_empty() && !self.exhausted {
            self.fetch_page().await?;
        }
        Ok(self.buffer.pop_front())
    }

    async fn close(&mut self) {
        self.buffer.clear();
        self.exhausted = true;
    }
}

/// One decoded search response page.
#[derive(Debug)]
pub struct SearchPage {
    pub records: Vec<Record>,
    /// `itemCount`: total matches for the query.
    pub total: Option<u64>,
}

/// Decode a search response: `{"itemCount": n, "items": [{"uuid", "data"}]}`.
///
/// # Errors
///
/// Returns [`SourceError::Malformed`] when `items` is missing or an item has
/// no `uuid`.
pub fn parse_page(body: &Value) -> Result<SearchPage, SourceError> {
    let items = body
        .get("items")
        .and_then(Value::as_array)
        .ok_or_else(|| SourceError::Malformed("search response has no items array".into()))?;

    let records = items
        .iter()
        .map(|item| {
            let uuid = item
                .get("uuid")
                .and_then(Value::as_str)
                .ok_or_else(|| SourceError::Malformed("search item has no uuid".into()))?;
            let mut flat = Map::new();
            flat.insert("uuid".to_string(), Value::String(uuid.to_string()));
            if let Some(Value::Object(data)) = item.get("data") {
                for (key, value) in data {
                    flat.insert(key.clone(), value.clone());
                }
            }
            record_from_json(Value::Object(flat))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(SearchPage {
        records,
        total: body.get("itemCount").and_then(Value::as_u64),
    })
}
