//! Per-run configuration built from an inbound run request.

use std::collections::HashMap;

use serde::Serialize;

use crate::config::types::ProcessConfig;
use crate::errors::PipelineError;

/// Query string used when a request carries no `rq`.
pub const DEFAULT_QUERY: &str = "{}";

/// Raw run request parameters as received at the trigger boundary.
///
/// Every field is optional here; [`RunConfig::from_request`] decides which
/// are required and what shape they must have.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunRequest {
    pub limit: Option<String>,
    pub rq: Option<String>,
    pub authority: Option<String>,
    pub workflow: Option<String>,
    pub tax: Option<String>,
}

impl RunRequest {
    /// Collect the recognised parameters from a decoded query map.
    #[must_use]
    pub fn from_query(params: &HashMap<String, String>) -> Self {
        Self {
            limit: params.get("limit").cloned(),
            rq: params.get("rq").cloned(),
            authority: params.get("authority").cloned(),
            workflow: params.get("workflow").cloned(),
            tax: params.get("tax").cloned(),
        }
    }
}

/// Immutable configuration of one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunConfig {
    /// Maximum number of records pulled from the source.
    pub limit: u64,
    /// Source query string.
    pub query: String,
    /// Naming authority; selects the name stage variant.
    pub authority: String,
    /// Accepted and logged; the topology is fixed.
    pub workflow: Option<String>,
    /// Taxonomic mode flag handed to the generic name stage.
    pub taxonomic_mode: bool,
    /// Sink target for this run.
    pub output_target: String,
}

impl RunConfig {
    /// Validate a run request against process defaults.
    ///
    /// `authority` is kept exactly as sent, surrounding whitespace included.
    /// `tax` accepts `true` or `false` in any letter case; `limit` and `tax`
    /// ignore surrounding whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Configuration`] naming the offending
    /// parameter when `tax` or `authority` is missing or malformed, or when
    /// `limit` is not a positive integer.
    pub fn from_request(
        request: &RunRequest,
        process: &ProcessConfig,
    ) -> Result<Self, PipelineError> {
        let limit = match request.limit.as_deref().map(str::trim) {
            None | Some("") => process.default_limit,
            Some(raw) => match raw.parse::<u64>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(PipelineError::Configuration(format!(
                        "parameter 'limit' must be a positive integer, got '{raw}'"
                    )))
                }
            },
        };

        let authority = request
            .authority
            .as_deref()
            .filter(|a| !a.trim().is_empty())
            .ok_or_else(|| {
                PipelineError::Configuration("parameter 'authority' is required".to_string())
            })?
            .to_string();

        let taxonomic_mode = match request.tax.as_deref().map(str::trim) {
            None => {
                return Err(PipelineError::Configuration(
                    "parameter 'tax' is required (true or false)".to_string(),
                ))
            }
            Some(raw) => parse_flag(raw).ok_or_else(|| {
                PipelineError::Configuration(format!(
                    "parameter 'tax' must be true or false, got '{raw}'"
                ))
            })?,
        };

        let query = request
            .rq
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .unwrap_or(DEFAULT_QUERY)
            .to_string();

        Ok(Self {
            limit,
            query,
            authority,
            workflow: request.workflow.clone().filter(|w| !w.trim().is_empty()),
            taxonomic_mode,
            output_target: process.output.clone(),
        })
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    if raw.eq_ignore_ascii_case("true") {
        Some(true)
    } else if raw.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}
