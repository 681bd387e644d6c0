use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Process-wide configuration, fixed at startup and shared read-only by every run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    /// Output target identifier handed to every run's sink.
    #[serde(default = "default_output")]
    pub output: String,
    /// Record limit applied when a request does not carry one.
    #[serde(default = "default_limit")]
    pub default_limit: u64,
    #[serde(default)]
    pub pipeline: PipelineSettings,
    #[serde(default)]
    pub services: ServiceConfig,
    #[serde(default)]
    pub source: SourceConfig,
}

fn default_port() -> u16 {
    8088
}
fn default_output() -> String {
    "kurator.db".to_string()
}
fn default_limit() -> u64 {
    100
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            output: default_output(),
            default_limit: default_limit(),
            pipeline: PipelineSettings::default(),
            services: ServiceConfig::default(),
            source: SourceConfig::default(),
        }
    }
}

/// Chain scheduling and failure policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Capacity of each bounded channel between chain stages.
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
    /// Upper bound on a single collaborator call.
    #[serde(default = "default_stage_timeout_secs")]
    pub stage_timeout_secs: u64,
    /// Fail the run once this many collaborator errors occur back to back.
    #[serde(default)]
    pub max_consecutive_stage_failures: Option<u32>,
    /// Fail the run once the sink has rejected this many records.
    #[serde(default)]
    pub max_sink_failures: Option<u32>,
    #[serde(default = "default_max_concurrent_runs")]
    pub max_concurrent_runs: usize,
}

fn default_queue_depth() -> usize {
    16
}
fn default_stage_timeout_secs() -> u64 {
    30
}
fn default_max_concurrent_runs() -> usize {
    4
}

impl PipelineSettings {
    #[must_use]
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            queue_depth: default_queue_depth(),
            stage_timeout_secs: default_stage_timeout_secs(),
            max_consecutive_stage_failures: None,
            max_sink_failures: None,
            max_concurrent_runs: default_max_concurrent_runs(),
        }
    }
}

/// Service identifiers and parameters for the validation collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_scientific_name_service")]
    pub scientific_name: String,
    #[serde(default = "default_global_names_service")]
    pub global_names: String,
    #[serde(default = "default_basis_of_record_service")]
    pub basis_of_record: String,
    /// `basisOfRecord` values that put a record out of curation scope.
    #[serde(default)]
    pub basis_of_record_drop_values: Vec<String>,
    #[serde(default = "default_event_date_service")]
    pub event_date: String,
    #[serde(default = "default_georeference_service")]
    pub georeference: String,
    #[serde(default = "default_georef_threshold_km")]
    pub georef_threshold_km: f64,
}

fn default_scientific_name_service() -> String {
    "kurator.sciname".to_string()
}
fn default_global_names_service() -> String {
    "globalnames".to_string()
}
fn default_basis_of_record_service() -> String {
    "kurator.basis_of_record".to_string()
}
fn default_event_date_service() -> String {
    "kurator.internal_date".to_string()
}
fn default_georeference_service() -> String {
    "kurator.geolocate".to_string()
}
fn default_georef_threshold_km() -> f64 {
    200.0
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            scientific_name: default_scientific_name_service(),
            global_names: default_global_names_service(),
            basis_of_record: default_basis_of_record_service(),
            basis_of_record_drop_values: Vec::new(),
            event_date: default_event_date_service(),
            georeference: default_georeference_service(),
            georef_threshold_km: default_georef_threshold_km(),
        }
    }
}

/// Where records come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    /// iDigBio search API, queried with the request's `rq` and `limit`.
    Idigbio {
        #[serde(default = "default_idigbio_base_url")]
        base_url: String,
        #[serde(default = "default_page_size")]
        page_size: u64,
        #[serde(default = "default_request_timeout_secs")]
        request_timeout_secs: u64,
    },
    /// Newline-delimited JSON records on the local file system.
    JsonLines { path: PathBuf },
}

fn default_idigbio_base_url() -> String {
    "https://search.idigbio.org/v2".to_string()
}
fn default_page_size() -> u64 {
    100
}
fn default_request_timeout_secs() -> u64 {
    60
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self::Idigbio {
            base_url: default_idigbio_base_url(),
            page_size: default_page_size(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}
