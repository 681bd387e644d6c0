//! Process and run configuration: types, YAML parsing, validation.

pub mod parser;
pub mod run;
pub mod types;
pub mod validator;

pub use run::{RunConfig, RunRequest};
pub use types::{PipelineSettings, ProcessConfig, ServiceConfig, SourceConfig};
