//! Pipeline orchestrator for biodiversity occurrence record curation.
//!
//! Builds a request-scoped chain of validation stages, streams records from
//! a source through it with bounded backpressure, and reports completion.
//!
//! # Crate structure
//!
//! | Module        | Responsibility |
//! |---------------|----------------|
//! | `config`      | Process/run configuration, YAML parsing, validation |
//! | `stage`       | Stage and validator abstractions, sink stage |
//! | `validators`  | Built-in name, basis-of-record, date, georeference checks |
//! | `chain`       | Chain builder and authority-keyed name stage registry |
//! | `source`      | Record source contract, local sources |
//! | `idigbio`     | iDigBio search API source |
//! | `run`         | Pipeline run lifecycle, admission, completion |
//! | `dispatcher`  | Request validation and run execution |
//! | `errors`      | Pipeline and source errors |
//! | `result`      | Run summaries |

#![warn(clippy::pedantic)]

pub mod chain;
pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod idigbio;
pub mod result;
pub mod run;
pub mod source;
pub mod stage;
pub mod validators;

pub use chain::{ChainBuilder, NameStageRegistry, SinkFactory, StageChain, GLOBAL_NAMES_AUTHORITY};
pub use config::{ProcessConfig, RunConfig, RunRequest};
pub use dispatcher::RunDispatcher;
pub use errors::{PipelineError, SourceError};
pub use result::{Disposition, FailureReason, RecordTrail, RunSummary};
pub use run::{PipelineRun, RunCanceller, RunPolicy};
pub use source::{RecordSource, SourceFactory, VecSource};
pub use stage::{Stage, StageOutcome, Validator, Verdict};
