//! Summary persistence for curated occurrence records.
//!
//! Provides the [`SummarySink`] trait and a [`SqliteSummarySink`]
//! implementation that stores one outcome per record identity together with
//! its provenance trail, plus one row per pipeline run.

#![warn(clippy::pedantic)]

pub mod backend;
pub mod error;
pub mod sqlite;

pub use backend::{StoredOutcome, SummarySink, WriteOutcome};
pub use error::SinkError;
pub use sqlite::SqliteSummarySink;
