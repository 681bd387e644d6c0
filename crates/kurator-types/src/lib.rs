//! Shared kurator record, provenance, and error model types.
//!
//! Pure data types used by the engine, the sink, and the CLI. Kept in their
//! own crate so the sink can depend on them without pulling in the engine.

#![warn(clippy::pedantic)]

pub mod error;
pub mod provenance;
pub mod record;
pub mod state;

pub use error::{StageError, StageErrorKind};
pub use provenance::{CurationStatus, Provenance, ProvenanceEntry, StageKind};
pub use record::{Record, RecordId};
pub use state::{RunId, RunStats, RunStatus};
