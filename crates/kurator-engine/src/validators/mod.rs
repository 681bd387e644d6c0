//! Built-in validation collaborators, one per chain stage.

pub mod basis;
pub mod date;
pub mod georef;
pub mod name;

pub use basis::BasisOfRecordValidator;
pub use date::EventDateValidator;
pub use georef::GeoreferenceValidator;
pub use name::{GlobalNamesValidator, ScientificNameValidator};
