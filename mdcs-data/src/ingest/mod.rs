//! Upload ingestion pipeline: schema validation and duplicate filtering

pub mod dedup;
pub mod validator;

pub use dedup::{DedupOutcome, DuplicateFilter};
pub use validator::{BatchOutcome, SchemaValidator, ValidationError, ValidationMode};
