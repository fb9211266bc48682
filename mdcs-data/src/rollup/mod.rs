//! Survey-response read pipeline
//!
//! Flat per-prompt rows come out of storage interleaved; this module rolls
//! them up into one aggregate per survey submission, normalizes
//! custom-choice responses into a per-prompt glossary, projects the
//! requested columns, and renders the result as row-JSON, column-JSON, or
//! CSV.

pub mod choices;
pub mod columns;
pub mod engine;
pub mod output;

pub use choices::{ChoiceGlossary, ChoiceProvenance, CustomChoiceItem, GlossaryBuilder};
pub use engine::{roll_up, IndexedResult, ResponseKey};
pub use output::OutputFormat;
