//! Sequence catalog — named drip-sequence templates and their ordered steps.

pub mod store;
pub mod types;

pub use store::SequenceCatalog;
pub use types::{SequenceStep, SequenceTemplate, TriggerKind};
