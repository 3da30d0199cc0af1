//! Journey orchestration — the run state of one lead progressing through one
//! sequence template, and the engine that advances it.

pub mod orchestrator;
pub mod types;

pub use orchestrator::JourneyEngine;
pub use types::{Journey, JourneyCounters, JourneyStatus, TemplateStats};
