use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use dripforge_core::types::Channel;

/// What enrolls a lead into a sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    /// Lead-capture webhook from an ad platform or form.
    ExternalEvent,
    /// Started by an operator from the console.
    Manual,
    /// Started through the public API.
    Api,
}

/// A named, ordered drip sequence. Running journeys resolve steps by explicit
/// step number, so edits here only affect positions a journey has not yet
/// reached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceTemplate {
    pub id: Uuid,
    pub name: String,
    pub trigger: TriggerKind,
    pub active: bool,
    pub steps: Vec<SequenceStep>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SequenceTemplate {
    /// Number of steps still eligible for scheduling.
    pub fn active_step_count(&self) -> usize {
        self.steps.iter().filter(|s| s.active).count()
    }
}

/// One timed touch within a sequence.
///
/// Step numbers are 1-based and contiguous within a template. A deactivated
/// step keeps its number and is skipped at advance time; siblings are never
/// renumbered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceStep {
    pub step_number: u32,
    pub channel: Channel,
    /// Wait before this step, measured from the moment the previous step
    /// finished.
    pub delay_minutes: u32,
    pub body_template: String,
    /// Email only.
    pub subject_template: Option<String>,
    pub active: bool,
}
