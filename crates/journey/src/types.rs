use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Runtime status of a journey.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JourneyStatus {
    Active,
    Paused,
    Completed,
    Failed,
}

impl JourneyStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JourneyStatus::Completed | JourneyStatus::Failed)
    }
}

/// Cumulative per-journey counters, maintained monotonically for the
/// analytics consumer.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct JourneyCounters {
    pub sms_sent: u64,
    pub email_sent: u64,
    pub delivered: u64,
    pub opens: u64,
    pub clicks: u64,
}

/// The mutable run state for one (lead, template) pair. At most one journey
/// exists per pair; a journey is never deleted, only marked terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Journey {
    pub id: Uuid,
    pub lead_id: Uuid,
    pub template_id: Uuid,
    /// Highest step number visited so far; 0 = not started. Skipped steps
    /// count as visited.
    pub current_step: u32,
    pub status: JourneyStatus,
    pub counters: JourneyCounters,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_interaction_at: Option<DateTime<Utc>>,
    pub converted_at: Option<DateTime<Utc>>,
}

/// Aggregate statistics for all journeys of one template.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplateStats {
    pub template_id: Uuid,
    pub total_started: u64,
    pub active: u64,
    pub paused: u64,
    pub completed: u64,
    pub failed: u64,
    pub converted: u64,
    pub avg_completion_time_secs: f64,
    pub total_sms_sent: u64,
    pub total_email_sent: u64,
    pub total_opens: u64,
    pub total_clicks: u64,
}
