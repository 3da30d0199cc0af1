use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outbound delivery medium for a nurture touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Sms,
    Email,
}

impl Channel {
    pub fn display_name(&self) -> &'static str {
        match self {
            Channel::Sms => "SMS",
            Channel::Email => "Email",
        }
    }

    /// Typical provider hand-off latency in milliseconds, used for
    /// dispatch timeout budgeting.
    pub fn expected_latency_ms(&self) -> u64 {
        match self {
            Channel::Sms => 2000,
            Channel::Email => 5000,
        }
    }
}

/// Analytics event kinds emitted by the orchestration engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    JourneyStarted,
    JourneyStepScheduled,
    JourneyStepSkipped,
    JourneyCompleted,
    JourneyFailed,
    MessageSent,
    MessageFailed,
    MessageDelivered,
    MessageOpened,
    MessageClicked,
}

/// A single analytics event flowing to the rollup/export pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsEvent {
    pub event_id: Uuid,
    pub event_type: EventType,
    pub journey_id: Option<Uuid>,
    pub lead_id: Option<Uuid>,
    pub message_id: Option<Uuid>,
    pub template_id: Option<Uuid>,
    pub channel: Option<Channel>,
    pub timestamp: DateTime<Utc>,
}
