use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use dripforge_core::types::Channel;

/// Status of an outbound message through its lifecycle.
///
/// `pending` rows are due work for the dispatcher; `queued` marks an atomic
/// claim taken before the provider call; everything from `sent` onward is
/// driven by provider webhooks. Transitions only ever move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Pending,
    Queued,
    Sent,
    Delivered,
    Opened,
    Clicked,
    Failed,
    Bounced,
}

impl MessageStatus {
    /// True once no further dispatch work is expected for the row.
    /// Email engagement sub-states (`opened`/`clicked`) sit past `delivered`
    /// and are terminal for scheduling purposes too.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MessageStatus::Delivered
                | MessageStatus::Opened
                | MessageStatus::Clicked
                | MessageStatus::Failed
                | MessageStatus::Bounced
        )
    }
}

/// One concrete send attempt, SMS or email.
///
/// `journey_id` and `step_number` are `None` for direct sends issued outside
/// any sequence template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub id: Uuid,
    pub journey_id: Option<Uuid>,
    pub lead_id: Uuid,
    pub step_number: Option<u32>,
    pub channel: Channel,
    pub to: String,
    pub subject: Option<String>,
    pub body: String,
    pub status: MessageStatus,
    /// Correlation id assigned once the provider accepts the message; webhook
    /// events are matched against this.
    pub provider_message_id: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Parameters for creating a new pending message.
#[derive(Debug, Clone)]
pub struct NewOutboundMessage {
    pub journey_id: Option<Uuid>,
    pub lead_id: Uuid,
    pub step_number: Option<u32>,
    pub channel: Channel,
    pub to: String,
    pub subject: Option<String>,
    pub body: String,
    pub scheduled_at: DateTime<Utc>,
}

/// Canonical delivery status vocabulary after provider-specific decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Delivered,
    Failed,
    Bounced,
    Opened,
    Clicked,
}

impl DeliveryOutcome {
    /// The message status this outcome drives toward.
    pub fn target_status(&self) -> MessageStatus {
        match self {
            DeliveryOutcome::Delivered => MessageStatus::Delivered,
            DeliveryOutcome::Failed => MessageStatus::Failed,
            DeliveryOutcome::Bounced => MessageStatus::Bounced,
            DeliveryOutcome::Opened => MessageStatus::Opened,
            DeliveryOutcome::Clicked => MessageStatus::Clicked,
        }
    }
}

/// A provider webhook event normalized to the canonical vocabulary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub provider_message_id: String,
    pub outcome: DeliveryOutcome,
    pub timestamp: DateTime<Utc>,
    pub url: Option<String>,
    pub error: Option<String>,
}
