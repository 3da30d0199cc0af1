use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

use dripforge_core::error::{DripError, DripResult};
use dripforge_core::types::Channel;

use crate::adapter::{validate_email, validate_phone};
use crate::message::{MessageStatus, NewOutboundMessage, OutboundMessage};
use crate::sms::MAX_SMS_BODY_CHARS;
use crate::state_machine::MessageStateMachine;

/// Outbound message store with atomic claim semantics.
///
/// Rows are claimed with a per-entry compare-and-set (`pending` → `queued`)
/// so two overlapping dispatch ticks never send the same message twice. The
/// store is the only shared resource that needs this discipline.
#[derive(Clone, Default)]
pub struct OutboundMessageStore {
    messages: Arc<DashMap<Uuid, OutboundMessage>>,
    /// Maps provider correlation id -> message id for webhook lookups.
    provider_index: Arc<DashMap<String, Uuid>>,
}

impl OutboundMessageStore {
    pub fn new() -> Self {
        Self {
            messages: Arc::new(DashMap::new()),
            provider_index: Arc::new(DashMap::new()),
        }
    }

    /// Creates a `pending` row. Malformed destinations and oversized SMS
    /// bodies are rejected here, before any row exists.
    pub fn enqueue(&self, new: NewOutboundMessage) -> DripResult<OutboundMessage> {
        match new.channel {
            Channel::Sms => {
                if !validate_phone(&new.to) {
                    return Err(DripError::Validation(format!(
                        "destination {} is not E.164",
                        new.to
                    )));
                }
                if new.body.chars().count() > MAX_SMS_BODY_CHARS {
                    return Err(DripError::Validation(format!(
                        "SMS body exceeds {} characters",
                        MAX_SMS_BODY_CHARS
                    )));
                }
            }
            Channel::Email => {
                if !validate_email(&new.to) {
                    return Err(DripError::Validation(format!(
                        "destination {} is not a valid email address",
                        new.to
                    )));
                }
            }
        }

        let now = Utc::now();
        let message = OutboundMessage {
            id: Uuid::new_v4(),
            journey_id: new.journey_id,
            lead_id: new.lead_id,
            step_number: new.step_number,
            channel: new.channel,
            to: new.to,
            subject: new.subject,
            body: new.body,
            status: MessageStatus::Pending,
            provider_message_id: None,
            scheduled_at: new.scheduled_at,
            sent_at: None,
            completed_at: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        };

        info!(
            message_id = %message.id,
            channel = ?message.channel,
            scheduled_at = %message.scheduled_at,
            "Outbound message enqueued"
        );
        self.messages.insert(message.id, message.clone());
        Ok(message)
    }

    pub fn get(&self, id: &Uuid) -> Option<OutboundMessage> {
        self.messages.get(id).map(|m| m.clone())
    }

    pub fn find_by_provider_id(&self, provider_id: &str) -> Option<OutboundMessage> {
        let id = *self.provider_index.get(provider_id)?;
        self.get(&id)
    }

    pub fn messages_for_journey(&self, journey_id: &Uuid) -> Vec<OutboundMessage> {
        let mut rows: Vec<OutboundMessage> = self
            .messages
            .iter()
            .filter(|r| r.value().journey_id == Some(*journey_id))
            .map(|r| r.value().clone())
            .collect();
        rows.sort_by_key(|m| m.step_number);
        rows
    }

    /// Claims up to `limit` due messages, oldest-due first. Each claim is a
    /// compare-and-set under the entry lock: the row must still be `pending`
    /// and due when the status flips to `queued`, so concurrent invocations
    /// partition the backlog instead of double-claiming it.
    pub fn claim_due(&self, limit: usize, now: DateTime<Utc>) -> Vec<OutboundMessage> {
        let mut due: Vec<(DateTime<Utc>, Uuid)> = self
            .messages
            .iter()
            .filter(|r| r.value().status == MessageStatus::Pending && r.value().scheduled_at <= now)
            .map(|r| (r.value().scheduled_at, *r.key()))
            .collect();
        due.sort_by_key(|(scheduled_at, _)| *scheduled_at);
        due.truncate(limit);

        let mut claimed = Vec::with_capacity(due.len());
        for (_, id) in due {
            if let Some(mut msg) = self.messages.get_mut(&id) {
                if msg.status == MessageStatus::Pending && msg.scheduled_at <= now {
                    msg.status = MessageStatus::Queued;
                    msg.updated_at = now;
                    claimed.push(msg.clone());
                }
            }
        }
        claimed
    }

    /// Records provider acceptance: `queued` → `sent`, correlation id stored
    /// and indexed for webhook lookup.
    pub fn mark_sent(&self, id: &Uuid, provider_id: String, now: DateTime<Utc>) -> DripResult<()> {
        let mut msg = self
            .messages
            .get_mut(id)
            .ok_or_else(|| DripError::NotFound(format!("message {}", id)))?;
        let machine = MessageStateMachine::for_channel(msg.channel);
        if !machine.can_transition(msg.status, MessageStatus::Sent) {
            return Err(DripError::Validation(format!(
                "message {} cannot move from {:?} to sent",
                id, msg.status
            )));
        }
        msg.status = MessageStatus::Sent;
        msg.sent_at = Some(now);
        msg.updated_at = now;
        msg.provider_message_id = Some(provider_id.clone());
        drop(msg);
        self.provider_index.insert(provider_id, *id);
        Ok(())
    }

    /// Records a dispatch-level failure. Terminal; the error string stays on
    /// the row for manual remediation.
    pub fn mark_failed(&self, id: &Uuid, error: &str, now: DateTime<Utc>) -> DripResult<()> {
        let mut msg = self
            .messages
            .get_mut(id)
            .ok_or_else(|| DripError::NotFound(format!("message {}", id)))?;
        let machine = MessageStateMachine::for_channel(msg.channel);
        if !machine.can_transition(msg.status, MessageStatus::Failed) {
            return Err(DripError::Validation(format!(
                "message {} cannot move from {:?} to failed",
                id, msg.status
            )));
        }
        msg.status = MessageStatus::Failed;
        msg.completed_at = Some(now);
        msg.updated_at = now;
        msg.last_error = Some(error.to_string());
        Ok(())
    }

    /// Applies a webhook-driven transition if it is a valid forward move.
    /// Returns `true` when the row changed; duplicates and out-of-order
    /// events return `false` without error.
    pub fn apply_event_transition(
        &self,
        id: &Uuid,
        target: MessageStatus,
        timestamp: DateTime<Utc>,
        error: Option<&str>,
    ) -> DripResult<bool> {
        let mut msg = self
            .messages
            .get_mut(id)
            .ok_or_else(|| DripError::NotFound(format!("message {}", id)))?;
        let machine = MessageStateMachine::for_channel(msg.channel);
        if !machine.can_transition(msg.status, target) {
            debug!(
                message_id = %id,
                current = ?msg.status,
                target = ?target,
                "Ignoring stale or out-of-order delivery event"
            );
            return Ok(false);
        }
        msg.status = target;
        msg.updated_at = timestamp;
        if target.is_terminal() {
            msg.completed_at = Some(timestamp);
        }
        if let Some(err) = error {
            msg.last_error = Some(err.to_string());
        }
        if matches!(target, MessageStatus::Failed | MessageStatus::Bounced) {
            warn!(message_id = %id, status = ?target, error = ?msg.last_error, "Message delivery failed");
        }
        Ok(true)
    }

    /// Rows stuck in `queued` past the given age — a crash mid-send leaves
    /// them here. Surfaced for operational alerting, never auto-retried.
    pub fn stuck_in_queued(&self, older_than: DateTime<Utc>) -> Vec<OutboundMessage> {
        self.messages
            .iter()
            .filter(|r| r.value().status == MessageStatus::Queued && r.value().updated_at < older_than)
            .map(|r| r.value().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
