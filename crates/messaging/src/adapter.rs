//! Channel adapter interface — the narrow send/decode contract the dispatch
//! processor and webhook reconciler consume. Concrete providers live in
//! `sms.rs` and `email.rs`.

use dripforge_core::error::DripResult;
use dripforge_core::types::Channel;

use crate::message::{OutboundMessage, WebhookEvent};

/// Abstract "send" capability plus a webhook-event decoder for one channel.
pub trait ChannelAdapter: Send + Sync {
    fn channel(&self) -> Channel;

    /// Hand the message to the provider. Returns the provider's correlation
    /// id on acceptance; errors are per-message and never abort a batch.
    fn send(&self, message: &OutboundMessage) -> DripResult<String>;

    /// Whether the provider reports delivery asynchronously. Fire-and-forget
    /// channels advance the journey straight after a successful send.
    fn has_delivery_receipts(&self) -> bool;

    /// Normalize a provider-specific webhook payload. `None` for event types
    /// this engine does not track.
    fn decode_event(&self, payload: &serde_json::Value) -> Option<WebhookEvent>;
}

/// E.164-style check: leading `+` followed by 8-15 digits.
pub fn validate_phone(phone: &str) -> bool {
    let Some(digits) = phone.strip_prefix('+') else {
        return false;
    };
    (8..=15).contains(&digits.len()) && digits.chars().all(|c| c.is_ascii_digit())
}

/// Minimal structural check, full validation is the provider's job.
pub fn validate_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
}
