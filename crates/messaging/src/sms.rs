//! Twilio SMS adapter — simulated provider hand-off with segment accounting
//! and status-callback decoding.

use chrono::{DateTime, TimeZone, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use dripforge_core::config::TwilioConfig;
use dripforge_core::error::{DripError, DripResult};
use dripforge_core::types::Channel;

use crate::adapter::{validate_phone, ChannelAdapter};
use crate::message::{DeliveryOutcome, OutboundMessage, WebhookEvent};

/// Twilio caps message bodies at 1600 characters regardless of segmentation.
pub const MAX_SMS_BODY_CHARS: usize = 1600;

/// Twilio-shaped SMS gateway. In production the send path is a POST to
/// `/2010-04-01/Accounts/{sid}/Messages.json`; here the provider call is
/// simulated and a correlation id is fabricated.
pub struct SmsGateway {
    config: TwilioConfig,
}

impl SmsGateway {
    pub fn new(config: TwilioConfig) -> Self {
        tracing::info!(from = %config.from_number, "Twilio SMS gateway initialized");
        Self { config }
    }

    /// Segment count for billing/metrics. GSM-7 bodies pack 160 chars into a
    /// single segment (153 with the multi-part header); anything outside the
    /// GSM alphabet falls back to UCS-2 at 70/67.
    pub fn calculate_segments(body: &str) -> u32 {
        if body.is_empty() {
            return 1;
        }
        let chars = body.chars().count() as u32;
        if body.chars().all(is_gsm_7bit) {
            if chars <= 160 {
                1
            } else {
                chars.div_ceil(153)
            }
        } else if chars <= 70 {
            1
        } else {
            chars.div_ceil(67)
        }
    }

    pub fn config(&self) -> &TwilioConfig {
        &self.config
    }
}

impl ChannelAdapter for SmsGateway {
    fn channel(&self) -> Channel {
        Channel::Sms
    }

    fn send(&self, message: &OutboundMessage) -> DripResult<String> {
        if !validate_phone(&message.to) {
            return Err(DripError::Validation(format!(
                "destination {} is not E.164",
                message.to
            )));
        }
        if message.body.chars().count() > MAX_SMS_BODY_CHARS {
            return Err(DripError::Validation(format!(
                "SMS body exceeds {} characters",
                MAX_SMS_BODY_CHARS
            )));
        }

        let provider_id = format!("SM{}", Uuid::new_v4().simple());
        let segments = Self::calculate_segments(&message.body);

        debug!(
            message_id = %message.id,
            to = %message.to,
            provider_id = %provider_id,
            segments,
            "SMS handed to Twilio"
        );
        metrics::counter!("sms.messages_sent").increment(1);
        metrics::counter!("sms.segments_sent").increment(segments as u64);

        Ok(provider_id)
    }

    fn has_delivery_receipts(&self) -> bool {
        // Twilio posts status callbacks for every message.
        true
    }

    fn decode_event(&self, payload: &serde_json::Value) -> Option<WebhookEvent> {
        let provider_message_id = payload.get("MessageSid")?.as_str()?.to_string();
        let status = payload.get("MessageStatus")?.as_str()?;

        let outcome = match status {
            "delivered" => DeliveryOutcome::Delivered,
            "failed" | "undelivered" => DeliveryOutcome::Failed,
            // Intermediate callbacks carry no state this engine tracks.
            "queued" | "accepted" | "sending" | "sent" => return None,
            other => {
                warn!(status = %other, "Unknown SMS status in callback");
                return None;
            }
        };

        let error = payload
            .get("ErrorCode")
            .and_then(|v| v.as_str().map(str::to_string).or_else(|| v.as_i64().map(|c| c.to_string())))
            .map(|code| format!("Twilio error: {}", code));

        Some(WebhookEvent {
            provider_message_id,
            outcome,
            timestamp: decode_timestamp(payload.get("Timestamp")),
            url: None,
            error,
        })
    }
}

fn decode_timestamp(value: Option<&serde_json::Value>) -> DateTime<Utc> {
    value
        .and_then(|v| v.as_i64())
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        .unwrap_or_else(Utc::now)
}

/// GSM 7-bit default alphabet, abridged to the ranges that matter for
/// segment counting: ASCII letters/digits/punctuation plus the common
/// Latin/Greek extensions.
fn is_gsm_7bit(c: char) -> bool {
    matches!(c,
        'A'..='Z' | 'a'..='z' | '0'..='9'
        | ' ' | '!' | '"' | '#' | '$' | '%' | '&' | '\'' | '(' | ')'
        | '*' | '+' | ',' | '-' | '.' | '/' | ':' | ';' | '<' | '='
        | '>' | '?' | '@' | '_' | '\n' | '\r'
        | '{' | '}' | '[' | ']' | '~' | '\\' | '^' | '|'
        | '\u{00A1}' | '\u{00A3}' | '\u{00A4}' | '\u{00A5}' | '\u{00A7}' | '\u{00BF}'
        | '\u{00C4}' | '\u{00C5}' | '\u{00C6}' | '\u{00C7}' | '\u{00C9}'
        | '\u{00D1}' | '\u{00D6}' | '\u{00D8}' | '\u{00DC}' | '\u{00DF}'
        | '\u{00E0}' | '\u{00E4}' | '\u{00E5}' | '\u{00E6}' | '\u{00E8}' | '\u{00E9}'
        | '\u{00EC}' | '\u{00F1}' | '\u{00F2}' | '\u{00F6}' | '\u{00F8}' | '\u{00F9}' | '\u{00FC}'
        | '\u{0393}' | '\u{0394}' | '\u{0398}' | '\u{039B}' | '\u{039E}' | '\u{03A0}'
        | '\u{03A3}' | '\u{03A6}' | '\u{03A8}' | '\u{03A9}'
        | '\u{20AC}'
    )
}
