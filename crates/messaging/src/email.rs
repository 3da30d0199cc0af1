//! SendGrid email adapter — simulated send path plus event-webhook decoding
//! for delivered, bounce, dropped, open, and click.

use chrono::{TimeZone, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use dripforge_core::config::SendGridConfig;
use dripforge_core::error::{DripError, DripResult};
use dripforge_core::types::Channel;

use crate::adapter::{validate_email, ChannelAdapter};
use crate::message::{DeliveryOutcome, OutboundMessage, WebhookEvent};

/// SendGrid-shaped email gateway. In production the send path is a POST to
/// `https://api.sendgrid.com/v3/mail/send`.
pub struct EmailGateway {
    config: SendGridConfig,
}

impl EmailGateway {
    pub fn new(config: SendGridConfig) -> Self {
        tracing::info!(
            from = %config.from_email,
            open_tracking = config.open_tracking,
            "SendGrid gateway initialized"
        );
        Self { config }
    }

    pub fn config(&self) -> &SendGridConfig {
        &self.config
    }
}

impl ChannelAdapter for EmailGateway {
    fn channel(&self) -> Channel {
        Channel::Email
    }

    fn send(&self, message: &OutboundMessage) -> DripResult<String> {
        if !validate_email(&message.to) {
            return Err(DripError::Validation(format!(
                "destination {} is not a valid email address",
                message.to
            )));
        }

        // The SendGrid API payload; in production this is the HTTP POST body.
        let payload = serde_json::json!({
            "personalizations": [{
                "to": [{"email": message.to}],
                "custom_args": {
                    "message_id": message.id,
                    "lead_id": message.lead_id
                }
            }],
            "from": {
                "email": self.config.from_email,
                "name": self.config.from_name
            },
            "subject": message.subject.as_deref().unwrap_or_default(),
            "content": [{
                "type": "text/html",
                "value": message.body
            }],
            "tracking_settings": {
                "open_tracking": {"enable": self.config.open_tracking},
                "click_tracking": {"enable": self.config.click_tracking}
            }
        });

        let provider_id = format!("sg-{}", Uuid::new_v4());

        debug!(
            message_id = %message.id,
            to = %message.to,
            provider_id = %provider_id,
            payload = %payload,
            "Email handed to SendGrid"
        );
        metrics::counter!("email.messages_sent").increment(1);

        Ok(provider_id)
    }

    fn has_delivery_receipts(&self) -> bool {
        true
    }

    fn decode_event(&self, payload: &serde_json::Value) -> Option<WebhookEvent> {
        let provider_message_id = payload.get("sg_message_id")?.as_str()?.to_string();
        let event = payload.get("event")?.as_str()?;

        let outcome = match event {
            "delivered" => DeliveryOutcome::Delivered,
            "bounce" => DeliveryOutcome::Bounced,
            "dropped" => DeliveryOutcome::Failed,
            "open" => DeliveryOutcome::Opened,
            "click" => DeliveryOutcome::Clicked,
            // Processed/deferred/unsubscribe events are not tracked here.
            "processed" | "deferred" | "spamreport" | "unsubscribe" => return None,
            other => {
                warn!(event = %other, "Unknown SendGrid event type");
                return None;
            }
        };

        let timestamp = payload
            .get("timestamp")
            .and_then(|v| v.as_i64())
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            .unwrap_or_else(Utc::now);

        Some(WebhookEvent {
            provider_message_id,
            outcome,
            timestamp,
            url: payload.get("url").and_then(|v| v.as_str()).map(str::to_string),
            error: payload.get("reason").and_then(|v| v.as_str()).map(str::to_string),
        })
    }
}
