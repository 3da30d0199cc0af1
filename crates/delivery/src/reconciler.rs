use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info, warn};

use dripforge_core::event_bus::{make_event, EventSink};
use dripforge_core::types::{Channel, EventType};
use dripforge_journey::JourneyEngine;
use dripforge_messaging::{ChannelAdapter, DeliveryOutcome, OutboundMessageStore, WebhookEvent};

/// Folds asynchronous provider delivery callbacks back into message and
/// journey state.
///
/// Events are matched by provider correlation id; unknown ids (provider
/// replays, test traffic) are logged and dropped. Only valid forward
/// transitions apply, so replayed and out-of-order events are absorbed
/// without touching counters twice.
#[derive(Clone)]
pub struct WebhookReconciler {
    messages: OutboundMessageStore,
    engine: JourneyEngine,
    adapters: HashMap<Channel, Arc<dyn ChannelAdapter>>,
    event_sink: Arc<dyn EventSink>,
}

impl WebhookReconciler {
    pub fn new(messages: OutboundMessageStore, engine: JourneyEngine) -> Self {
        Self {
            messages,
            engine,
            adapters: HashMap::new(),
            event_sink: dripforge_core::event_bus::noop_sink(),
        }
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn ChannelAdapter>) -> Self {
        self.adapters.insert(adapter.channel(), adapter);
        self
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// Decodes a raw provider payload with the channel's adapter and applies
    /// it. Returns `false` when the payload decoded to nothing trackable.
    pub fn handle_payload(&self, channel: Channel, payload: &serde_json::Value) -> Result<bool> {
        let Some(adapter) = self.adapters.get(&channel) else {
            warn!(channel = ?channel, "No adapter registered for webhook channel");
            return Ok(false);
        };
        match adapter.decode_event(payload) {
            Some(event) => self.handle_event(&event),
            None => Ok(false),
        }
    }

    /// Applies one normalized delivery event. Returns `true` when the event
    /// changed message state.
    pub fn handle_event(&self, event: &WebhookEvent) -> Result<bool> {
        let Some(message) = self.messages.find_by_provider_id(&event.provider_message_id) else {
            // Provider replay or test traffic.
            warn!(
                provider_message_id = %event.provider_message_id,
                outcome = ?event.outcome,
                "Webhook for unknown provider id, dropping"
            );
            metrics::counter!("webhooks.unknown_provider_id").increment(1);
            return Ok(false);
        };

        let target = event.outcome.target_status();
        let applied = self.messages.apply_event_transition(
            &message.id,
            target,
            event.timestamp,
            event.error.as_deref(),
        )?;
        if !applied {
            debug!(
                message_id = %message.id,
                outcome = ?event.outcome,
                "Duplicate or out-of-order webhook absorbed"
            );
            metrics::counter!("webhooks.events_absorbed").increment(1);
            return Ok(false);
        }

        info!(
            message_id = %message.id,
            journey_id = ?message.journey_id,
            outcome = ?event.outcome,
            "Delivery event applied"
        );
        metrics::counter!("webhooks.events_applied").increment(1);
        self.event_sink.emit(make_event(
            event_type_for(event.outcome),
            message.journey_id,
            Some(message.lead_id),
            Some(message.id),
            Some(message.channel),
        ));

        if let Some(journey_id) = message.journey_id {
            match event.outcome {
                DeliveryOutcome::Delivered => {
                    self.engine.record_delivery(&journey_id)?;
                    self.engine.advance_journey(&journey_id)?;
                }
                DeliveryOutcome::Opened => self.engine.record_open(&journey_id)?,
                DeliveryOutcome::Clicked => self.engine.record_click(&journey_id)?,
                DeliveryOutcome::Failed | DeliveryOutcome::Bounced => {
                    // One failed delivery ends the step, not the journey.
                    self.engine.advance_journey(&journey_id)?;
                }
            }
        }
        Ok(true)
    }
}

fn event_type_for(outcome: DeliveryOutcome) -> EventType {
    match outcome {
        DeliveryOutcome::Delivered => EventType::MessageDelivered,
        DeliveryOutcome::Opened => EventType::MessageOpened,
        DeliveryOutcome::Clicked => EventType::MessageClicked,
        DeliveryOutcome::Failed | DeliveryOutcome::Bounced => EventType::MessageFailed,
    }
}
