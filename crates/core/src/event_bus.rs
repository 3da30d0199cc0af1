//! Unified event bus — trait for emitting analytics events from any module.
//!
//! Modules accept an `Arc<dyn EventSink>` to emit journey and message
//! lifecycle events toward the per-day rollup pipeline and customer-facing
//! analytics.

use crate::types::{AnalyticsEvent, Channel, EventType};
use chrono::Utc;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Trait for emitting analytics events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: AnalyticsEvent);
}

/// No-op sink for tests and modules that don't need event emission.
pub struct NoOpSink;

impl EventSink for NoOpSink {
    fn emit(&self, _event: AnalyticsEvent) {}
}

/// In-memory sink that captures events for testing.
#[derive(Default)]
pub struct CaptureSink {
    events: Mutex<Vec<AnalyticsEvent>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<AnalyticsEvent> {
        self.events.lock().expect("event bus mutex poisoned").clone()
    }

    pub fn count(&self) -> usize {
        self.events.lock().expect("event bus mutex poisoned").len()
    }

    pub fn count_type(&self, event_type: EventType) -> usize {
        self.events
            .lock()
            .expect("event bus mutex poisoned")
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }

    pub fn clear(&self) {
        self.events.lock().expect("event bus mutex poisoned").clear();
    }
}

impl EventSink for CaptureSink {
    fn emit(&self, event: AnalyticsEvent) {
        self.events.lock().expect("event bus mutex poisoned").push(event);
    }
}

/// Convenience builder for creating `AnalyticsEvent` with minimal boilerplate.
pub fn make_event(
    event_type: EventType,
    journey_id: Option<Uuid>,
    lead_id: Option<Uuid>,
    message_id: Option<Uuid>,
    channel: Option<Channel>,
) -> AnalyticsEvent {
    AnalyticsEvent {
        event_id: Uuid::new_v4(),
        event_type,
        journey_id,
        lead_id,
        message_id,
        template_id: None,
        channel,
        timestamp: Utc::now(),
    }
}

/// Convenience: create a no-op event bus for modules that don't need it.
pub fn noop_sink() -> Arc<dyn EventSink> {
    Arc::new(NoOpSink)
}

/// Convenience: create a capture sink for tests.
pub fn capture_sink() -> Arc<CaptureSink> {
    Arc::new(CaptureSink::new())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_sink() {
        let sink = capture_sink();
        assert_eq!(sink.count(), 0);

        let lead = Uuid::new_v4();
        sink.emit(make_event(
            EventType::JourneyStarted,
            Some(Uuid::new_v4()),
            Some(lead),
            None,
            None,
        ));
        sink.emit(make_event(
            EventType::MessageSent,
            None,
            Some(lead),
            Some(Uuid::new_v4()),
            Some(Channel::Email),
        ));

        assert_eq!(sink.count(), 2);
        assert_eq!(sink.count_type(EventType::JourneyStarted), 1);
        assert_eq!(sink.count_type(EventType::MessageSent), 1);

        let events = sink.events();
        assert_eq!(events[0].lead_id, Some(lead));
        assert_eq!(events[1].channel, Some(Channel::Email));
    }

    #[test]
    fn test_noop_sink() {
        let sink = noop_sink();
        // Should not panic
        sink.emit(make_event(EventType::JourneyCompleted, None, None, None, None));
    }
}
