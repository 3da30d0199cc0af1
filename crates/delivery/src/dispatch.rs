use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use dripforge_core::config::DispatchConfig;
use dripforge_core::event_bus::{make_event, EventSink};
use dripforge_core::types::{Channel, EventType};
use dripforge_journey::JourneyEngine;
use dripforge_messaging::{ChannelAdapter, OutboundMessageStore};

/// Outcome of one dispatch tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub claimed: usize,
    pub sent: usize,
    pub failed: usize,
    /// Sends that exceeded the per-channel latency budget.
    pub slow: usize,
}

/// Stateless batch dispatcher, invoked by an external periodic trigger.
///
/// Safe to invoke concurrently: message selection and claim are a single
/// compare-and-set in the store, so overlapping ticks partition the backlog.
/// A tick with nothing due is a no-op. One message's failure never aborts
/// its siblings; only a storage-level error aborts the invocation for the
/// scheduler to retry.
#[derive(Clone)]
pub struct DispatchProcessor {
    messages: OutboundMessageStore,
    engine: JourneyEngine,
    adapters: HashMap<Channel, Arc<dyn ChannelAdapter>>,
    batch_size: usize,
    send_timeout_ms: u64,
    event_sink: Arc<dyn EventSink>,
}

impl DispatchProcessor {
    pub fn new(
        messages: OutboundMessageStore,
        engine: JourneyEngine,
        config: &DispatchConfig,
    ) -> Self {
        Self {
            messages,
            engine,
            adapters: HashMap::new(),
            batch_size: config.batch_size,
            send_timeout_ms: config.send_timeout_ms,
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

    /// Runs one dispatch tick at the current wall clock.
    pub fn tick(&self) -> Result<TickReport> {
        self.tick_at(Utc::now())
    }

    /// Runs one dispatch tick as of `now`. Split out so schedules can be
    /// exercised deterministically.
    pub fn tick_at(&self, now: DateTime<Utc>) -> Result<TickReport> {
        let claimed = self.messages.claim_due(self.batch_size, now);
        if claimed.is_empty() {
            debug!("Dispatch tick: nothing due");
            return Ok(TickReport::default());
        }

        let mut report = TickReport {
            claimed: claimed.len(),
            ..Default::default()
        };
        info!(claimed = report.claimed, "Dispatch tick claimed batch");

        for message in &claimed {
            let Some(adapter) = self.adapters.get(&message.channel) else {
                warn!(message_id = %message.id, channel = ?message.channel, "No adapter registered for channel");
                self.messages
                    .mark_failed(&message.id, "no adapter registered for channel", now)?;
                report.failed += 1;
                continue;
            };

            let started = std::time::Instant::now();
            match adapter.send(message) {
                Ok(provider_id) => {
                    let elapsed_ms = started.elapsed().as_millis() as u64;
                    // Budget is the channel's expected latency, capped by the
                    // configured timeout.
                    let budget_ms = message.channel.expected_latency_ms().min(self.send_timeout_ms);
                    if elapsed_ms > budget_ms {
                        warn!(
                            message_id = %message.id,
                            channel = ?message.channel,
                            elapsed_ms,
                            budget_ms,
                            "Provider call exceeded latency budget"
                        );
                        metrics::counter!("dispatch.slow_sends").increment(1);
                        report.slow += 1;
                    }
                    self.messages.mark_sent(&message.id, provider_id, Utc::now())?;
                    report.sent += 1;
                    metrics::counter!("dispatch.messages_sent").increment(1);
                    self.event_sink.emit(make_event(
                        EventType::MessageSent,
                        message.journey_id,
                        Some(message.lead_id),
                        Some(message.id),
                        Some(message.channel),
                    ));

                    if let Some(journey_id) = message.journey_id {
                        if let Err(e) = self.engine.record_sent(&journey_id, message.channel) {
                            warn!(journey_id = %journey_id, error = %e, "Failed to record sent counter");
                        }
                        // Fire-and-forget channels have no receipt to wait
                        // for; `sent` is their terminal condition.
                        if !adapter.has_delivery_receipts() {
                            if let Err(e) = self.engine.advance_journey(&journey_id) {
                                warn!(journey_id = %journey_id, error = %e, "Advance after send failed");
                            }
                        }
                    }
                }
                Err(e) => {
                    // Per-message isolation: record and move on.
                    warn!(
                        message_id = %message.id,
                        lead_id = %message.lead_id,
                        step = ?message.step_number,
                        error = %e,
                        "Provider send failed"
                    );
                    self.messages.mark_failed(&message.id, &e.to_string(), Utc::now())?;
                    report.failed += 1;
                    metrics::counter!("dispatch.messages_failed").increment(1);
                    self.event_sink.emit(make_event(
                        EventType::MessageFailed,
                        message.journey_id,
                        Some(message.lead_id),
                        Some(message.id),
                        Some(message.channel),
                    ));

                    if let Some(journey_id) = message.journey_id {
                        if !adapter.has_delivery_receipts() {
                            if let Err(e) = self.engine.advance_journey(&journey_id) {
                                warn!(journey_id = %journey_id, error = %e, "Advance after failure failed");
                            }
                        }
                    }
                }
            }
        }

        info!(sent = report.sent, failed = report.failed, "Dispatch tick finished");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dripforge_catalog::{SequenceCatalog, SequenceStep, SequenceTemplate, TriggerKind};
    use dripforge_core::error::{DripError, DripResult};
    use dripforge_leads::{ConsentFlags, Lead, LeadStore};
    use dripforge_messaging::{MessageStatus, OutboundMessage, WebhookEvent};
    use std::sync::atomic::{AtomicBool, Ordering};
    use uuid::Uuid;

    /// Adapter stub with a switchable failure mode, configurable receipts,
    /// and optional artificial latency.
    struct StubAdapter {
        channel: Channel,
        receipts: bool,
        fail: AtomicBool,
        latency_ms: u64,
    }

    impl StubAdapter {
        fn new(channel: Channel, receipts: bool) -> Self {
            Self {
                channel,
                receipts,
                fail: AtomicBool::new(false),
                latency_ms: 0,
            }
        }

        fn with_latency(mut self, latency_ms: u64) -> Self {
            self.latency_ms = latency_ms;
            self
        }
    }

    impl ChannelAdapter for StubAdapter {
        fn channel(&self) -> Channel {
            self.channel
        }

        fn send(&self, message: &OutboundMessage) -> DripResult<String> {
            if self.latency_ms > 0 {
                std::thread::sleep(std::time::Duration::from_millis(self.latency_ms));
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(DripError::Provider("simulated outage".to_string()));
            }
            Ok(format!("stub-{}", message.id))
        }

        fn has_delivery_receipts(&self) -> bool {
            self.receipts
        }

        fn decode_event(&self, _payload: &serde_json::Value) -> Option<WebhookEvent> {
            None
        }
    }

    struct Fixture {
        catalog: SequenceCatalog,
        leads: LeadStore,
        messages: OutboundMessageStore,
        engine: JourneyEngine,
    }

    fn fixture() -> Fixture {
        let catalog = SequenceCatalog::new();
        let leads = LeadStore::new();
        let messages = OutboundMessageStore::new();
        let engine = JourneyEngine::new(catalog.clone(), leads.clone(), messages.clone());
        Fixture {
            catalog,
            leads,
            messages,
            engine,
        }
    }

    fn seed_journey(f: &Fixture, steps: Vec<SequenceStep>) -> dripforge_journey::Journey {
        let now = Utc::now();
        let lead_id = f.leads.upsert(Lead {
            id: Uuid::new_v4(),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            email: Some("ada@example.com".to_string()),
            phone: Some("+15551234567".to_string()),
            attributes: Default::default(),
            consent: ConsentFlags::default(),
            created_at: now,
        });
        let template_id = f
            .catalog
            .insert_template(SequenceTemplate {
                id: Uuid::new_v4(),
                name: "Seq".to_string(),
                trigger: TriggerKind::Api,
                active: true,
                steps,
                created_at: now,
                updated_at: now,
            })
            .unwrap();
        f.engine.start_journey(&lead_id, &template_id).unwrap()
    }

    fn email_step(n: u32) -> SequenceStep {
        SequenceStep {
            step_number: n,
            channel: Channel::Email,
            delay_minutes: 0,
            body_template: "Hello".to_string(),
            subject_template: Some("Hi".to_string()),
            active: true,
        }
    }

    #[test]
    fn test_tick_sends_due_messages() {
        let f = fixture();
        let journey = seed_journey(&f, vec![email_step(1)]);
        let processor = DispatchProcessor::new(
            f.messages.clone(),
            f.engine.clone(),
            &DispatchConfig::default(),
        )
        .with_adapter(Arc::new(StubAdapter::new(Channel::Email, true)));

        let report = processor.tick_at(Utc::now() + chrono::Duration::seconds(1)).unwrap();
        assert_eq!(report, TickReport { claimed: 1, sent: 1, failed: 0, slow: 0 });

        let msg = &f.messages.messages_for_journey(&journey.id)[0];
        assert_eq!(msg.status, MessageStatus::Sent);
        assert!(msg.provider_message_id.is_some());
        // Receipted channel: journey waits for the webhook.
        assert_eq!(f.engine.get_journey(&journey.id).unwrap().current_step, 1);
        assert_eq!(f.engine.get_journey(&journey.id).unwrap().counters.email_sent, 1);
    }

    #[test]
    fn test_tick_noop_when_nothing_due() {
        let f = fixture();
        let processor = DispatchProcessor::new(
            f.messages.clone(),
            f.engine.clone(),
            &DispatchConfig::default(),
        )
        .with_adapter(Arc::new(StubAdapter::new(Channel::Email, true)));

        let report = processor.tick().unwrap();
        assert_eq!(report, TickReport::default());
    }

    #[test]
    fn test_fire_and_forget_advances_after_send() {
        let f = fixture();
        let journey = seed_journey(&f, vec![email_step(1), email_step(2)]);
        let processor = DispatchProcessor::new(
            f.messages.clone(),
            f.engine.clone(),
            &DispatchConfig::default(),
        )
        .with_adapter(Arc::new(StubAdapter::new(Channel::Email, false)));

        processor.tick_at(Utc::now() + chrono::Duration::seconds(1)).unwrap();
        // Step 1 sent, step 2 enqueued immediately.
        assert_eq!(f.engine.get_journey(&journey.id).unwrap().current_step, 2);
        assert_eq!(f.messages.messages_for_journey(&journey.id).len(), 2);
    }

    #[test]
    fn test_failure_isolated_per_message() {
        let f = fixture();
        let journey_a = seed_journey(&f, vec![email_step(1)]);
        // A second lead/journey in the same batch.
        let journey_b = seed_journey(&f, vec![email_step(1)]);
        assert_ne!(journey_a.id, journey_b.id);

        let adapter = Arc::new(StubAdapter::new(Channel::Email, true));
        let processor = DispatchProcessor::new(
            f.messages.clone(),
            f.engine.clone(),
            &DispatchConfig::default(),
        )
        .with_adapter(adapter.clone());

        adapter.fail.store(true, Ordering::SeqCst);
        let report = processor.tick_at(Utc::now() + chrono::Duration::seconds(1)).unwrap();
        assert_eq!(report.claimed, 2);
        assert_eq!(report.failed, 2);
        assert_eq!(report.sent, 0);

        for journey in [&journey_a, &journey_b] {
            let msg = &f.messages.messages_for_journey(&journey.id)[0];
            assert_eq!(msg.status, MessageStatus::Failed);
            assert_eq!(msg.last_error.as_deref(), Some("Provider error: simulated outage"));
        }
    }

    #[test]
    fn test_missing_adapter_fails_message() {
        let f = fixture();
        let journey = seed_journey(&f, vec![email_step(1)]);
        let processor = DispatchProcessor::new(
            f.messages.clone(),
            f.engine.clone(),
            &DispatchConfig::default(),
        );

        let report = processor.tick_at(Utc::now() + chrono::Duration::seconds(1)).unwrap();
        assert_eq!(report.failed, 1);
        let msg = &f.messages.messages_for_journey(&journey.id)[0];
        assert_eq!(msg.status, MessageStatus::Failed);
    }

    #[test]
    fn test_slow_provider_call_is_flagged() {
        let f = fixture();
        seed_journey(&f, vec![email_step(1)]);
        let config = DispatchConfig {
            send_timeout_ms: 1,
            ..Default::default()
        };
        let processor = DispatchProcessor::new(f.messages.clone(), f.engine.clone(), &config)
            .with_adapter(Arc::new(StubAdapter::new(Channel::Email, true).with_latency(25)));

        let report = processor.tick_at(Utc::now() + chrono::Duration::seconds(1)).unwrap();
        // Still sent; the overrun is flagged, not failed.
        assert_eq!(report.sent, 1);
        assert_eq!(report.slow, 1);
    }

    #[test]
    fn test_batch_size_respected() {
        let f = fixture();
        for _ in 0..5 {
            seed_journey(&f, vec![email_step(1)]);
        }
        let config = DispatchConfig {
            batch_size: 3,
            ..Default::default()
        };
        let processor = DispatchProcessor::new(f.messages.clone(), f.engine.clone(), &config)
            .with_adapter(Arc::new(StubAdapter::new(Channel::Email, true)));

        let report = processor.tick_at(Utc::now() + chrono::Duration::seconds(1)).unwrap();
        assert_eq!(report.claimed, 3);
        let report = processor.tick_at(Utc::now() + chrono::Duration::seconds(1)).unwrap();
        assert_eq!(report.claimed, 2);
    }
}
