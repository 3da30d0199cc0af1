//! End-to-end drip flow: capture a lead, run a three-step email/SMS/email
//! sequence through dispatch and webhook reconciliation to completion.

use std::sync::Arc;

use chrono::{Duration, Utc};

use dripforge_catalog::{SequenceCatalog, SequenceStep, SequenceTemplate, TriggerKind};
use dripforge_core::config::{DispatchConfig, SendGridConfig, TwilioConfig};
use dripforge_core::event_bus::capture_sink;
use dripforge_core::types::{Channel, EventType};
use dripforge_delivery::{DispatchProcessor, WebhookReconciler};
use dripforge_journey::{JourneyEngine, JourneyStatus};
use dripforge_leads::{ConsentFlags, Lead, LeadStore};
use dripforge_messaging::{EmailGateway, MessageStatus, OutboundMessageStore, SmsGateway};
use uuid::Uuid;

struct Harness {
    catalog: SequenceCatalog,
    leads: LeadStore,
    messages: OutboundMessageStore,
    engine: JourneyEngine,
    dispatcher: DispatchProcessor,
    reconciler: WebhookReconciler,
    sink: Arc<dripforge_core::event_bus::CaptureSink>,
}

fn harness() -> Harness {
    let catalog = SequenceCatalog::new();
    let leads = LeadStore::new();
    let messages = OutboundMessageStore::new();
    let sink = capture_sink();
    let engine = JourneyEngine::new(catalog.clone(), leads.clone(), messages.clone())
        .with_event_sink(sink.clone());

    let sms: Arc<SmsGateway> = Arc::new(SmsGateway::new(TwilioConfig::default()));
    let email: Arc<EmailGateway> = Arc::new(EmailGateway::new(SendGridConfig::default()));

    let dispatcher = DispatchProcessor::new(messages.clone(), engine.clone(), &DispatchConfig::default())
        .with_adapter(sms.clone())
        .with_adapter(email.clone())
        .with_event_sink(sink.clone());
    let reconciler = WebhookReconciler::new(messages.clone(), engine.clone())
        .with_adapter(sms)
        .with_adapter(email)
        .with_event_sink(sink.clone());

    Harness {
        catalog,
        leads,
        messages,
        engine,
        dispatcher,
        reconciler,
        sink,
    }
}

fn seed_lead(h: &Harness) -> Uuid {
    h.leads.upsert(Lead {
        id: Uuid::new_v4(),
        first_name: "Grace".to_string(),
        last_name: "Hopper".to_string(),
        email: Some("grace@example.com".to_string()),
        phone: Some("+15557654321".to_string()),
        attributes: Default::default(),
        consent: ConsentFlags::default(),
        created_at: Utc::now(),
    })
}

fn seed_template(h: &Harness) -> Uuid {
    let now = Utc::now();
    h.catalog
        .insert_template(SequenceTemplate {
            id: Uuid::new_v4(),
            name: "Nurture".to_string(),
            trigger: TriggerKind::ExternalEvent,
            active: true,
            steps: vec![
                SequenceStep {
                    step_number: 1,
                    channel: Channel::Email,
                    delay_minutes: 0,
                    body_template: "Hi {{first_name}}, welcome!".to_string(),
                    subject_template: Some("Welcome".to_string()),
                    active: true,
                },
                SequenceStep {
                    step_number: 2,
                    channel: Channel::Sms,
                    delay_minutes: 1440,
                    body_template: "{{first_name}}, checking in.".to_string(),
                    subject_template: None,
                    active: true,
                },
                SequenceStep {
                    step_number: 3,
                    channel: Channel::Email,
                    delay_minutes: 4320,
                    body_template: "Last touch, {{first_name}}.".to_string(),
                    subject_template: Some("One more thing".to_string()),
                    active: true,
                },
            ],
            created_at: now,
            updated_at: now,
        })
        .unwrap()
}

/// At most one non-terminal message may exist per journey at any time.
fn assert_sequential_exclusivity(h: &Harness, journey_id: &Uuid) {
    let in_flight = h
        .messages
        .messages_for_journey(journey_id)
        .into_iter()
        .filter(|m| !m.status.is_terminal())
        .count();
    assert!(in_flight <= 1, "{} messages in flight", in_flight);
}

#[test]
fn test_full_drip_flow_to_completion() {
    let h = harness();
    let lead_id = seed_lead(&h);
    let template_id = seed_template(&h);
    let start = Utc::now();

    // Lead capture starts the journey; step 1 pending immediately.
    let journey = h.engine.start_journey(&lead_id, &template_id).unwrap();
    assert_eq!(journey.current_step, 1);
    let msgs = h.messages.messages_for_journey(&journey.id);
    assert_eq!(msgs.len(), 1);
    assert_eq!(msgs[0].channel, Channel::Email);
    assert_eq!(msgs[0].body, "Hi Grace, welcome!");
    assert!(msgs[0].scheduled_at <= Utc::now());
    assert_sequential_exclusivity(&h, &journey.id);

    // Duplicate lead-capture webhook retries are a no-op.
    let dup = h.engine.start_journey(&lead_id, &template_id).unwrap();
    assert_eq!(dup.id, journey.id);
    assert_eq!(h.messages.messages_for_journey(&journey.id).len(), 1);

    // Tick sends step 1.
    let report = h.dispatcher.tick_at(Utc::now() + Duration::seconds(1)).unwrap();
    assert_eq!(report.sent, 1);
    let step1 = &h.messages.messages_for_journey(&journey.id)[0];
    let step1_pid = step1.provider_message_id.clone().unwrap();
    assert_eq!(step1.status, MessageStatus::Sent);

    // SendGrid confirms delivery; journey moves to step 2, SMS due in 24h.
    let applied = h
        .reconciler
        .handle_payload(
            Channel::Email,
            &serde_json::json!({
                "sg_message_id": step1_pid,
                "event": "delivered",
                "timestamp": Utc::now().timestamp()
            }),
        )
        .unwrap();
    assert!(applied);
    let state = h.engine.get_journey(&journey.id).unwrap();
    assert_eq!(state.current_step, 2);
    assert_eq!(state.counters.delivered, 1);
    let step2 = h
        .messages
        .messages_for_journey(&journey.id)
        .into_iter()
        .find(|m| m.step_number == Some(2))
        .unwrap();
    assert_eq!(step2.channel, Channel::Sms);
    let drift = (step2.scheduled_at - (start + Duration::minutes(1440))).num_seconds().abs();
    assert!(drift < 30, "step 2 not scheduled ~24h out");
    assert_sequential_exclusivity(&h, &journey.id);

    // A premature tick is a no-op; nothing is due yet.
    let report = h.dispatcher.tick().unwrap();
    assert_eq!(report.claimed, 0);

    // 24h later the SMS goes out, then Twilio reports it undelivered.
    let report = h.dispatcher.tick_at(Utc::now() + Duration::minutes(1441)).unwrap();
    assert_eq!(report.sent, 1);
    let step2 = h
        .messages
        .messages_for_journey(&journey.id)
        .into_iter()
        .find(|m| m.step_number == Some(2))
        .unwrap();
    let step2_pid = step2.provider_message_id.clone().unwrap();

    let applied = h
        .reconciler
        .handle_payload(
            Channel::Sms,
            &serde_json::json!({
                "MessageSid": step2_pid,
                "MessageStatus": "undelivered",
                "ErrorCode": 30006
            }),
        )
        .unwrap();
    assert!(applied);

    // Failure does not block the sequence: step 3 is scheduled.
    let state = h.engine.get_journey(&journey.id).unwrap();
    assert_eq!(state.status, JourneyStatus::Active);
    assert_eq!(state.current_step, 3);
    let step3 = h
        .messages
        .messages_for_journey(&journey.id)
        .into_iter()
        .find(|m| m.step_number == Some(3))
        .unwrap();
    assert_eq!(step3.channel, Channel::Email);
    assert_sequential_exclusivity(&h, &journey.id);

    // 72h later the final email is sent and delivered; journey completes.
    let report = h.dispatcher.tick_at(Utc::now() + Duration::minutes(4321)).unwrap();
    assert_eq!(report.sent, 1);
    let step3 = h
        .messages
        .messages_for_journey(&journey.id)
        .into_iter()
        .find(|m| m.step_number == Some(3))
        .unwrap();
    let step3_pid = step3.provider_message_id.clone().unwrap();
    h.reconciler
        .handle_payload(
            Channel::Email,
            &serde_json::json!({
                "sg_message_id": step3_pid,
                "event": "delivered",
                "timestamp": Utc::now().timestamp()
            }),
        )
        .unwrap();

    let done = h.engine.get_journey(&journey.id).unwrap();
    assert_eq!(done.status, JourneyStatus::Completed);
    assert!(done.completed_at.is_some());
    assert_eq!(done.counters.email_sent, 2);
    assert_eq!(done.counters.sms_sent, 1);
    assert_eq!(done.counters.delivered, 2);

    // Replayed delivery webhook increments nothing.
    let applied = h
        .reconciler
        .handle_payload(
            Channel::Email,
            &serde_json::json!({
                "sg_message_id": step3_pid,
                "event": "delivered",
                "timestamp": Utc::now().timestamp()
            }),
        )
        .unwrap();
    assert!(!applied);
    assert_eq!(h.engine.get_journey(&journey.id).unwrap().counters.delivered, 2);

    // Lifecycle events reached the analytics sink.
    assert_eq!(h.sink.count_type(EventType::JourneyStarted), 1);
    assert_eq!(h.sink.count_type(EventType::JourneyCompleted), 1);
    assert_eq!(h.sink.count_type(EventType::MessageSent), 3);

    let stats = h.engine.template_stats(&template_id);
    assert_eq!(stats.total_started, 1);
    assert_eq!(stats.completed, 1);
}

#[test]
fn test_lead_without_phone_skips_sms_touch() {
    let h = harness();
    let lead_id = h.leads.upsert(Lead {
        id: Uuid::new_v4(),
        first_name: "NoPhone".to_string(),
        last_name: "Lead".to_string(),
        email: Some("nophone@example.com".to_string()),
        phone: None,
        attributes: Default::default(),
        consent: ConsentFlags::default(),
        created_at: Utc::now(),
    });
    let template_id = seed_template(&h);

    let journey = h.engine.start_journey(&lead_id, &template_id).unwrap();
    h.dispatcher.tick_at(Utc::now() + Duration::seconds(1)).unwrap();
    let step1_pid = h.messages.messages_for_journey(&journey.id)[0]
        .provider_message_id
        .clone()
        .unwrap();
    h.reconciler
        .handle_payload(
            Channel::Email,
            &serde_json::json!({
                "sg_message_id": step1_pid,
                "event": "delivered",
                "timestamp": Utc::now().timestamp()
            }),
        )
        .unwrap();

    // SMS step skipped but counted as visited; email step 3 queued instead.
    let state = h.engine.get_journey(&journey.id).unwrap();
    assert_eq!(state.current_step, 3);
    let msgs = h.messages.messages_for_journey(&journey.id);
    assert_eq!(msgs.len(), 2);
    assert_eq!(msgs.last().unwrap().step_number, Some(3));
    assert_eq!(h.sink.count_type(EventType::JourneyStepSkipped), 1);
}
