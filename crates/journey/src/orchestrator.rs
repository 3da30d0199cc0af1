use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::{Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{info, warn};
use uuid::Uuid;

use dripforge_catalog::SequenceCatalog;
use dripforge_core::error::DripError;
use dripforge_core::event_bus::{make_event, EventSink};
use dripforge_core::templates;
use dripforge_core::types::{Channel, EventType};
use dripforge_leads::LeadStore;
use dripforge_messaging::{NewOutboundMessage, OutboundMessage, OutboundMessageStore};

use crate::types::{Journey, JourneyStatus, TemplateStats};

/// Core orchestration engine — owns journey run state and step progression.
///
/// `advance_journey` is only ever invoked after the prior step's message
/// reaches a terminal (or skip) condition, so steps within one journey are
/// strictly sequential. Business-logic gaps (missing step, missing contact
/// info) resolve to terminal or skip conditions, never errors; only
/// storage-level failures propagate to the caller.
#[derive(Clone)]
pub struct JourneyEngine {
    journeys: Arc<DashMap<Uuid, Journey>>,
    /// (lead, template) -> journey id. Creation goes through this index as a
    /// conditional insert, which is what makes `start_journey` idempotent.
    pair_index: Arc<DashMap<(Uuid, Uuid), Uuid>>,
    catalog: SequenceCatalog,
    leads: LeadStore,
    messages: OutboundMessageStore,
    event_sink: Arc<dyn EventSink>,
}

impl std::fmt::Debug for JourneyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JourneyEngine")
            .field("journeys", &self.journeys.len())
            .finish()
    }
}

impl JourneyEngine {
    pub fn new(catalog: SequenceCatalog, leads: LeadStore, messages: OutboundMessageStore) -> Self {
        Self {
            journeys: Arc::new(DashMap::new()),
            pair_index: Arc::new(DashMap::new()),
            catalog,
            leads,
            messages,
            event_sink: dripforge_core::event_bus::noop_sink(),
        }
    }

    /// Attach an event sink for emitting analytics events.
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    pub fn get_journey(&self, id: &Uuid) -> Option<Journey> {
        self.journeys.get(id).map(|r| r.clone())
    }

    pub fn journey_for_pair(&self, lead_id: &Uuid, template_id: &Uuid) -> Option<Journey> {
        let id = *self.pair_index.get(&(*lead_id, *template_id))?;
        self.get_journey(&id)
    }

    /// Starts nurturing a lead through a template. Idempotent: a second start
    /// for the same (lead, template) pair returns the existing journey
    /// unchanged, with no side effects, so webhook retries need no pre-check.
    /// On first creation, step 1 is computed and enqueued synchronously.
    pub fn start_journey(&self, lead_id: &Uuid, template_id: &Uuid) -> Result<Journey> {
        self.leads
            .get(lead_id)
            .ok_or_else(|| anyhow!("Lead {} not found", lead_id))?;
        let template = self
            .catalog
            .get_template(template_id)
            .ok_or_else(|| anyhow!("Template {} not found", template_id))?;
        if !template.active {
            return Err(anyhow!("Template {} is not active", template_id));
        }

        let journey_id = Uuid::new_v4();
        let journey = Journey {
            id: journey_id,
            lead_id: *lead_id,
            template_id: *template_id,
            current_step: 0,
            status: JourneyStatus::Active,
            counters: Default::default(),
            started_at: Utc::now(),
            completed_at: None,
            last_interaction_at: None,
            converted_at: None,
        };
        match self.pair_index.entry((*lead_id, *template_id)) {
            Entry::Occupied(existing) => {
                let existing_id = *existing.get();
                drop(existing);
                info!(journey_id = %existing_id, lead_id = %lead_id, "Duplicate start, returning existing journey");
                return self
                    .get_journey(&existing_id)
                    .ok_or_else(|| anyhow!("Journey {} missing from store", existing_id));
            }
            Entry::Vacant(slot) => {
                // The row goes in while the index entry guard is held: any
                // reader that finds the index entry also finds the journey.
                self.journeys.insert(journey_id, journey);
                slot.insert(journey_id);
            }
        }

        info!(journey_id = %journey_id, lead_id = %lead_id, template_id = %template_id, "Journey started");
        metrics::counter!("journeys.started").increment(1);
        self.event_sink.emit(make_event(
            EventType::JourneyStarted,
            Some(journey_id),
            Some(*lead_id),
            None,
            None,
        ));

        self.advance_journey(&journey_id)?;
        self.get_journey(&journey_id)
            .ok_or_else(|| anyhow!("Journey {} missing from store", journey_id))
    }

    /// Advances the journey to its next eligible step.
    ///
    /// Called after the current step's message reaches a terminal status (or
    /// immediately after `sent` for channels with no delivery receipts).
    /// Walks forward past inactive steps and steps the lead has no usable
    /// destination for; each skip counts as visited. Running out of steps
    /// completes the journey — that is the expected terminal condition, not
    /// an error.
    pub fn advance_journey(&self, journey_id: &Uuid) -> Result<()> {
        loop {
            let (status, current_step, template_id, lead_id) = {
                let journey = self
                    .journeys
                    .get(journey_id)
                    .ok_or_else(|| anyhow!("Journey {} not found", journey_id))?;
                (
                    journey.status,
                    journey.current_step,
                    journey.template_id,
                    journey.lead_id,
                )
            };

            match status {
                JourneyStatus::Paused => {
                    info!(journey_id = %journey_id, "Journey paused, not advancing");
                    return Ok(());
                }
                JourneyStatus::Completed | JourneyStatus::Failed => return Ok(()),
                JourneyStatus::Active => {}
            }

            let next_step = current_step + 1;
            let Some(step) = self.catalog.get_step(&template_id, next_step) else {
                // Ran out of steps.
                self.finish_journey(journey_id, JourneyStatus::Completed)?;
                return Ok(());
            };

            if !step.active {
                self.skip_step(journey_id, &lead_id, next_step, "step deactivated");
                continue;
            }

            let Some(lead) = self.leads.get(&lead_id) else {
                warn!(journey_id = %journey_id, lead_id = %lead_id, "Lead disappeared, failing journey");
                self.finish_journey(journey_id, JourneyStatus::Failed)?;
                return Ok(());
            };

            let Some(destination) = lead.destination(step.channel).map(str::to_string) else {
                // Missing contact info degrades gracefully: skip the touch,
                // keep nurturing.
                self.skip_step(journey_id, &lead_id, next_step, "no destination for channel");
                continue;
            };

            let vars = lead.template_variables();
            let body = templates::render(&step.body_template, &vars);
            let subject = step
                .subject_template
                .as_deref()
                .map(|s| templates::render(s, &vars));
            let scheduled_at = Utc::now() + Duration::minutes(i64::from(step.delay_minutes));

            match self.messages.enqueue(NewOutboundMessage {
                journey_id: Some(*journey_id),
                lead_id,
                step_number: Some(next_step),
                channel: step.channel,
                to: destination,
                subject,
                body,
                scheduled_at,
            }) {
                Ok(message) => {
                    self.set_current_step(journey_id, next_step)?;
                    info!(
                        journey_id = %journey_id,
                        step_number = next_step,
                        channel = ?step.channel,
                        scheduled_at = %scheduled_at,
                        "Step scheduled"
                    );
                    self.event_sink.emit(make_event(
                        EventType::JourneyStepScheduled,
                        Some(*journey_id),
                        Some(lead_id),
                        Some(message.id),
                        Some(step.channel),
                    ));
                    return Ok(());
                }
                Err(DripError::Validation(reason)) => {
                    // Malformed destination or oversized content never
                    // reaches pending; the touch is lost, not the journey.
                    self.skip_step(journey_id, &lead_id, next_step, &reason);
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Administrative pause. A paused journey enqueues nothing until resumed.
    pub fn pause_journey(&self, journey_id: &Uuid) -> Result<()> {
        let mut journey = self
            .journeys
            .get_mut(journey_id)
            .ok_or_else(|| anyhow!("Journey {} not found", journey_id))?;
        if journey.status != JourneyStatus::Active {
            return Err(anyhow!(
                "Journey {} is {:?}, only active journeys can be paused",
                journey_id,
                journey.status
            ));
        }
        journey.status = JourneyStatus::Paused;
        info!(journey_id = %journey_id, "Journey paused");
        Ok(())
    }

    /// Resumes a paused journey. If the current step already finished while
    /// paused (its advancement was dropped), the journey advances now;
    /// otherwise the in-flight message's terminal event will advance it.
    pub fn resume_journey(&self, journey_id: &Uuid) -> Result<()> {
        {
            let mut journey = self
                .journeys
                .get_mut(journey_id)
                .ok_or_else(|| anyhow!("Journey {} not found", journey_id))?;
            if journey.status != JourneyStatus::Paused {
                return Err(anyhow!("Journey {} is not paused", journey_id));
            }
            journey.status = JourneyStatus::Active;
        }
        info!(journey_id = %journey_id, "Journey resumed");

        if self.current_step_settled(journey_id)? {
            self.advance_journey(journey_id)?;
        }
        Ok(())
    }

    /// Marks the lead converted; the timestamp is set once.
    pub fn mark_converted(&self, journey_id: &Uuid) -> Result<()> {
        let mut journey = self
            .journeys
            .get_mut(journey_id)
            .ok_or_else(|| anyhow!("Journey {} not found", journey_id))?;
        if journey.converted_at.is_none() {
            journey.converted_at = Some(Utc::now());
            info!(journey_id = %journey_id, "Journey marked converted");
        }
        Ok(())
    }

    /// Bumps the per-channel sent counter after a successful dispatch.
    pub fn record_sent(&self, journey_id: &Uuid, channel: Channel) -> Result<()> {
        let mut journey = self
            .journeys
            .get_mut(journey_id)
            .ok_or_else(|| anyhow!("Journey {} not found", journey_id))?;
        match channel {
            Channel::Sms => journey.counters.sms_sent += 1,
            Channel::Email => journey.counters.email_sent += 1,
        }
        Ok(())
    }

    pub fn record_delivery(&self, journey_id: &Uuid) -> Result<()> {
        self.record_interaction(journey_id, |j| j.counters.delivered += 1)
    }

    pub fn record_open(&self, journey_id: &Uuid) -> Result<()> {
        self.record_interaction(journey_id, |j| j.counters.opens += 1)
    }

    pub fn record_click(&self, journey_id: &Uuid) -> Result<()> {
        self.record_interaction(journey_id, |j| j.counters.clicks += 1)
    }

    /// Queues a one-off message outside any template. The caller sees
    /// validation problems directly instead of the skip policy.
    pub fn queue_direct_message(
        &self,
        lead_id: &Uuid,
        channel: Channel,
        subject: Option<String>,
        body: String,
    ) -> Result<OutboundMessage> {
        let lead = self
            .leads
            .get(lead_id)
            .ok_or_else(|| anyhow!("Lead {} not found", lead_id))?;
        let destination = lead
            .destination(channel)
            .ok_or_else(|| anyhow!("Lead {} has no usable {} destination", lead_id, channel.display_name()))?
            .to_string();

        let message = self.messages.enqueue(NewOutboundMessage {
            journey_id: None,
            lead_id: *lead_id,
            step_number: None,
            channel,
            to: destination,
            subject,
            body,
            scheduled_at: Utc::now(),
        })?;
        Ok(message)
    }

    /// Computes aggregate statistics for the given template from its journeys.
    pub fn template_stats(&self, template_id: &Uuid) -> TemplateStats {
        let mut stats = TemplateStats {
            template_id: *template_id,
            ..Default::default()
        };
        let mut total_completion_secs: f64 = 0.0;

        for entry in self.journeys.iter() {
            let journey = entry.value();
            if journey.template_id != *template_id {
                continue;
            }
            stats.total_started += 1;
            match journey.status {
                JourneyStatus::Active => stats.active += 1,
                JourneyStatus::Paused => stats.paused += 1,
                JourneyStatus::Completed => {
                    stats.completed += 1;
                    if let Some(completed_at) = journey.completed_at {
                        total_completion_secs += completed_at
                            .signed_duration_since(journey.started_at)
                            .num_seconds() as f64;
                    }
                }
                JourneyStatus::Failed => stats.failed += 1,
            }
            if journey.converted_at.is_some() {
                stats.converted += 1;
            }
            stats.total_sms_sent += journey.counters.sms_sent;
            stats.total_email_sent += journey.counters.email_sent;
            stats.total_opens += journey.counters.opens;
            stats.total_clicks += journey.counters.clicks;
        }

        if stats.completed > 0 {
            stats.avg_completion_time_secs = total_completion_secs / stats.completed as f64;
        }
        stats
    }

    fn record_interaction(
        &self,
        journey_id: &Uuid,
        update: impl FnOnce(&mut Journey),
    ) -> Result<()> {
        let mut journey = self
            .journeys
            .get_mut(journey_id)
            .ok_or_else(|| anyhow!("Journey {} not found", journey_id))?;
        update(&mut journey);
        journey.last_interaction_at = Some(Utc::now());
        Ok(())
    }

    fn set_current_step(&self, journey_id: &Uuid, step: u32) -> Result<()> {
        let mut journey = self
            .journeys
            .get_mut(journey_id)
            .ok_or_else(|| anyhow!("Journey {} not found", journey_id))?;
        journey.current_step = step;
        Ok(())
    }

    fn skip_step(&self, journey_id: &Uuid, lead_id: &Uuid, step: u32, reason: &str) {
        warn!(journey_id = %journey_id, step_number = step, reason, "Skipping step");
        if let Some(mut journey) = self.journeys.get_mut(journey_id) {
            journey.current_step = step;
        }
        self.event_sink.emit(make_event(
            EventType::JourneyStepSkipped,
            Some(*journey_id),
            Some(*lead_id),
            None,
            None,
        ));
    }

    fn finish_journey(&self, journey_id: &Uuid, status: JourneyStatus) -> Result<()> {
        let lead_id = {
            let mut journey = self
                .journeys
                .get_mut(journey_id)
                .ok_or_else(|| anyhow!("Journey {} not found", journey_id))?;
            journey.status = status;
            journey.completed_at = Some(Utc::now());
            journey.lead_id
        };
        let event_type = match status {
            JourneyStatus::Completed => {
                info!(journey_id = %journey_id, "Journey completed");
                metrics::counter!("journeys.completed").increment(1);
                EventType::JourneyCompleted
            }
            _ => {
                warn!(journey_id = %journey_id, ?status, "Journey ended unsuccessfully");
                metrics::counter!("journeys.failed").increment(1);
                EventType::JourneyFailed
            }
        };
        self.event_sink
            .emit(make_event(event_type, Some(*journey_id), Some(lead_id), None, None));
        Ok(())
    }

    /// True when the current step has no in-flight message: either nothing
    /// was ever enqueued for it or its message already reached a terminal
    /// status.
    fn current_step_settled(&self, journey_id: &Uuid) -> Result<bool> {
        let journey = self
            .journeys
            .get(journey_id)
            .ok_or_else(|| anyhow!("Journey {} not found", journey_id))?;
        if journey.current_step == 0 {
            return Ok(true);
        }
        let current = journey.current_step;
        drop(journey);
        let settled = self
            .messages
            .messages_for_journey(journey_id)
            .into_iter()
            .filter(|m| m.step_number == Some(current))
            .all(|m| m.status.is_terminal());
        Ok(settled)
    }
}
