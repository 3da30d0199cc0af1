use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::Utc;
use dashmap::DashMap;
use tracing::info;
use uuid::Uuid;

use dripforge_core::types::Channel;

use crate::types::{SequenceStep, SequenceTemplate, TriggerKind};

/// Read-mostly store of sequence templates.
///
/// Step lookups are always by explicit `(template_id, step_number)` so a
/// template edited mid-flight never shifts positions under a running journey.
#[derive(Clone, Default)]
pub struct SequenceCatalog {
    templates: Arc<DashMap<Uuid, SequenceTemplate>>,
}

impl SequenceCatalog {
    pub fn new() -> Self {
        Self {
            templates: Arc::new(DashMap::new()),
        }
    }

    /// Stores a template after validating its step layout and returns its id.
    pub fn insert_template(&self, template: SequenceTemplate) -> Result<Uuid> {
        validate_steps(&template)?;
        let id = template.id;
        info!(template_id = %id, name = %template.name, steps = template.steps.len(), "Registering sequence template");
        self.templates.insert(id, template);
        Ok(id)
    }

    /// Returns a clone of the template with the given id, if it exists.
    pub fn get_template(&self, id: &Uuid) -> Option<SequenceTemplate> {
        self.templates.get(id).map(|r| r.clone())
    }

    /// Resolves one step by explicit number. `None` means the sequence has no
    /// such position (a journey past the last step has run out of steps).
    pub fn get_step(&self, template_id: &Uuid, step_number: u32) -> Option<SequenceStep> {
        self.templates.get(template_id).and_then(|t| {
            t.steps
                .iter()
                .find(|s| s.step_number == step_number)
                .cloned()
        })
    }

    pub fn list_templates(&self) -> Vec<SequenceTemplate> {
        self.templates.iter().map(|r| r.value().clone()).collect()
    }

    /// Flips the template-level active flag. Only affects future journeys.
    pub fn set_template_active(&self, id: &Uuid, active: bool) -> Result<()> {
        let mut entry = self
            .templates
            .get_mut(id)
            .ok_or_else(|| anyhow!("Template {} not found", id))?;
        info!(template_id = %id, active, "Updating template active flag");
        entry.active = active;
        entry.updated_at = Utc::now();
        Ok(())
    }

    /// Deactivates one step in place. The step keeps its number and is
    /// skipped at advance time; siblings are not renumbered.
    pub fn deactivate_step(&self, template_id: &Uuid, step_number: u32) -> Result<()> {
        let mut entry = self
            .templates
            .get_mut(template_id)
            .ok_or_else(|| anyhow!("Template {} not found", template_id))?;
        let step = entry
            .steps
            .iter_mut()
            .find(|s| s.step_number == step_number)
            .ok_or_else(|| anyhow!("Step {} not found in template {}", step_number, template_id))?;
        step.active = false;
        entry.updated_at = Utc::now();
        info!(template_id = %template_id, step_number, "Deactivated sequence step");
        Ok(())
    }

    /// Seeds a demo welcome sequence for development and testing. Returns
    /// the template id.
    pub fn seed_demo_sequences(&self) -> Uuid {
        info!("Seeding demo sequences");
        let now = Utc::now();
        let template = SequenceTemplate {
            id: Uuid::new_v4(),
            name: "Welcome Series".to_string(),
            trigger: TriggerKind::ExternalEvent,
            active: true,
            steps: vec![
                SequenceStep {
                    step_number: 1,
                    channel: Channel::Email,
                    delay_minutes: 0,
                    body_template: "Hi {{first_name}}, thanks for reaching out! We'll be in touch shortly.".to_string(),
                    subject_template: Some("Welcome, {{first_name}}!".to_string()),
                    active: true,
                },
                SequenceStep {
                    step_number: 2,
                    channel: Channel::Sms,
                    delay_minutes: 1440,
                    body_template: "{{first_name}}, just checking in. Reply YES to book a call.".to_string(),
                    subject_template: None,
                    active: true,
                },
                SequenceStep {
                    step_number: 3,
                    channel: Channel::Email,
                    delay_minutes: 4320,
                    body_template: "Hi {{first_name}}, here's a case study you might like.".to_string(),
                    subject_template: Some("Still thinking it over?".to_string()),
                    active: true,
                },
            ],
            created_at: now,
            updated_at: now,
        };
        self.insert_template(template)
            .unwrap_or_else(|_| unreachable!("demo template is well-formed"))
    }
}

/// Step numbers must be contiguous starting at 1, and subjects only make
/// sense on email steps.
fn validate_steps(template: &SequenceTemplate) -> Result<()> {
    let mut numbers: Vec<u32> = template.steps.iter().map(|s| s.step_number).collect();
    numbers.sort_unstable();
    for (idx, n) in numbers.iter().enumerate() {
        let expected = idx as u32 + 1;
        if *n != expected {
            return Err(anyhow!(
                "Template {}: step numbers must be dense starting at 1, found {} at position {}",
                template.id,
                n,
                expected
            ));
        }
    }
    for step in &template.steps {
        if step.channel == Channel::Sms && step.subject_template.is_some() {
            return Err(anyhow!(
                "Template {}: step {} is SMS but has a subject template",
                template.id,
                step.step_number
            ));
        }
    }
    Ok(())
}
