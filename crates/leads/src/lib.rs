//! Lead profiles — contact destinations, channel consent, and template
//! variables for captured leads.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use dripforge_core::types::Channel;

/// Channel-level consent flags for a lead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsentFlags {
    pub email_opt_in: bool,
    pub sms_opt_in: bool,
}

impl Default for ConsentFlags {
    fn default() -> Self {
        Self {
            email_opt_in: true,
            sms_opt_in: true,
        }
    }
}

/// A captured lead. Missing contact info degrades nurturing gracefully:
/// the orchestrator skips steps it cannot deliver rather than failing the
/// journey.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lead {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    /// Free-form attributes available as template variables.
    pub attributes: HashMap<String, String>,
    pub consent: ConsentFlags,
    pub created_at: DateTime<Utc>,
}

impl Lead {
    /// Destination address for the given channel, honoring consent.
    /// An opted-out channel reads the same as a missing destination.
    pub fn destination(&self, channel: Channel) -> Option<&str> {
        match channel {
            Channel::Sms if self.consent.sms_opt_in => self.phone.as_deref(),
            Channel::Email if self.consent.email_opt_in => self.email.as_deref(),
            _ => None,
        }
    }

    /// Template variables derived from the profile: name/contact fields plus
    /// all free-form attributes.
    pub fn template_variables(&self) -> HashMap<String, String> {
        let mut vars = self.attributes.clone();
        vars.insert("first_name".to_string(), self.first_name.clone());
        vars.insert("last_name".to_string(), self.last_name.clone());
        if let Some(email) = &self.email {
            vars.insert("email".to_string(), email.clone());
        }
        if let Some(phone) = &self.phone {
            vars.insert("phone".to_string(), phone.clone());
        }
        vars
    }
}

/// In-memory lead store.
#[derive(Clone, Default)]
pub struct LeadStore {
    leads: Arc<DashMap<Uuid, Lead>>,
}

impl LeadStore {
    pub fn new() -> Self {
        Self {
            leads: Arc::new(DashMap::new()),
        }
    }

    pub fn upsert(&self, lead: Lead) -> Uuid {
        let id = lead.id;
        info!(lead_id = %id, "Upserting lead");
        self.leads.insert(id, lead);
        id
    }

    pub fn get(&self, id: &Uuid) -> Option<Lead> {
        self.leads.get(id).map(|r| r.clone())
    }

    pub fn list(&self) -> Vec<Lead> {
        self.leads.iter().map(|r| r.value().clone()).collect()
    }
}
