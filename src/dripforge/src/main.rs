//! DripForge — multi-tenant drip-campaign orchestration engine.
//!
//! Main entry point that wires the stores, journey engine, channel gateways
//! and the periodic dispatch tick together.

use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use dripforge_catalog::SequenceCatalog;
use dripforge_core::config::AppConfig;
use dripforge_delivery::{DispatchProcessor, WebhookReconciler};
use dripforge_journey::JourneyEngine;
use dripforge_leads::{ConsentFlags, Lead, LeadStore};
use dripforge_messaging::{EmailGateway, OutboundMessageStore, SmsGateway};

#[derive(Parser, Debug)]
#[command(name = "dripforge")]
#[command(about = "Multi-tenant drip-campaign orchestration engine")]
#[command(version)]
struct Cli {
    /// Node identifier (overrides config)
    #[arg(long, env = "DRIPFORGE__NODE_ID")]
    node_id: Option<String>,

    /// Dispatch batch size (overrides config)
    #[arg(long, env = "DRIPFORGE__DISPATCH__BATCH_SIZE")]
    batch_size: Option<usize>,

    /// Seconds between dispatch ticks (overrides config)
    #[arg(long, env = "DRIPFORGE__DISPATCH__TICK_INTERVAL_SECS")]
    tick_interval: Option<u64>,

    /// Seed a demo sequence and lead, and start a journey through it
    #[arg(long, default_value_t = false)]
    demo: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dripforge=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("DripForge starting up");

    // Load configuration
    let mut config = AppConfig::load().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    // Apply CLI overrides
    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(batch_size) = cli.batch_size {
        config.dispatch.batch_size = batch_size;
    }
    if let Some(secs) = cli.tick_interval {
        config.dispatch.tick_interval_secs = secs;
    }

    info!(
        node_id = %config.node_id,
        batch_size = config.dispatch.batch_size,
        tick_interval_secs = config.dispatch.tick_interval_secs,
        "Configuration loaded"
    );

    // Shared in-memory stores
    let catalog = SequenceCatalog::new();
    let leads = LeadStore::new();
    let messages = OutboundMessageStore::new();

    let engine = JourneyEngine::new(catalog.clone(), leads.clone(), messages.clone());

    // Channel gateways
    let sms = Arc::new(SmsGateway::new(config.twilio.clone()));
    let email = Arc::new(EmailGateway::new(config.sendgrid.clone()));

    let processor = DispatchProcessor::new(messages.clone(), engine.clone(), &config.dispatch)
        .with_adapter(sms.clone())
        .with_adapter(email.clone());

    // Webhook ingestion path; an HTTP front-end would feed payloads into this.
    let _reconciler = WebhookReconciler::new(messages.clone(), engine.clone())
        .with_adapter(sms)
        .with_adapter(email);

    if cli.demo {
        let template_id = catalog.seed_demo_sequences();
        let lead_id = leads.upsert(Lead {
            id: uuid::Uuid::new_v4(),
            first_name: "Demo".to_string(),
            last_name: "Lead".to_string(),
            email: Some("demo@dripforge.io".to_string()),
            phone: Some("+15550100100".to_string()),
            attributes: Default::default(),
            consent: ConsentFlags::default(),
            created_at: chrono::Utc::now(),
        });
        let journey = engine.start_journey(&lead_id, &template_id)?;
        info!(journey_id = %journey.id, "Demo journey started");
    }

    info!("DripForge is ready");

    // Dispatch loop (blocks until shutdown)
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(
        config.dispatch.tick_interval_secs,
    ));
    loop {
        interval.tick().await;
        match processor.tick() {
            Ok(report) if report.claimed > 0 => {
                info!(
                    claimed = report.claimed,
                    sent = report.sent,
                    failed = report.failed,
                    "Dispatch tick complete"
                );
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Dispatch tick failed"),
        }
    }
}
