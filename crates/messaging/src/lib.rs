//! Outbound messaging — the unified message row, its monotonic status state
//! machine, the claimable message store, and the SMS/email channel adapters.

pub mod adapter;
pub mod email;
pub mod message;
pub mod sms;
pub mod state_machine;
pub mod store;

pub use adapter::ChannelAdapter;
pub use email::EmailGateway;
pub use message::{DeliveryOutcome, MessageStatus, NewOutboundMessage, OutboundMessage, WebhookEvent};
pub use sms::SmsGateway;
pub use store::OutboundMessageStore;
