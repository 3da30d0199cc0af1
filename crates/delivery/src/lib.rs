//! Delivery plane — the periodic dispatch tick that hands due messages to
//! channel providers, and the reconciler that folds provider webhooks back
//! into message and journey state.

pub mod dispatch;
pub mod reconciler;

pub use dispatch::{DispatchProcessor, TickReport};
pub use reconciler::WebhookReconciler;
