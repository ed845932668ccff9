//! Alert Notification System
//!
//! Provides the pending-notification queue with timeout-driven successors,
//! unknown-flood grouping, and the rendering and delivery seams.

mod grouping;
mod manager;
mod message;
mod transport;
mod unknown;

pub use grouping::group_sets;
pub use manager::{to_chrono, NotificationManager, Outgoing, PendingMap, PollResult};
pub use message::{
    apply_templates, Message, PlainRenderer, RenderContext, Rendered, Renderer, TemplateKind,
};
pub use transport::{dispatch, Delivery, LogTransport, Transport};
pub use unknown::{batch_unknowns, UnknownBatch};

use thiserror::Error;

/// Notification delivery errors
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Delivery to {target} failed: {reason}")]
    DeliveryFailed { target: String, reason: String },
}

/// Template rendering errors
#[derive(Debug, Clone, Error)]
pub enum TemplateError {
    #[error("Rendering {template} failed: {reason}")]
    RenderFailed { template: String, reason: String },
    #[error("Empty subject for {0}")]
    EmptySubject(String),
}
