//! Notification Delivery

use crate::{Message, NotifyError};
use alert_model::NotificationDef;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info};

/// Notification transport collaborator (HTTP, email, chat, ...)
#[async_trait]
pub trait Transport: Send + Sync {
    async fn deliver(
        &self,
        message: &Message,
        notification: &NotificationDef,
    ) -> Result<(), NotifyError>;
}

/// A message bound for one notification definition
#[derive(Debug, Clone)]
pub struct Delivery {
    pub notification: NotificationDef,
    pub message: Message,
}

/// Transport that only writes deliveries to the log
#[derive(Debug, Clone, Default)]
pub struct LogTransport;

#[async_trait]
impl Transport for LogTransport {
    async fn deliver(
        &self,
        message: &Message,
        notification: &NotificationDef,
    ) -> Result<(), NotifyError> {
        info!(
            notification = %notification.name,
            target = %notification.target,
            dedup = %message.dedup_key,
            "{}",
            message.subject
        );
        Ok(())
    }
}

/// Send deliveries in the background.
///
/// Failures are logged only; the successor chain is the retry mechanism.
/// Call `detach_all` on the returned set to let the tasks outlive it.
pub fn dispatch(transport: Arc<dyn Transport>, deliveries: Vec<Delivery>) -> JoinSet<()> {
    let mut tasks = JoinSet::new();
    for delivery in deliveries {
        let transport = Arc::clone(&transport);
        tasks.spawn(async move {
            let name = delivery.notification.name.clone();
            match transport
                .deliver(&delivery.message, &delivery.notification)
                .await
            {
                Ok(()) => {
                    metrics::counter!("sched.notifications.sent", "notification" => name).increment(1);
                }
                Err(e) => {
                    error!(
                        "Failed to send {} for {}: {}",
                        name, delivery.message.dedup_key, e
                    );
                    metrics::counter!("sched.notifications.failed", "notification" => name)
                        .increment(1);
                }
            }
        });
    }
    tasks
}
