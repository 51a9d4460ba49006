//! Post-finalization notifications.
//!
//! Best-effort only: a failed send is logged and counted by the finalizer and
//! never blocks the acknowledgement of the queue message.

pub mod message;
pub mod webhook;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

use crate::bookings::model::BookingStatus;
use crate::config::AppConfig;
use crate::error::NotifyError;

pub use message::Notification;
pub use webhook::WebhookNotifier;

#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn send(
        &self,
        recipient: &str,
        event_name: &str,
        reservation_id: &Uuid,
        status: BookingStatus,
    ) -> Result<(), NotifyError>;
}

/// Renders the notification and writes it to the log.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl NotificationDispatcher for LogNotifier {
    async fn send(
        &self,
        recipient: &str,
        event_name: &str,
        reservation_id: &Uuid,
        status: BookingStatus,
    ) -> Result<(), NotifyError> {
        let n = Notification::compose(recipient, event_name, reservation_id, status);
        info!(
            target: "notify",
            to = %n.to,
            subject = %n.subject,
            %reservation_id,
            "notification rendered"
        );
        Ok(())
    }
}

/// Webhook when `notify_webhook_url` is set, log output otherwise.
pub fn from_config(cfg: &AppConfig) -> Result<Arc<dyn NotificationDispatcher>, NotifyError> {
    match cfg.notify_webhook_url.as_deref() {
        Some(url) => Ok(Arc::new(WebhookNotifier::new(url.to_string())?)),
        None => Ok(Arc::new(LogNotifier)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn log_notifier_never_fails() {
        LogNotifier
            .send("a@b.c", "Gig", &Uuid::nil(), BookingStatus::Waiting)
            .await
            .unwrap();
    }

    #[test]
    fn no_webhook_configured_means_log_transport() {
        let cfg = AppConfig::for_database("sqlite::memory:");
        assert!(from_config(&cfg).is_ok());
    }
}
