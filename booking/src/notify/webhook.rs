use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::bookings::model::BookingStatus;
use crate::error::NotifyError;
use crate::notify::{Notification, NotificationDispatcher};

/// POSTs the rendered notification as JSON to a fixed URL.
#[derive(Clone)]
pub struct WebhookNotifier {
    http: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: String) -> Result<Self, NotifyError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(5))
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(30))
            .build()?;

        Ok(Self { http, url })
    }
}

#[async_trait]
impl NotificationDispatcher for WebhookNotifier {
    #[instrument(
        skip(self, recipient, event_name),
        fields(reservation_id = %reservation_id, status = %status),
        level = "debug"
    )]
    async fn send(
        &self,
        recipient: &str,
        event_name: &str,
        reservation_id: &Uuid,
        status: BookingStatus,
    ) -> Result<(), NotifyError> {
        let n = Notification::compose(recipient, event_name, reservation_id, status);

        let resp = self.http.post(&self.url).json(&n).send().await?;
        if !resp.status().is_success() {
            return Err(NotifyError::Rejected(format!(
                "webhook answered {}",
                resp.status()
            )));
        }

        debug!("notification delivered");
        Ok(())
    }
}
