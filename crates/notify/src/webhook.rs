use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::{debug, warn};

use renobudget_core::notify::{DeliveryReceipt, NotificationError, NotificationEvent, Notifier};

const MAX_ERROR_BODY_CHARS: usize = 200;

/// Posts each event as JSON to a single endpoint.
///
/// Every request is bounded by the configured timeout. A non-2xx answer becomes
/// [`NotificationError::Rejected`]; the notifier never retries.
#[derive(Clone, Debug)]
pub struct WebhookNotifier {
    client: Client,
    url: String,
    api_token: Option<SecretString>,
    timeout_secs: u64,
}

impl WebhookNotifier {
    pub fn new(
        url: impl Into<String>,
        api_token: Option<SecretString>,
        timeout_secs: u64,
    ) -> Result<Self, NotificationError> {
        let timeout_secs = timeout_secs.max(1);
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|error| NotificationError::Transport(error.to_string()))?;
        Ok(Self { client, url: url.into(), api_token, timeout_secs })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, event: &NotificationEvent) -> Result<DeliveryReceipt, NotificationError> {
        let mut request = self.client.post(&self.url).json(event);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = request.send().await.map_err(|error| {
            if error.is_timeout() {
                NotificationError::Timeout(self.timeout_secs)
            } else {
                NotificationError::Transport(error.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
            warn!(
                event_name = "notify.webhook_rejected",
                correlation_id = %event.correlation_id,
                notification_type = event.kind.as_str(),
                status = status.as_u16(),
                "webhook rejected notification"
            );
            return Err(NotificationError::Rejected { status: status.as_u16(), message });
        }

        let delivery_id = response.json::<Value>().await.ok().and_then(|body| {
            body.get("id")
                .or_else(|| body.get("delivery_id"))
                .and_then(Value::as_str)
                .map(str::to_string)
        });

        debug!(
            event_name = "notify.webhook_delivered",
            correlation_id = %event.correlation_id,
            notification_type = event.kind.as_str(),
            delivery_id = delivery_id.as_deref().unwrap_or(""),
            "webhook accepted notification"
        );
        Ok(DeliveryReceipt { delivery_id, accepted_at: Utc::now() })
    }
}
