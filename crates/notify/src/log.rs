use async_trait::async_trait;
use chrono::Utc;
use tracing::info;

use renobudget_core::notify::{DeliveryReceipt, NotificationError, NotificationEvent, Notifier};

/// Writes each event to the tracing pipeline instead of delivering it.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: &NotificationEvent) -> Result<DeliveryReceipt, NotificationError> {
        info!(
            event_name = "notify.logged",
            correlation_id = %event.correlation_id,
            notification_type = event.kind.as_str(),
            recipient = %event.recipient.0,
            payload = %event.payload,
            "notification logged"
        );
        Ok(DeliveryReceipt { delivery_id: None, accepted_at: Utc::now() })
    }
}
