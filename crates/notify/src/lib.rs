//! Outbound notification transports for the approval and budget engines.

pub mod log;
pub mod webhook;

use async_trait::async_trait;

use renobudget_core::config::NotificationsConfig;
use renobudget_core::notify::{DeliveryReceipt, NotificationError, NotificationEvent, Notifier};

pub use log::LogNotifier;
pub use webhook::WebhookNotifier;

/// The transport selected by configuration.
#[derive(Clone, Debug)]
pub enum ConfiguredNotifier {
    Webhook(WebhookNotifier),
    Log(LogNotifier),
}

impl ConfiguredNotifier {
    /// Webhook delivery when enabled with a URL; otherwise events are only logged.
    pub fn from_config(config: &NotificationsConfig) -> Result<Self, NotificationError> {
        match (&config.webhook_url, config.enabled) {
            (Some(url), true) => Ok(Self::Webhook(WebhookNotifier::new(
                url.clone(),
                config.api_token.clone(),
                config.timeout_secs,
            )?)),
            _ => Ok(Self::Log(LogNotifier)),
        }
    }

    pub fn transport(&self) -> &'static str {
        match self {
            Self::Webhook(_) => "webhook",
            Self::Log(_) => "log",
        }
    }
}

#[async_trait]
impl Notifier for ConfiguredNotifier {
    async fn notify(&self, event: &NotificationEvent) -> Result<DeliveryReceipt, NotificationError> {
        match self {
            Self::Webhook(notifier) => notifier.notify(event).await,
            Self::Log(notifier) => notifier.notify(event).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use renobudget_core::config::NotificationsConfig;

    use super::ConfiguredNotifier;

    fn config(enabled: bool, url: Option<&str>) -> NotificationsConfig {
        NotificationsConfig {
            enabled,
            webhook_url: url.map(str::to_string),
            api_token: None,
            timeout_secs: 5,
        }
    }

    #[test]
    fn enabled_webhook_config_selects_webhook_transport() {
        let notifier = ConfiguredNotifier::from_config(&config(true, Some("https://hooks.example.com/reno")))
            .expect("notifier");
        assert_eq!(notifier.transport(), "webhook");
    }

    #[test]
    fn disabled_or_unaddressed_config_falls_back_to_logging() {
        let disabled = ConfiguredNotifier::from_config(&config(false, Some("https://hooks.example.com")))
            .expect("notifier");
        assert_eq!(disabled.transport(), "log");

        let no_url = ConfiguredNotifier::from_config(&config(true, None)).expect("notifier");
        assert_eq!(no_url.transport(), "log");
    }
}
