use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::UserId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    ApprovalRequested,
    PurchaseApproved,
    PurchaseRejected,
    BudgetAlert,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ApprovalRequested => "approval_requested",
            Self::PurchaseApproved => "purchase_approved",
            Self::PurchaseRejected => "purchase_rejected",
            Self::BudgetAlert => "budget_alert",
        }
    }
}

/// A fully formed event. Templating and transport belong to the notifier.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub recipient: UserId,
    pub payload: serde_json::Value,
    pub correlation_id: String,
}

impl NotificationEvent {
    pub fn new(
        kind: NotificationKind,
        recipient: UserId,
        payload: serde_json::Value,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self { kind, recipient, payload, correlation_id: correlation_id.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    /// Provider-assigned id, when the transport returns one.
    pub delivery_id: Option<String>,
    pub accepted_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum NotificationError {
    #[error("notification transport failed: {0}")]
    Transport(String),
    #[error("notification timed out after {0}s")]
    Timeout(u64),
    #[error("notification rejected by provider (status {status}): {message}")]
    Rejected { status: u16, message: String },
}

/// A notification that could not be delivered. Recorded alongside results; never rolls
/// back the writes that triggered it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchFailure {
    pub kind: NotificationKind,
    pub recipient: UserId,
    /// The purchase or category the notification was about.
    pub subject_id: String,
    pub reason: String,
}

/// Outbound notification collaborator. Implementations apply their own timeout and
/// retry policy; callers never retry.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &NotificationEvent) -> Result<DeliveryReceipt, NotificationError>;
}

#[derive(Debug, Default)]
struct Recorded {
    events: Vec<NotificationEvent>,
    failure: Option<NotificationError>,
}

/// Records events for assertions and can be switched into a failing mode.
#[derive(Clone, Debug, Default)]
pub struct InMemoryNotifier {
    inner: Arc<Mutex<Recorded>>,
}

impl InMemoryNotifier {
    fn with_inner<T>(&self, f: impl FnOnce(&mut Recorded) -> T) -> T {
        match self.inner.lock() {
            Ok(mut inner) => f(&mut inner),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    pub fn fail_with(&self, error: NotificationError) {
        self.with_inner(|inner| inner.failure = Some(error));
    }

    pub fn recover(&self) {
        self.with_inner(|inner| inner.failure = None);
    }

    pub fn events(&self) -> Vec<NotificationEvent> {
        self.with_inner(|inner| inner.events.clone())
    }

    pub fn events_of_kind(&self, kind: NotificationKind) -> Vec<NotificationEvent> {
        self.events().into_iter().filter(|event| event.kind == kind).collect()
    }
}

#[async_trait]
impl Notifier for InMemoryNotifier {
    async fn notify(&self, event: &NotificationEvent) -> Result<DeliveryReceipt, NotificationError> {
        self.with_inner(|inner| {
            if let Some(error) = &inner.failure {
                return Err(error.clone());
            }
            inner.events.push(event.clone());
            Ok(DeliveryReceipt {
                delivery_id: Some(format!("mem-{}", inner.events.len())),
                accepted_at: Utc::now(),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{InMemoryNotifier, NotificationError, NotificationEvent, NotificationKind, Notifier};
    use crate::domain::UserId;

    fn event() -> NotificationEvent {
        NotificationEvent::new(
            NotificationKind::BudgetAlert,
            UserId("u-owner".to_owned()),
            json!({"category_name": "Materials"}),
            "req-1",
        )
    }

    #[tokio::test]
    async fn in_memory_notifier_records_and_fails_on_demand() {
        let notifier = InMemoryNotifier::default();
        let receipt = notifier.notify(&event()).await.expect("delivered");
        assert_eq!(receipt.delivery_id.as_deref(), Some("mem-1"));
        assert_eq!(notifier.events_of_kind(NotificationKind::BudgetAlert).len(), 1);

        notifier.fail_with(NotificationError::Timeout(5));
        let error = notifier.notify(&event()).await.expect_err("should fail");
        assert_eq!(error, NotificationError::Timeout(5));
        assert_eq!(notifier.events().len(), 1);
    }

    #[test]
    fn event_serializes_kind_as_type() {
        let value = serde_json::to_value(event()).expect("serialize");
        assert_eq!(value["type"], "budget_alert");
        assert_eq!(value["recipient"], "u-owner");
    }
}
