//! Engines orchestrate the pure resolvers over the persistence and notification
//! collaborators.

pub mod approval;
pub mod budget;
pub mod project;

use tracing::warn;

use crate::notify::{DispatchFailure, NotificationEvent, Notifier};

pub use approval::{ApprovalEngine, DecisionReport, ResolveReport};
pub use budget::{BudgetAlertEngine, ProjectFailure, SweepReport};
pub use project::{CreatedProject, ProjectEngine};

/// Sends one event. Failures are logged and returned for the caller's report; they never
/// undo committed writes.
pub(crate) async fn dispatch<N: Notifier + ?Sized>(
    notifier: &N,
    event: NotificationEvent,
    subject_id: &str,
) -> Option<DispatchFailure> {
    match notifier.notify(&event).await {
        Ok(_) => None,
        Err(error) => {
            warn!(
                event_name = "notify.dispatch_failed",
                correlation_id = %event.correlation_id,
                notification_kind = event.kind.as_str(),
                recipient = %event.recipient.0,
                subject_id,
                error = %error,
                "notification dispatch failed"
            );
            Some(DispatchFailure {
                kind: event.kind,
                recipient: event.recipient,
                subject_id: subject_id.to_owned(),
                reason: error.to_string(),
            })
        }
    }
}
