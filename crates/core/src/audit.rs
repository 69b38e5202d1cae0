use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::domain::project::ProjectId;
use crate::domain::purchase::PurchaseId;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditCategory {
    Approval,
    Budget,
    Project,
    Notification,
}

impl AuditCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approval => "approval",
            Self::Budget => "budget",
            Self::Project => "project",
            Self::Notification => "notification",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditOutcome {
    Success,
    Rejected,
    Failed,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,
    pub project_id: Option<ProjectId>,
    pub purchase_id: Option<PurchaseId>,
    pub correlation_id: String,
    pub event_type: String,
    pub category: AuditCategory,
    pub actor: String,
    pub outcome: AuditOutcome,
    pub metadata: BTreeMap<String, String>,
    pub occurred_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(
        correlation_id: impl Into<String>,
        event_type: impl Into<String>,
        category: AuditCategory,
        actor: impl Into<String>,
        outcome: AuditOutcome,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            project_id: None,
            purchase_id: None,
            correlation_id: correlation_id.into(),
            event_type: event_type.into(),
            category,
            actor: actor.into(),
            outcome,
            metadata: BTreeMap::new(),
            occurred_at: Utc::now(),
        }
    }

    pub fn for_project(mut self, project_id: &ProjectId) -> Self {
        self.project_id = Some(project_id.clone());
        self
    }

    pub fn for_purchase(mut self, purchase_id: &PurchaseId) -> Self {
        self.purchase_id = Some(purchase_id.clone());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

pub trait AuditSink: Send + Sync {
    fn emit(&self, event: AuditEvent);
}

/// Writes audit events into the structured log stream.
#[derive(Clone, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        let metadata = serde_json::to_string(&event.metadata).unwrap_or_default();
        info!(
            event_name = "audit.event",
            audit_event_type = %event.event_type,
            audit_category = event.category.as_str(),
            correlation_id = %event.correlation_id,
            project_id = event.project_id.as_ref().map(|id| id.0.as_str()).unwrap_or(""),
            purchase_id = event.purchase_id.as_ref().map(|id| id.0.as_str()).unwrap_or(""),
            actor = %event.actor,
            outcome = ?event.outcome,
            metadata = %metadata,
            "audit event"
        );
    }
}

#[derive(Clone, Default)]
pub struct InMemoryAuditSink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl InMemoryAuditSink {
    pub fn events(&self) -> Vec<AuditEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn events_of_type(&self, event_type: &str) -> Vec<AuditEvent> {
        self.events().into_iter().filter(|event| event.event_type == event_type).collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn emit(&self, event: AuditEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink},
        domain::{project::ProjectId, purchase::PurchaseId},
    };

    #[test]
    fn in_memory_sink_records_events_with_correlation_fields() {
        let sink = InMemoryAuditSink::default();
        sink.emit(
            AuditEvent::new(
                "req-123",
                "approval.decision_recorded",
                AuditCategory::Approval,
                "u-manager",
                AuditOutcome::Success,
            )
            .for_project(&ProjectId("prj-kitchen".to_owned()))
            .for_purchase(&PurchaseId("pur-42".to_owned()))
            .with_metadata("action", "approved"),
        );

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].correlation_id, "req-123");
        assert_eq!(events[0].purchase_id.as_ref().map(|id| id.0.as_str()), Some("pur-42"));
        assert_eq!(events[0].project_id.as_ref().map(|id| id.0.as_str()), Some("prj-kitchen"));
        assert_eq!(events[0].metadata.get("action").map(String::as_str), Some("approved"));
        assert_eq!(sink.events_of_type("approval.decision_recorded").len(), 1);
        assert!(sink.events_of_type("budget.alert_raised").is_empty());
    }
}
