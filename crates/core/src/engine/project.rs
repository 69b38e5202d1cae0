use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink, TracingAuditSink};
use crate::domain::category::{BudgetCategory, CategoryId};
use crate::domain::project::{NewProject, Project, ProjectId, ProjectStatus};
use crate::errors::ApplicationError;
use crate::store::ProjectStore;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CreatedProject {
    pub project: Project,
    pub categories: Vec<BudgetCategory>,
}

pub struct ProjectEngine<S> {
    store: S,
    default_alert_threshold: Decimal,
    audit: Arc<dyn AuditSink>,
}

impl<S: ProjectStore> ProjectEngine<S> {
    pub fn new(store: S, default_alert_threshold: Decimal) -> Self {
        Self { store, default_alert_threshold, audit: Arc::new(TracingAuditSink) }
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    /// Creates an active project and its categories in one write.
    pub async fn create_project(
        &self,
        request: NewProject,
        correlation_id: &str,
    ) -> Result<CreatedProject, ApplicationError> {
        request.validate()?;

        let now = Utc::now();
        let project = Project {
            id: ProjectId(Uuid::new_v4().to_string()),
            name: request.name.trim().to_owned(),
            description: request.description,
            total_budget: request.total_budget,
            owner_id: request.owner_id,
            status: ProjectStatus::Active,
            auto_approval_ceiling: request.auto_approval_ceiling,
            created_at: now,
            updated_at: now,
        };
        let categories: Vec<BudgetCategory> = request
            .categories
            .into_iter()
            .map(|category| BudgetCategory {
                id: CategoryId(Uuid::new_v4().to_string()),
                project_id: project.id.clone(),
                name: category.name.trim().to_owned(),
                description: category.description,
                budgeted_amount: category.budgeted_amount,
                spent_amount: Decimal::ZERO,
                alert_threshold: category.alert_threshold.unwrap_or(self.default_alert_threshold),
                is_active: true,
                created_at: now,
                updated_at: now,
            })
            .collect();

        self.store.create_project(&project, &categories).await?;

        info!(
            event_name = "project.created",
            correlation_id,
            project_id = %project.id.0,
            owner_id = %project.owner_id.0,
            category_count = categories.len(),
            "project created"
        );
        self.audit.emit(
            AuditEvent::new(
                correlation_id,
                "project.created",
                AuditCategory::Project,
                project.owner_id.0.clone(),
                AuditOutcome::Success,
            )
            .for_project(&project.id)
            .with_metadata("total_budget", project.total_budget.to_string()),
        );

        Ok(CreatedProject { project, categories })
    }
}
