use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink, TracingAuditSink};
use crate::budget::{AlertReport, AlertSummary, BudgetAlertEvaluator, CategoryFailure};
use crate::domain::alert::BudgetAlert;
use crate::domain::category::BudgetCategory;
use crate::domain::project::{Project, ProjectId};
use crate::errors::ApplicationError;
use crate::notify::{NotificationEvent, NotificationKind, Notifier};
use crate::store::{BudgetStore, CategoryLoad, ProjectStore};

use super::dispatch;

const EVALUATOR_ACTOR: &str = "budget-evaluator";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectFailure {
    pub project_id: ProjectId,
    pub reason: String,
}

/// Result of evaluating every active project.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SweepReport {
    pub reports: Vec<AlertReport>,
    pub failures: Vec<ProjectFailure>,
}

impl SweepReport {
    pub fn summary(&self) -> AlertSummary {
        self.reports.iter().fold(AlertSummary::default(), |mut total, report| {
            total.warning_count += report.summary.warning_count;
            total.critical_count += report.summary.critical_count;
            total.exceeded_count += report.summary.exceeded_count;
            total
        })
    }
}

pub struct BudgetAlertEngine<S, N> {
    store: S,
    notifier: N,
    evaluator: BudgetAlertEvaluator,
    audit: Arc<dyn AuditSink>,
}

impl<S, N> BudgetAlertEngine<S, N>
where
    S: ProjectStore + BudgetStore,
    N: Notifier,
{
    pub fn new(store: S, notifier: N, evaluator: BudgetAlertEvaluator) -> Self {
        Self { store, notifier, evaluator, audit: Arc::new(TracingAuditSink) }
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    /// Recomputes spend for every active category of the project, refreshes the live
    /// alert of each and notifies the owner of new critical or exceeded alerts.
    ///
    /// An alert stays unnotified until a dispatch succeeds, so a failed delivery is retried
    /// on the next evaluation instead of being suppressed as unchanged.
    ///
    /// A category whose purchases cannot be read, or whose alert cannot be written, is
    /// listed in [`AlertReport::failures`] and the run carries on with the rest.
    pub async fn evaluate(
        &self,
        project_id: &ProjectId,
        correlation_id: &str,
    ) -> Result<AlertReport, ApplicationError> {
        let project = self.store.get_project(project_id).await?;
        let rows = self.store.get_categories_with_purchases(project_id).await?;
        let evaluated_at = Utc::now();

        let mut alerts = Vec::new();
        let mut failures = Vec::new();
        let mut dispatch_failures = Vec::new();

        for row in rows {
            let (category, purchases) = match row {
                CategoryLoad::Loaded { category, purchases } => (category, purchases),
                CategoryLoad::Unreadable { category_id, category_name, error } => {
                    warn!(
                        event_name = "budget.category_skipped",
                        correlation_id,
                        project_id = %project_id.0,
                        category_id = %category_id.0,
                        error = %error,
                        "category skipped: category could not be read"
                    );
                    failures.push(CategoryFailure {
                        category_id,
                        category_name,
                        reason: error.to_string(),
                    });
                    continue;
                }
            };

            let (utilization, alert) =
                self.evaluator.evaluate_category(&category, &purchases, evaluated_at);
            self.reconcile_spent(&category, utilization.spent, correlation_id).await;

            let Some(alert) = alert else {
                if let Err(error) = self.store.clear_alerts(&category.id).await {
                    warn!(
                        event_name = "budget.category_skipped",
                        correlation_id,
                        project_id = %project_id.0,
                        category_id = %category.id.0,
                        error = %error,
                        "category skipped: stale alerts could not be cleared"
                    );
                    failures.push(skipped(&category, error.to_string()));
                }
                continue;
            };

            let change = match self.store.upsert_alert(&alert).await {
                Ok(change) => change,
                Err(error) => {
                    warn!(
                        event_name = "budget.category_skipped",
                        correlation_id,
                        project_id = %project_id.0,
                        category_id = %category.id.0,
                        error = %error,
                        "category skipped: alert could not be stored"
                    );
                    failures.push(skipped(&category, error.to_string()));
                    continue;
                }
            };

            if change.is_new_severity() {
                info!(
                    event_name = "budget.alert_raised",
                    correlation_id,
                    project_id = %project_id.0,
                    category_id = %category.id.0,
                    severity = alert.severity.as_str(),
                    spent = %alert.spent_amount,
                    budgeted = %alert.budgeted_amount,
                    "budget alert raised"
                );
                self.audit.emit(
                    AuditEvent::new(
                        correlation_id,
                        "budget.alert_raised",
                        AuditCategory::Budget,
                        EVALUATOR_ACTOR,
                        AuditOutcome::Success,
                    )
                    .for_project(project_id)
                    .with_metadata("category_id", category.id.0.clone())
                    .with_metadata("severity", alert.severity.as_str()),
                );
            }

            if change.needs_notification() {
                let failure = if alert.severity.is_alert_worthy() {
                    let event = NotificationEvent::new(
                        NotificationKind::BudgetAlert,
                        project.owner_id.clone(),
                        alert_payload(&project, &alert),
                        correlation_id,
                    );
                    dispatch(&self.notifier, event, &category.id.0).await
                } else {
                    None
                };
                match failure {
                    Some(failure) => dispatch_failures.push(failure),
                    None => self.mark_notified(&alert, correlation_id).await,
                }
            }

            alerts.push(alert);
        }

        let summary = AlertSummary::from_alerts(&alerts);
        info!(
            event_name = "budget.evaluated",
            correlation_id,
            project_id = %project_id.0,
            warning_count = summary.warning_count,
            critical_count = summary.critical_count,
            exceeded_count = summary.exceeded_count,
            failed_categories = failures.len(),
            "budget evaluation completed"
        );

        Ok(AlertReport {
            project_id: project_id.clone(),
            alerts,
            summary,
            failures,
            dispatch_failures,
            evaluated_at,
        })
    }

    /// Evaluates every active project. One failing project does not stop the sweep.
    pub async fn evaluate_active(&self, correlation_id: &str) -> Result<SweepReport, ApplicationError> {
        let projects = self.store.list_active_projects().await?;
        let mut reports = Vec::with_capacity(projects.len());
        let mut failures = Vec::new();

        for project in projects {
            match self.evaluate(&project.id, correlation_id).await {
                Ok(report) => reports.push(report),
                Err(error) => {
                    warn!(
                        event_name = "budget.project_skipped",
                        correlation_id,
                        project_id = %project.id.0,
                        error = %error,
                        "project skipped during budget sweep"
                    );
                    failures.push(ProjectFailure { project_id: project.id, reason: error.to_string() });
                }
            }
        }

        Ok(SweepReport { reports, failures })
    }

    async fn mark_notified(&self, alert: &BudgetAlert, correlation_id: &str) {
        if let Err(error) = self.store.mark_alert_notified(&alert.category_id, alert.severity).await {
            warn!(
                event_name = "budget.alert_mark_failed",
                correlation_id,
                category_id = %alert.category_id.0,
                severity = alert.severity.as_str(),
                error = %error,
                "alert delivery could not be recorded"
            );
        }
    }

    async fn reconcile_spent(
        &self,
        category: &BudgetCategory,
        spent: Decimal,
        correlation_id: &str,
    ) {
        if category.spent_amount == spent {
            return;
        }
        match self.store.refresh_spent_amount(&category.id, spent).await {
            Ok(()) => info!(
                event_name = "budget.spent_reconciled",
                correlation_id,
                category_id = %category.id.0,
                cached = %category.spent_amount,
                recomputed = %spent,
                "cached spent amount reconciled"
            ),
            Err(error) => warn!(
                event_name = "budget.spent_reconcile_failed",
                correlation_id,
                category_id = %category.id.0,
                error = %error,
                "cached spent amount could not be refreshed"
            ),
        }
    }
}

fn skipped(category: &BudgetCategory, reason: String) -> CategoryFailure {
    CategoryFailure { category_id: category.id.clone(), category_name: category.name.clone(), reason }
}

fn alert_payload(project: &Project, alert: &BudgetAlert) -> serde_json::Value {
    json!({
        "project_id": project.id.0,
        "project_name": project.name,
        "category_id": alert.category_id.0,
        "category_name": alert.category_name,
        "severity": alert.severity.as_str(),
        "budgeted_amount": alert.budgeted_amount.to_string(),
        "spent_amount": alert.spent_amount.to_string(),
        "current_percentage": alert.current_percentage.map(|value| value.to_string()),
        "threshold_percentage": alert.threshold_percentage.to_string(),
        "message": alert.message,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{NaiveDate, Utc};
    use rust_decimal::Decimal;

    use super::BudgetAlertEngine;
    use crate::audit::InMemoryAuditSink;
    use crate::budget::BudgetAlertEvaluator;
    use crate::domain::alert::AlertSeverity;
    use crate::domain::category::{BudgetCategory, CategoryId};
    use crate::domain::project::{Project, ProjectId, ProjectStatus};
    use crate::domain::purchase::{Purchase, PurchaseId, PurchasePriority, PurchaseStatus};
    use crate::domain::UserId;
    use crate::errors::{ApplicationError, DomainError};
    use crate::notify::{InMemoryNotifier, NotificationError, NotificationKind};
    use crate::store::{BudgetStore, InMemoryStore};

    fn project(id: &str, status: ProjectStatus) -> Project {
        let now = Utc::now();
        Project {
            id: ProjectId(id.to_owned()),
            name: "Kitchen Remodel".to_owned(),
            description: None,
            total_budget: Decimal::from(20_000),
            owner_id: UserId("u-owner".to_owned()),
            status,
            auto_approval_ceiling: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn category(id: &str, name: &str, budget: i64) -> BudgetCategory {
        let now = Utc::now();
        BudgetCategory {
            id: CategoryId(id.to_owned()),
            project_id: ProjectId("prj-kitchen".to_owned()),
            name: name.to_owned(),
            description: None,
            budgeted_amount: Decimal::from(budget),
            spent_amount: Decimal::ZERO,
            alert_threshold: Decimal::from(80),
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    fn spend(store: &InMemoryStore, id: &str, category: &str, amount: i64, status: PurchaseStatus) {
        let now = Utc::now();
        store.insert_purchase(Purchase {
            id: PurchaseId(id.to_owned()),
            project_id: ProjectId("prj-kitchen".to_owned()),
            category_id: CategoryId(category.to_owned()),
            description: format!("purchase {id}"),
            supplier: None,
            amount: Decimal::from(amount),
            purchase_date: NaiveDate::from_ymd_opt(2026, 2, 10).expect("valid date"),
            requested_by: UserId("u-requester".to_owned()),
            status,
            approved_by: None,
            approved_at: None,
            rejection_reason: None,
            priority: PurchasePriority::Normal,
            created_at: now,
            updated_at: now,
        });
    }

    fn engine(
        store: &InMemoryStore,
        notifier: &InMemoryNotifier,
    ) -> BudgetAlertEngine<InMemoryStore, InMemoryNotifier> {
        BudgetAlertEngine::new(store.clone(), notifier.clone(), BudgetAlertEvaluator::default())
    }

    fn kitchen() -> InMemoryStore {
        let store = InMemoryStore::default();
        store.insert_project(project("prj-kitchen", ProjectStatus::Active));
        store.insert_category(category("cat-materials", "Materials", 5_000));
        store
    }

    #[tokio::test]
    async fn repeated_evaluation_keeps_one_alert_per_category() {
        let store = kitchen();
        spend(&store, "p1", "cat-materials", 4_800, PurchaseStatus::Approved);
        let notifier = InMemoryNotifier::default();
        let engine = engine(&store, &notifier);
        let project_id = ProjectId("prj-kitchen".to_owned());

        let first = engine.evaluate(&project_id, "req-1").await.expect("first");
        let second = engine.evaluate(&project_id, "req-2").await.expect("second");

        assert_eq!(first.summary.critical_count, 1);
        assert_eq!(second.alerts.len(), 1);
        assert_eq!(second.alerts[0].severity, AlertSeverity::Critical);
        assert_eq!(store.list_live_alerts(&project_id).await.expect("alerts").len(), 1);
        assert_eq!(store.alert_row_count(), 1);
        assert_eq!(notifier.events_of_kind(NotificationKind::BudgetAlert).len(), 1);
    }

    #[tokio::test]
    async fn severity_change_replaces_live_alert_and_renotifies() {
        let store = kitchen();
        spend(&store, "p1", "cat-materials", 4_600, PurchaseStatus::Approved);
        let notifier = InMemoryNotifier::default();
        let engine = engine(&store, &notifier);
        let project_id = ProjectId("prj-kitchen".to_owned());

        engine.evaluate(&project_id, "req-1").await.expect("critical");
        spend(&store, "p2", "cat-materials", 600, PurchaseStatus::Paid);
        let report = engine.evaluate(&project_id, "req-2").await.expect("exceeded");

        assert_eq!(report.summary.exceeded_count, 1);
        let live = store.list_live_alerts(&project_id).await.expect("alerts");
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].severity, AlertSeverity::Exceeded);
        assert_eq!(notifier.events_of_kind(NotificationKind::BudgetAlert).len(), 2);
    }

    #[tokio::test]
    async fn dropping_below_threshold_clears_alert() {
        let store = kitchen();
        spend(&store, "p1", "cat-materials", 4_500, PurchaseStatus::Approved);
        let engine = engine(&store, &InMemoryNotifier::default());
        let project_id = ProjectId("prj-kitchen".to_owned());

        engine.evaluate(&project_id, "req-1").await.expect("warning");
        assert_eq!(store.list_live_alerts(&project_id).await.expect("alerts").len(), 1);

        store.insert_category(category("cat-materials", "Materials", 10_000));
        let report = engine.evaluate(&project_id, "req-2").await.expect("clear");

        assert!(report.alerts.is_empty());
        assert!(store.list_live_alerts(&project_id).await.expect("alerts").is_empty());
    }

    #[tokio::test]
    async fn warning_is_stored_but_not_notified() {
        let store = kitchen();
        spend(&store, "p1", "cat-materials", 4_400, PurchaseStatus::Approved);
        let notifier = InMemoryNotifier::default();
        let audit = InMemoryAuditSink::default();
        let engine = engine(&store, &notifier).with_audit_sink(Arc::new(audit.clone()));

        let report = engine.evaluate(&ProjectId("prj-kitchen".to_owned()), "req-1").await.expect("warning");

        assert_eq!(report.summary.warning_count, 1);
        assert!(notifier.events().is_empty());
        assert_eq!(audit.events_of_type("budget.alert_raised").len(), 1);
    }

    #[tokio::test]
    async fn unreadable_category_is_reported_without_hiding_others() {
        let store = kitchen();
        store.insert_category(category("cat-labour", "Labour", 8_000));
        spend(&store, "p1", "cat-materials", 5_200, PurchaseStatus::Approved);
        store.fail_purchase_reads(&CategoryId("cat-labour".to_owned()));
        let engine = engine(&store, &InMemoryNotifier::default());

        let report = engine.evaluate(&ProjectId("prj-kitchen".to_owned()), "req-1").await.expect("partial");

        assert!(report.is_partial());
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].category_id, CategoryId("cat-labour".to_owned()));
        assert_eq!(report.summary.exceeded_count, 1);
    }

    #[tokio::test]
    async fn spent_cache_is_reconciled_from_purchases() {
        let store = kitchen();
        spend(&store, "p1", "cat-materials", 1_000, PurchaseStatus::Approved);
        spend(&store, "p2", "cat-materials", 300, PurchaseStatus::Pending);
        let engine = engine(&store, &InMemoryNotifier::default());

        engine.evaluate(&ProjectId("prj-kitchen".to_owned()), "req-1").await.expect("evaluate");

        let cached = store.category(&CategoryId("cat-materials".to_owned())).expect("category");
        assert_eq!(cached.spent_amount, Decimal::from(1_000));
    }

    #[tokio::test]
    async fn notifier_failure_keeps_alert_and_reports_dispatch_failure() {
        let store = kitchen();
        spend(&store, "p1", "cat-materials", 5_000, PurchaseStatus::Approved);
        let notifier = InMemoryNotifier::default();
        notifier.fail_with(NotificationError::Transport("connection refused".to_owned()));
        let engine = engine(&store, &notifier);
        let project_id = ProjectId("prj-kitchen".to_owned());

        let report = engine.evaluate(&project_id, "req-1").await.expect("evaluate");

        assert_eq!(report.summary.exceeded_count, 1);
        assert_eq!(report.dispatch_failures.len(), 1);
        assert_eq!(store.list_live_alerts(&project_id).await.expect("alerts").len(), 1);
    }

    #[tokio::test]
    async fn failed_alert_delivery_is_retried_on_next_evaluation() {
        let store = kitchen();
        spend(&store, "p1", "cat-materials", 4_800, PurchaseStatus::Approved);
        let notifier = InMemoryNotifier::default();
        notifier.fail_with(NotificationError::Transport("connection refused".to_owned()));
        let engine = engine(&store, &notifier);
        let project_id = ProjectId("prj-kitchen".to_owned());

        let first = engine.evaluate(&project_id, "req-1").await.expect("first");
        assert_eq!(first.dispatch_failures.len(), 1);

        notifier.recover();
        let second = engine.evaluate(&project_id, "req-2").await.expect("second");
        assert!(second.dispatch_failures.is_empty());
        assert_eq!(notifier.events_of_kind(NotificationKind::BudgetAlert).len(), 1);

        engine.evaluate(&project_id, "req-3").await.expect("third");
        assert_eq!(notifier.events_of_kind(NotificationKind::BudgetAlert).len(), 1);
        assert_eq!(store.alert_row_count(), 1);
    }

    #[tokio::test]
    async fn unknown_project_is_not_found() {
        let engine = engine(&InMemoryStore::default(), &InMemoryNotifier::default());

        let error = engine.evaluate(&ProjectId("prj-missing".to_owned()), "req-1").await.expect_err("missing");
        assert!(matches!(error, ApplicationError::Domain(DomainError::NotFound { .. })));
    }

    #[tokio::test]
    async fn sweep_covers_only_active_projects() {
        let store = kitchen();
        store.insert_project(project("prj-archived", ProjectStatus::Completed));
        spend(&store, "p1", "cat-materials", 4_800, PurchaseStatus::Approved);
        let engine = engine(&store, &InMemoryNotifier::default());

        let sweep = engine.evaluate_active("req-1").await.expect("sweep");

        assert_eq!(sweep.reports.len(), 1);
        assert_eq!(sweep.reports[0].project_id, ProjectId("prj-kitchen".to_owned()));
        assert!(sweep.failures.is_empty());
        assert_eq!(sweep.summary().critical_count, 1);
    }
}
