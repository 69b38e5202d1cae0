use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::approvals::{
    auto_approval_record, plan_decision, ApprovalResolver, ApprovalRoute, DecisionOutcome,
    DecisionRequest, ResolutionResult,
};
use crate::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink, TracingAuditSink};
use crate::domain::approval::ApprovalAction;
use crate::domain::category::BudgetCategory;
use crate::domain::project::Project;
use crate::domain::purchase::{Purchase, PurchaseId, PurchaseStatus, StatusUpdate};
use crate::domain::UserId;
use crate::errors::{ApplicationError, DomainError};
use crate::notify::{DispatchFailure, NotificationEvent, NotificationKind, Notifier};
use crate::store::{ProjectStore, PurchaseStore, StoreError};

use super::dispatch;

const SYSTEM_ACTOR: &str = "system";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResolveReport {
    pub purchase_id: PurchaseId,
    pub result: ResolutionResult,
    pub dispatch_failures: Vec<DispatchFailure>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DecisionReport {
    pub purchase_id: PurchaseId,
    pub status: PurchaseStatus,
    pub outcome: DecisionOutcome,
    pub dispatch_failures: Vec<DispatchFailure>,
}

pub struct ApprovalEngine<S, N> {
    store: S,
    notifier: N,
    resolver: ApprovalResolver,
    audit: Arc<dyn AuditSink>,
}

impl<S, N> ApprovalEngine<S, N>
where
    S: ProjectStore + PurchaseStore,
    N: Notifier,
{
    pub fn new(store: S, notifier: N) -> Self {
        Self { store, notifier, resolver: ApprovalResolver::new(), audit: Arc::new(TracingAuditSink) }
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    /// Resolves a newly submitted purchase: auto-approves it when its governing rule
    /// allows, otherwise leaves it pending and asks the required approvers.
    ///
    /// Safe to call more than once for the same purchase. The auto-approval write is
    /// conditional on the purchase still being pending, so a duplicate call reports
    /// [`ResolutionResult::AlreadyResolved`] instead of writing a second approval.
    pub async fn resolve(
        &self,
        purchase_id: &PurchaseId,
        correlation_id: &str,
    ) -> Result<ResolveReport, ApplicationError> {
        let purchase = self.store.get_purchase(purchase_id).await?;
        if !purchase.is_pending() {
            return Ok(already_resolved(purchase_id, purchase.status));
        }
        purchase.validate_amount()?;

        let (project, category) = self.load_context(&purchase).await?;
        let rules = self.store.get_approval_rules(&project.id).await?;
        let result = self.resolver.resolve(&purchase, &project.settings(), &rules)?;

        let mut dispatch_failures = Vec::new();
        match &result {
            ResolutionResult::AutoApproved { rule_id, threshold } => {
                let (update, approval) = auto_approval_record(&purchase, Utc::now());
                match self
                    .store
                    .commit_decision(purchase_id, &update, PurchaseStatus::Pending, 0, &approval)
                    .await
                {
                    Ok(()) => {}
                    Err(StoreError::Conflict { current, .. }) => {
                        info!(
                            event_name = "approval.resolve_conflict",
                            correlation_id,
                            purchase_id = %purchase_id.0,
                            current_status = current.as_str(),
                            "purchase resolved concurrently; auto-approval skipped"
                        );
                        return Ok(already_resolved(purchase_id, current));
                    }
                    Err(error) => return Err(error.into()),
                }

                info!(
                    event_name = "approval.auto_approved",
                    correlation_id,
                    purchase_id = %purchase_id.0,
                    project_id = %project.id.0,
                    rule_id = %rule_id.0,
                    amount = %purchase.amount,
                    threshold = %threshold,
                    "purchase auto-approved"
                );
                self.audit.emit(
                    AuditEvent::new(
                        correlation_id,
                        "approval.auto_approved",
                        AuditCategory::Approval,
                        SYSTEM_ACTOR,
                        AuditOutcome::Success,
                    )
                    .for_project(&project.id)
                    .for_purchase(purchase_id)
                    .with_metadata("rule_id", rule_id.0.clone())
                    .with_metadata("threshold", threshold.to_string()),
                );

                let payload = purchase_payload(&purchase, &project, &category, json!({
                    "approved_by": SYSTEM_ACTOR,
                    "auto_approved": true,
                }));
                let event = NotificationEvent::new(
                    NotificationKind::PurchaseApproved,
                    purchase.requested_by.clone(),
                    payload,
                    correlation_id,
                );
                dispatch_failures.extend(dispatch(&self.notifier, event, &purchase_id.0).await);
            }
            ResolutionResult::RequiresApproval { rule_id, required_approvers, sequential } => {
                info!(
                    event_name = "approval.routed",
                    correlation_id,
                    purchase_id = %purchase_id.0,
                    project_id = %project.id.0,
                    rule_id = %rule_id.0,
                    approver_count = required_approvers.len(),
                    sequential = *sequential,
                    "purchase routed to approvers"
                );
                self.audit.emit(
                    AuditEvent::new(
                        correlation_id,
                        "approval.routed",
                        AuditCategory::Approval,
                        SYSTEM_ACTOR,
                        AuditOutcome::Success,
                    )
                    .for_project(&project.id)
                    .for_purchase(purchase_id)
                    .with_metadata("rule_id", rule_id.0.clone())
                    .with_metadata("sequential", sequential.to_string()),
                );

                // Sequential chains only hear from the first approver until it is their turn.
                let recipients: &[UserId] = if *sequential {
                    required_approvers.get(..1).unwrap_or_default()
                } else {
                    required_approvers
                };
                for approver in recipients {
                    let payload = purchase_payload(&purchase, &project, &category, json!({
                        "sequential": sequential,
                        "manual_review": false,
                    }));
                    let event = NotificationEvent::new(
                        NotificationKind::ApprovalRequested,
                        approver.clone(),
                        payload,
                        correlation_id,
                    );
                    dispatch_failures.extend(dispatch(&self.notifier, event, &purchase_id.0).await);
                }
            }
            ResolutionResult::NoApplicableRule => {
                warn!(
                    event_name = "approval.routed",
                    correlation_id,
                    purchase_id = %purchase_id.0,
                    project_id = %project.id.0,
                    reason = result.reason(),
                    "no approval rule matched; purchase held for manual review"
                );
                self.audit.emit(
                    AuditEvent::new(
                        correlation_id,
                        "approval.manual_review",
                        AuditCategory::Approval,
                        SYSTEM_ACTOR,
                        AuditOutcome::Success,
                    )
                    .for_project(&project.id)
                    .for_purchase(purchase_id),
                );

                let payload = purchase_payload(&purchase, &project, &category, json!({
                    "sequential": false,
                    "manual_review": true,
                }));
                let event = NotificationEvent::new(
                    NotificationKind::ApprovalRequested,
                    project.owner_id.clone(),
                    payload,
                    correlation_id,
                );
                dispatch_failures.extend(dispatch(&self.notifier, event, &purchase_id.0).await);
            }
            ResolutionResult::AlreadyResolved { .. } => {}
        }

        Ok(ResolveReport { purchase_id: purchase_id.clone(), result, dispatch_failures })
    }

    /// Records a human approval or rejection.
    pub async fn decide(
        &self,
        purchase_id: &PurchaseId,
        approver_id: &UserId,
        action: ApprovalAction,
        comments: Option<&str>,
        correlation_id: &str,
    ) -> Result<DecisionReport, ApplicationError> {
        let purchase = self.store.get_purchase(purchase_id).await?;
        if !purchase.is_pending() {
            return Err(DomainError::AlreadyResolved {
                purchase_id: purchase_id.0.clone(),
                status: purchase.status,
            }
            .into());
        }

        let (project, category) = self.load_context(&purchase).await?;
        let rules = self.store.get_approval_rules(&project.id).await?;
        let route = self.resolver.route(&purchase, &rules);
        let history = self.store.list_approvals(purchase_id).await?;

        let plan = match plan_decision(DecisionRequest {
            purchase: &purchase,
            route: &route,
            history: &history,
            approver_id,
            action,
            comments,
            at: Utc::now(),
        }) {
            Ok(plan) => plan,
            Err(error) => {
                self.audit_rejected_decision(&purchase, approver_id, &error, correlation_id);
                return Err(error.into());
            }
        };

        // Planned against `history`; a decision landing in between forces a fresh review.
        self.store
            .commit_decision(
                purchase_id,
                &plan.update,
                PurchaseStatus::Pending,
                history.len(),
                &plan.approval,
            )
            .await?;

        info!(
            event_name = "approval.decision_recorded",
            correlation_id,
            purchase_id = %purchase_id.0,
            project_id = %project.id.0,
            approver_id = %approver_id.0,
            action = action.as_str(),
            status = plan.update.status.as_str(),
            "approval decision recorded"
        );
        self.audit.emit(
            AuditEvent::new(
                correlation_id,
                "approval.decision_recorded",
                AuditCategory::Approval,
                approver_id.0.clone(),
                AuditOutcome::Success,
            )
            .for_project(&project.id)
            .for_purchase(purchase_id)
            .with_metadata("action", action.as_str())
            .with_metadata("status", plan.update.status.as_str()),
        );

        let dispatch_failures =
            self.notify_decision(&purchase, &project, &category, &route, &plan.outcome, approver_id, correlation_id)
                .await;

        Ok(DecisionReport {
            purchase_id: purchase_id.clone(),
            status: plan.update.status,
            outcome: plan.outcome,
            dispatch_failures,
        })
    }

    /// Moves an approved purchase to paid.
    pub async fn mark_paid(
        &self,
        purchase_id: &PurchaseId,
        correlation_id: &str,
    ) -> Result<Purchase, ApplicationError> {
        let purchase = self.store.get_purchase(purchase_id).await?;
        if !purchase.status.can_transition_to(PurchaseStatus::Paid) {
            return Err(DomainError::InvalidPurchaseTransition {
                from: purchase.status,
                to: PurchaseStatus::Paid,
            }
            .into());
        }

        let update = StatusUpdate::paid(Utc::now());
        match self.store.update_purchase_status(purchase_id, &update, PurchaseStatus::Approved).await {
            Ok(()) => {}
            Err(StoreError::Conflict { current, .. }) => {
                return Err(DomainError::InvalidPurchaseTransition {
                    from: current,
                    to: PurchaseStatus::Paid,
                }
                .into());
            }
            Err(error) => return Err(error.into()),
        }

        info!(
            event_name = "approval.marked_paid",
            correlation_id,
            purchase_id = %purchase_id.0,
            "purchase marked paid"
        );
        Ok(self.store.get_purchase(purchase_id).await?)
    }

    async fn load_context(
        &self,
        purchase: &Purchase,
    ) -> Result<(Project, BudgetCategory), ApplicationError> {
        let category = self.store.get_category(&purchase.category_id).await?;
        if !category.belongs_to(&purchase.project_id) {
            return Err(DomainError::validation(format!(
                "budget category `{}` does not belong to project `{}`",
                category.id.0, purchase.project_id.0
            ))
            .into());
        }
        if !category.is_active {
            return Err(DomainError::validation(format!(
                "budget category `{}` is inactive",
                category.id.0
            ))
            .into());
        }
        let project = self.store.get_project(&purchase.project_id).await?;
        Ok((project, category))
    }

    fn audit_rejected_decision(
        &self,
        purchase: &Purchase,
        approver_id: &UserId,
        error: &DomainError,
        correlation_id: &str,
    ) {
        warn!(
            event_name = "approval.decision_refused",
            correlation_id,
            purchase_id = %purchase.id.0,
            approver_id = %approver_id.0,
            error = %error,
            "approval decision refused"
        );
        self.audit.emit(
            AuditEvent::new(
                correlation_id,
                "approval.decision_refused",
                AuditCategory::Approval,
                approver_id.0.clone(),
                AuditOutcome::Rejected,
            )
            .for_project(&purchase.project_id)
            .for_purchase(&purchase.id)
            .with_metadata("error", error.to_string()),
        );
    }

    #[allow(clippy::too_many_arguments)]
    async fn notify_decision(
        &self,
        purchase: &Purchase,
        project: &Project,
        category: &BudgetCategory,
        route: &ApprovalRoute,
        outcome: &DecisionOutcome,
        approver_id: &UserId,
        correlation_id: &str,
    ) -> Vec<DispatchFailure> {
        let (kind, recipient, extra) = match outcome {
            DecisionOutcome::Approved => (
                NotificationKind::PurchaseApproved,
                purchase.requested_by.clone(),
                json!({ "approved_by": approver_id.0, "auto_approved": false }),
            ),
            DecisionOutcome::Rejected { reason } => (
                NotificationKind::PurchaseRejected,
                purchase.requested_by.clone(),
                json!({ "rejected_by": approver_id.0, "rejection_reason": reason }),
            ),
            DecisionOutcome::AwaitingApprovers { remaining } => {
                // Unordered approvers were all asked at resolve time.
                let Some(next) = remaining.first().filter(|_| route.sequential) else {
                    return Vec::new();
                };
                (
                    NotificationKind::ApprovalRequested,
                    next.clone(),
                    json!({ "sequential": true, "manual_review": false, "previous_approver": approver_id.0 }),
                )
            }
        };

        let payload = purchase_payload(purchase, project, category, extra);
        let event = NotificationEvent::new(kind, recipient, payload, correlation_id);
        dispatch(&self.notifier, event, &purchase.id.0).await.into_iter().collect()
    }
}

fn already_resolved(purchase_id: &PurchaseId, status: PurchaseStatus) -> ResolveReport {
    ResolveReport {
        purchase_id: purchase_id.clone(),
        result: ResolutionResult::AlreadyResolved { status },
        dispatch_failures: Vec::new(),
    }
}

fn purchase_payload(
    purchase: &Purchase,
    project: &Project,
    category: &BudgetCategory,
    extra: serde_json::Value,
) -> serde_json::Value {
    let mut payload = json!({
        "purchase_id": purchase.id.0,
        "project_id": project.id.0,
        "project_name": project.name,
        "category_name": category.name,
        "description": purchase.description,
        "supplier": purchase.supplier,
        "amount": purchase.amount.to_string(),
        "priority": purchase.priority.as_str(),
        "requested_by": purchase.requested_by.0,
        "purchase_date": purchase.purchase_date.to_string(),
    });
    if let (Some(target), serde_json::Value::Object(extra)) = (payload.as_object_mut(), extra) {
        target.extend(extra);
    }
    payload
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::{NaiveDate, Utc};
    use rust_decimal::Decimal;

    use super::ApprovalEngine;
    use crate::approvals::{DecisionOutcome, ResolutionResult};
    use crate::audit::InMemoryAuditSink;
    use crate::domain::approval::{ApprovalAction, ApprovalId, PurchaseApproval};
    use crate::domain::category::{BudgetCategory, CategoryId};
    use crate::domain::project::{Project, ProjectId, ProjectStatus};
    use crate::domain::purchase::{
        Purchase, PurchaseId, PurchasePriority, PurchaseStatus, StatusUpdate,
    };
    use crate::domain::rule::{ApprovalRule, ApprovalRuleId};
    use crate::domain::UserId;
    use crate::errors::{ApplicationError, DomainError};
    use crate::notify::{InMemoryNotifier, NotificationError, NotificationKind};
    use crate::store::{InMemoryStore, ProjectStore, PurchaseStore, StoreError};

    /// What lands on the purchase after the engine has read it but before it commits.
    #[derive(Clone)]
    enum Interleaved {
        ApprovedBy(UserId),
        PartialApprovalBy(UserId),
    }

    /// Wraps the in-memory store and slips one competing decision in front of the
    /// first `commit_decision`.
    #[derive(Clone)]
    struct InterleavingStore {
        inner: InMemoryStore,
        interleaved: Interleaved,
        fired: Arc<AtomicBool>,
    }

    impl InterleavingStore {
        fn new(inner: InMemoryStore, interleaved: Interleaved) -> Self {
            Self { inner, interleaved, fired: Arc::new(AtomicBool::new(false)) }
        }

        async fn interleave(&self, id: &PurchaseId) {
            if self.fired.swap(true, Ordering::SeqCst) {
                return;
            }
            let (approver, update) = match &self.interleaved {
                Interleaved::ApprovedBy(user) => {
                    (user.clone(), StatusUpdate::approved(Some(user.clone()), Utc::now()))
                }
                Interleaved::PartialApprovalBy(user) => {
                    (user.clone(), StatusUpdate::still_pending(Utc::now()))
                }
            };
            let competing = PurchaseApproval {
                id: ApprovalId(format!("apr-competing-{}", approver.0)),
                purchase_id: id.clone(),
                approver_id: Some(approver),
                action: ApprovalAction::Approved,
                comments: None,
                created_at: Utc::now(),
            };
            self.inner
                .commit_decision(id, &update, PurchaseStatus::Pending, 0, &competing)
                .await
                .expect("competing decision lands");
        }
    }

    #[async_trait]
    impl ProjectStore for InterleavingStore {
        async fn get_project(&self, id: &ProjectId) -> Result<Project, StoreError> {
            self.inner.get_project(id).await
        }

        async fn list_active_projects(&self) -> Result<Vec<Project>, StoreError> {
            self.inner.list_active_projects().await
        }

        async fn get_category(&self, id: &CategoryId) -> Result<BudgetCategory, StoreError> {
            self.inner.get_category(id).await
        }

        async fn create_project(
            &self,
            project: &Project,
            categories: &[BudgetCategory],
        ) -> Result<(), StoreError> {
            self.inner.create_project(project, categories).await
        }
    }

    #[async_trait]
    impl PurchaseStore for InterleavingStore {
        async fn get_purchase(&self, id: &PurchaseId) -> Result<Purchase, StoreError> {
            self.inner.get_purchase(id).await
        }

        async fn get_approval_rules(
            &self,
            project_id: &ProjectId,
        ) -> Result<Vec<ApprovalRule>, StoreError> {
            self.inner.get_approval_rules(project_id).await
        }

        async fn list_approvals(
            &self,
            purchase_id: &PurchaseId,
        ) -> Result<Vec<PurchaseApproval>, StoreError> {
            self.inner.list_approvals(purchase_id).await
        }

        async fn update_purchase_status(
            &self,
            id: &PurchaseId,
            update: &StatusUpdate,
            expected: PurchaseStatus,
        ) -> Result<(), StoreError> {
            self.inner.update_purchase_status(id, update, expected).await
        }

        async fn insert_approval(&self, approval: &PurchaseApproval) -> Result<(), StoreError> {
            self.inner.insert_approval(approval).await
        }

        async fn commit_decision(
            &self,
            id: &PurchaseId,
            update: &StatusUpdate,
            expected: PurchaseStatus,
            prior_decisions: usize,
            approval: &PurchaseApproval,
        ) -> Result<(), StoreError> {
            self.interleave(id).await;
            self.inner.commit_decision(id, update, expected, prior_decisions, approval).await
        }
    }

    fn user(id: &str) -> UserId {
        UserId(id.to_owned())
    }

    fn seeded_store() -> InMemoryStore {
        let store = InMemoryStore::default();
        let now = Utc::now();
        store.insert_project(Project {
            id: ProjectId("prj-kitchen".to_owned()),
            name: "Kitchen Remodel".to_owned(),
            description: None,
            total_budget: Decimal::from(20_000),
            owner_id: user("u-owner"),
            status: ProjectStatus::Active,
            auto_approval_ceiling: None,
            created_at: now,
            updated_at: now,
        });
        store.insert_category(BudgetCategory {
            id: CategoryId("cat-materials".to_owned()),
            project_id: ProjectId("prj-kitchen".to_owned()),
            name: "Materials".to_owned(),
            description: None,
            budgeted_amount: Decimal::from(5_000),
            spent_amount: Decimal::ZERO,
            alert_threshold: Decimal::from(80),
            is_active: true,
            created_at: now,
            updated_at: now,
        });
        store
    }

    fn purchase(id: &str, amount: i64) -> Purchase {
        let now = Utc::now();
        Purchase {
            id: PurchaseId(id.to_owned()),
            project_id: ProjectId("prj-kitchen".to_owned()),
            category_id: CategoryId("cat-materials".to_owned()),
            description: "Cabinet hardware".to_owned(),
            supplier: None,
            amount: Decimal::from(amount),
            purchase_date: NaiveDate::from_ymd_opt(2026, 4, 2).expect("valid date"),
            requested_by: user("u-requester"),
            status: PurchaseStatus::Pending,
            approved_by: None,
            approved_at: None,
            rejection_reason: None,
            priority: PurchasePriority::Normal,
            created_at: now,
            updated_at: now,
        }
    }

    fn rule(approvers: &[&str], sequential: bool, auto_below: i64) -> ApprovalRule {
        ApprovalRule {
            id: ApprovalRuleId("rule-1".to_owned()),
            project_id: ProjectId("prj-kitchen".to_owned()),
            category_id: None,
            min_amount: Decimal::ZERO,
            max_amount: Some(Decimal::from(10_000)),
            approver_ids: approvers.iter().map(|id| user(id)).collect(),
            requires_sequential: sequential,
            auto_approve_below: Decimal::from(auto_below),
            is_active: true,
            created_at: Utc::now(),
        }
    }

    fn engine(
        store: &InMemoryStore,
        notifier: &InMemoryNotifier,
        audit: &InMemoryAuditSink,
    ) -> ApprovalEngine<InMemoryStore, InMemoryNotifier> {
        ApprovalEngine::new(store.clone(), notifier.clone()).with_audit_sink(Arc::new(audit.clone()))
    }

    #[tokio::test]
    async fn auto_approval_writes_status_and_one_system_record() {
        let store = seeded_store();
        store.insert_rule(rule(&["u-manager"], false, 500));
        store.insert_purchase(purchase("pur-1", 200));
        let notifier = InMemoryNotifier::default();
        let audit = InMemoryAuditSink::default();
        let engine = engine(&store, &notifier, &audit);

        let report = engine.resolve(&PurchaseId("pur-1".to_owned()), "req-1").await.expect("resolve");

        assert!(report.result.auto_approved());
        let stored = store.purchase(&PurchaseId("pur-1".to_owned())).expect("purchase");
        assert_eq!(stored.status, PurchaseStatus::Approved);
        assert_eq!(stored.approved_by, None);
        assert!(stored.approved_at.is_some());

        let approvals = store.approvals_for(&PurchaseId("pur-1".to_owned()));
        assert_eq!(approvals.len(), 1);
        assert_eq!(approvals[0].approver_id, None);
        assert_eq!(approvals[0].action, ApprovalAction::Approved);

        assert_eq!(notifier.events_of_kind(NotificationKind::PurchaseApproved).len(), 1);
        assert_eq!(audit.events_of_type("approval.auto_approved").len(), 1);
    }

    #[tokio::test]
    async fn repeated_resolve_is_a_no_op() {
        let store = seeded_store();
        store.insert_rule(rule(&["u-manager"], false, 500));
        store.insert_purchase(purchase("pur-1", 200));
        let notifier = InMemoryNotifier::default();
        let audit = InMemoryAuditSink::default();
        let engine = engine(&store, &notifier, &audit);
        let id = PurchaseId("pur-1".to_owned());

        let (first, second) = tokio::join!(engine.resolve(&id, "req-1"), engine.resolve(&id, "req-2"));
        let outcomes = [first.expect("first"), second.expect("second")];

        assert_eq!(outcomes.iter().filter(|report| report.result.auto_approved()).count(), 1);
        assert!(outcomes.iter().any(|report| report.result
            == ResolutionResult::AlreadyResolved { status: PurchaseStatus::Approved }));
        assert_eq!(store.approvals_for(&id).len(), 1);

        let third = engine.resolve(&id, "req-3").await.expect("third");
        assert_eq!(third.result, ResolutionResult::AlreadyResolved { status: PurchaseStatus::Approved });
        assert_eq!(store.approvals_for(&id).len(), 1);
    }

    #[tokio::test]
    async fn resolve_losing_the_status_race_reports_already_resolved() {
        let store = seeded_store();
        store.insert_rule(rule(&["u-manager"], false, 500));
        store.insert_purchase(purchase("pur-1", 200));
        let racing = InterleavingStore::new(store.clone(), Interleaved::ApprovedBy(user("u-manager")));
        let notifier = InMemoryNotifier::default();
        let audit = InMemoryAuditSink::default();
        let engine =
            ApprovalEngine::new(racing, notifier.clone()).with_audit_sink(Arc::new(audit.clone()));
        let id = PurchaseId("pur-1".to_owned());

        let report = engine.resolve(&id, "req-1").await.expect("resolve");

        assert_eq!(report.result, ResolutionResult::AlreadyResolved { status: PurchaseStatus::Approved });
        let approvals = store.approvals_for(&id);
        assert_eq!(approvals.len(), 1);
        assert_eq!(approvals[0].approver_id, Some(user("u-manager")));
        assert!(notifier.events_of_kind(NotificationKind::PurchaseApproved).is_empty());
        assert!(audit.events_of_type("approval.auto_approved").is_empty());
    }

    #[tokio::test]
    async fn concurrent_unordered_approvals_cannot_strand_the_purchase() {
        let store = seeded_store();
        store.insert_rule(rule(&["u-a", "u-b"], false, 0));
        store.insert_purchase(purchase("pur-1", 2_000));
        let racing = InterleavingStore::new(store.clone(), Interleaved::PartialApprovalBy(user("u-a")));
        let engine = ApprovalEngine::new(racing, InMemoryNotifier::default());
        let id = PurchaseId("pur-1".to_owned());

        // `u-b` planned against an empty history while `u-a` approved underneath it.
        let error = engine
            .decide(&id, &user("u-b"), ApprovalAction::Approved, None, "req-1")
            .await
            .expect_err("stale plan");
        assert!(matches!(error, ApplicationError::Domain(DomainError::ConcurrentDecision { .. })));
        assert_eq!(store.approvals_for(&id).len(), 1);
        assert_eq!(store.purchase(&id).map(|p| p.status), Some(PurchaseStatus::Pending));

        let retried = engine
            .decide(&id, &user("u-b"), ApprovalAction::Approved, None, "req-2")
            .await
            .expect("retry sees u-a and completes the set");
        assert_eq!(retried.status, PurchaseStatus::Approved);
        assert_eq!(retried.outcome, DecisionOutcome::Approved);
        assert_eq!(store.approvals_for(&id).len(), 2);
    }

    #[tokio::test]
    async fn routed_purchase_stays_pending_and_notifies_approvers() {
        let store = seeded_store();
        store.insert_rule(rule(&["u-manager", "u-director"], false, 500));
        store.insert_purchase(purchase("pur-1", 600));
        let notifier = InMemoryNotifier::default();
        let engine = engine(&store, &notifier, &InMemoryAuditSink::default());

        let report = engine.resolve(&PurchaseId("pur-1".to_owned()), "req-1").await.expect("resolve");

        assert_eq!(report.result.required_approvers(), &[user("u-manager"), user("u-director")]);
        let stored = store.purchase(&PurchaseId("pur-1".to_owned())).expect("purchase");
        assert_eq!(stored.status, PurchaseStatus::Pending);
        assert!(store.approvals_for(&stored.id).is_empty());

        let requests = notifier.events_of_kind(NotificationKind::ApprovalRequested);
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].payload["project_name"], "Kitchen Remodel");
        assert_eq!(requests[0].payload["category_name"], "Materials");
    }

    #[tokio::test]
    async fn no_rule_holds_purchase_for_owner_review() {
        let store = seeded_store();
        store.insert_purchase(purchase("pur-1", 50));
        let notifier = InMemoryNotifier::default();
        let engine = engine(&store, &notifier, &InMemoryAuditSink::default());

        let report = engine.resolve(&PurchaseId("pur-1".to_owned()), "req-1").await.expect("resolve");

        assert_eq!(report.result, ResolutionResult::NoApplicableRule);
        let requests = notifier.events_of_kind(NotificationKind::ApprovalRequested);
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].recipient, user("u-owner"));
        assert_eq!(requests[0].payload["manual_review"], true);
    }

    #[tokio::test]
    async fn category_from_another_project_fails_validation() {
        let store = seeded_store();
        let mut stray = purchase("pur-1", 50);
        stray.project_id = ProjectId("prj-other".to_owned());
        store.insert_purchase(stray);
        let engine = engine(&store, &InMemoryNotifier::default(), &InMemoryAuditSink::default());

        let error = engine.resolve(&PurchaseId("pur-1".to_owned()), "req-1").await.expect_err("mismatch");
        assert!(matches!(error, ApplicationError::Domain(DomainError::Validation(_))));
    }

    #[tokio::test]
    async fn missing_purchase_is_not_found() {
        let store = seeded_store();
        let engine = engine(&store, &InMemoryNotifier::default(), &InMemoryAuditSink::default());

        let error = engine.resolve(&PurchaseId("pur-404".to_owned()), "req-1").await.expect_err("missing");
        assert!(matches!(error, ApplicationError::Domain(DomainError::NotFound { .. })));
    }

    #[tokio::test]
    async fn sequential_chain_enforced_end_to_end() {
        let store = seeded_store();
        store.insert_rule(rule(&["u-a", "u-b"], true, 0));
        store.insert_purchase(purchase("pur-1", 2_000));
        let notifier = InMemoryNotifier::default();
        let audit = InMemoryAuditSink::default();
        let engine = engine(&store, &notifier, &audit);
        let id = PurchaseId("pur-1".to_owned());

        engine.resolve(&id, "req-0").await.expect("resolve");
        assert_eq!(notifier.events_of_kind(NotificationKind::ApprovalRequested).len(), 1);

        let error = engine
            .decide(&id, &user("u-b"), ApprovalAction::Approved, None, "req-1")
            .await
            .expect_err("b is not next");
        assert!(matches!(error, ApplicationError::Domain(DomainError::OutOfSequence { .. })));
        assert_eq!(store.purchase(&id).map(|p| p.status), Some(PurchaseStatus::Pending));
        assert_eq!(audit.events_of_type("approval.decision_refused").len(), 1);

        let first = engine
            .decide(&id, &user("u-a"), ApprovalAction::Approved, Some("looks right"), "req-2")
            .await
            .expect("a approves");
        assert_eq!(first.status, PurchaseStatus::Pending);
        assert_eq!(first.outcome, DecisionOutcome::AwaitingApprovers { remaining: vec![user("u-b")] });
        let requests = notifier.events_of_kind(NotificationKind::ApprovalRequested);
        assert_eq!(requests.last().map(|event| event.recipient.clone()), Some(user("u-b")));

        let second = engine
            .decide(&id, &user("u-b"), ApprovalAction::Approved, None, "req-3")
            .await
            .expect("b approves");
        assert_eq!(second.status, PurchaseStatus::Approved);
        assert_eq!(store.purchase(&id).and_then(|p| p.approved_by), Some(user("u-b")));
        assert_eq!(store.approvals_for(&id).len(), 2);
        assert_eq!(notifier.events_of_kind(NotificationKind::PurchaseApproved).len(), 1);

        let late = engine
            .decide(&id, &user("u-a"), ApprovalAction::Rejected, Some("too late"), "req-4")
            .await
            .expect_err("already approved");
        assert!(matches!(late, ApplicationError::Domain(DomainError::AlreadyResolved { .. })));
    }

    #[tokio::test]
    async fn rejection_mid_chain_is_immediate() {
        let store = seeded_store();
        store.insert_rule(rule(&["u-a", "u-b", "u-c"], true, 0));
        store.insert_purchase(purchase("pur-1", 2_000));
        let notifier = InMemoryNotifier::default();
        let engine = engine(&store, &notifier, &InMemoryAuditSink::default());
        let id = PurchaseId("pur-1".to_owned());

        engine.decide(&id, &user("u-a"), ApprovalAction::Approved, None, "req-1").await.expect("a");

        let missing_reason = engine
            .decide(&id, &user("u-c"), ApprovalAction::Rejected, Some(""), "req-2")
            .await
            .expect_err("reason required");
        assert!(matches!(missing_reason, ApplicationError::Domain(DomainError::Validation(_))));

        let report = engine
            .decide(&id, &user("u-c"), ApprovalAction::Rejected, Some("Over quoted"), "req-3")
            .await
            .expect("c rejects out of turn");
        assert_eq!(report.status, PurchaseStatus::Rejected);

        let stored = store.purchase(&id).expect("purchase");
        assert_eq!(stored.status, PurchaseStatus::Rejected);
        assert_eq!(stored.rejection_reason.as_deref(), Some("Over quoted"));
        let rejected = notifier.events_of_kind(NotificationKind::PurchaseRejected);
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].payload["rejection_reason"], "Over quoted");
    }

    #[tokio::test]
    async fn notification_failure_does_not_roll_back_approval() {
        let store = seeded_store();
        store.insert_rule(rule(&["u-manager"], false, 500));
        store.insert_purchase(purchase("pur-1", 100));
        let notifier = InMemoryNotifier::default();
        notifier.fail_with(NotificationError::Timeout(5));
        let engine = engine(&store, &notifier, &InMemoryAuditSink::default());

        let report = engine.resolve(&PurchaseId("pur-1".to_owned()), "req-1").await.expect("resolve");

        assert!(report.result.auto_approved());
        assert_eq!(report.dispatch_failures.len(), 1);
        assert_eq!(report.dispatch_failures[0].kind, NotificationKind::PurchaseApproved);
        assert_eq!(
            store.purchase(&PurchaseId("pur-1".to_owned())).map(|p| p.status),
            Some(PurchaseStatus::Approved)
        );
    }

    #[tokio::test]
    async fn mark_paid_requires_approved_purchase() {
        let store = seeded_store();
        store.insert_purchase(purchase("pur-1", 100));
        let engine = engine(&store, &InMemoryNotifier::default(), &InMemoryAuditSink::default());
        let id = PurchaseId("pur-1".to_owned());

        let error = engine.mark_paid(&id, "req-1").await.expect_err("pending cannot be paid");
        assert!(matches!(
            error,
            ApplicationError::Domain(DomainError::InvalidPurchaseTransition { from: PurchaseStatus::Pending, .. })
        ));

        engine.decide(&id, &user("u-owner"), ApprovalAction::Approved, None, "req-2").await.expect("approve");
        let paid = engine.mark_paid(&id, "req-3").await.expect("paid");
        assert_eq!(paid.status, PurchaseStatus::Paid);
        assert_eq!(paid.approved_by, Some(user("u-owner")));
    }
}
