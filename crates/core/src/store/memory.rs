use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::domain::alert::{AlertChange, AlertSeverity, BudgetAlert};
use crate::domain::approval::PurchaseApproval;
use crate::domain::category::{BudgetCategory, CategoryId};
use crate::domain::project::{Project, ProjectId, ProjectStatus};
use crate::domain::purchase::{Purchase, PurchaseId, PurchaseStatus, StatusUpdate};
use crate::domain::rule::ApprovalRule;

use super::{BudgetStore, CategoryLoad, ProjectStore, PurchaseStore, StoreError};

#[derive(Clone, Debug)]
struct StoredAlert {
    alert: BudgetAlert,
    live: bool,
    notified: bool,
}

#[derive(Debug, Default)]
struct State {
    projects: BTreeMap<String, Project>,
    categories: BTreeMap<String, BudgetCategory>,
    purchases: BTreeMap<String, Purchase>,
    rules: Vec<ApprovalRule>,
    approvals: Vec<PurchaseApproval>,
    alerts: BTreeMap<(String, AlertSeverity), StoredAlert>,
    unreadable_categories: BTreeSet<String>,
}

/// Process-local store used by tests and dry runs. All writes happen under one lock, so
/// conditional updates are atomic with respect to each other.
#[derive(Clone, Debug, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryStore {
    fn read(&self) -> RwLockReadGuard<'_, State> {
        match self.state.read() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        match self.state.write() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn insert_project(&self, project: Project) {
        self.write().projects.insert(project.id.0.clone(), project);
    }

    pub fn insert_category(&self, category: BudgetCategory) {
        self.write().categories.insert(category.id.0.clone(), category);
    }

    pub fn insert_purchase(&self, purchase: Purchase) {
        self.write().purchases.insert(purchase.id.0.clone(), purchase);
    }

    pub fn insert_rule(&self, rule: ApprovalRule) {
        self.write().rules.push(rule);
    }

    /// Makes purchase loads for the category fail, as an unreadable row would.
    pub fn fail_purchase_reads(&self, category_id: &CategoryId) {
        self.write().unreadable_categories.insert(category_id.0.clone());
    }

    pub fn purchase(&self, id: &PurchaseId) -> Option<Purchase> {
        self.read().purchases.get(&id.0).cloned()
    }

    pub fn category(&self, id: &CategoryId) -> Option<BudgetCategory> {
        self.read().categories.get(&id.0).cloned()
    }

    pub fn approvals_for(&self, purchase_id: &PurchaseId) -> Vec<PurchaseApproval> {
        self.read()
            .approvals
            .iter()
            .filter(|approval| &approval.purchase_id == purchase_id)
            .cloned()
            .collect()
    }

    /// Every stored alert row, live or cleared.
    pub fn alert_row_count(&self) -> usize {
        self.read().alerts.len()
    }
}

fn apply_conditional(
    state: &mut State,
    id: &PurchaseId,
    update: &StatusUpdate,
    expected: PurchaseStatus,
) -> Result<(), StoreError> {
    let purchase =
        state.purchases.get_mut(&id.0).ok_or_else(|| StoreError::not_found("purchase", &id.0))?;
    if purchase.status != expected {
        return Err(StoreError::Conflict { purchase_id: id.clone(), current: purchase.status });
    }
    purchase.apply(update).map_err(|error| StoreError::Backend(error.to_string()))
}

#[async_trait]
impl ProjectStore for InMemoryStore {
    async fn get_project(&self, id: &ProjectId) -> Result<Project, StoreError> {
        self.read().projects.get(&id.0).cloned().ok_or_else(|| StoreError::not_found("project", &id.0))
    }

    async fn list_active_projects(&self) -> Result<Vec<Project>, StoreError> {
        Ok(self
            .read()
            .projects
            .values()
            .filter(|project| project.status == ProjectStatus::Active)
            .cloned()
            .collect())
    }

    async fn get_category(&self, id: &CategoryId) -> Result<BudgetCategory, StoreError> {
        self.read()
            .categories
            .get(&id.0)
            .cloned()
            .ok_or_else(|| StoreError::not_found("budget category", &id.0))
    }

    async fn create_project(
        &self,
        project: &Project,
        categories: &[BudgetCategory],
    ) -> Result<(), StoreError> {
        let mut state = self.write();
        if state.projects.contains_key(&project.id.0) {
            return Err(StoreError::Backend(format!("project `{}` already exists", project.id.0)));
        }
        if let Some(existing) =
            categories.iter().find(|category| state.categories.contains_key(&category.id.0))
        {
            return Err(StoreError::Backend(format!(
                "budget category `{}` already exists",
                existing.id.0
            )));
        }

        state.projects.insert(project.id.0.clone(), project.clone());
        for category in categories {
            state.categories.insert(category.id.0.clone(), category.clone());
        }
        Ok(())
    }
}

#[async_trait]
impl PurchaseStore for InMemoryStore {
    async fn get_purchase(&self, id: &PurchaseId) -> Result<Purchase, StoreError> {
        self.read().purchases.get(&id.0).cloned().ok_or_else(|| StoreError::not_found("purchase", &id.0))
    }

    async fn get_approval_rules(
        &self,
        project_id: &ProjectId,
    ) -> Result<Vec<ApprovalRule>, StoreError> {
        Ok(self
            .read()
            .rules
            .iter()
            .filter(|rule| rule.is_active && &rule.project_id == project_id)
            .cloned()
            .collect())
    }

    async fn list_approvals(
        &self,
        purchase_id: &PurchaseId,
    ) -> Result<Vec<PurchaseApproval>, StoreError> {
        Ok(self.approvals_for(purchase_id))
    }

    async fn update_purchase_status(
        &self,
        id: &PurchaseId,
        update: &StatusUpdate,
        expected: PurchaseStatus,
    ) -> Result<(), StoreError> {
        apply_conditional(&mut self.write(), id, update, expected)
    }

    async fn insert_approval(&self, approval: &PurchaseApproval) -> Result<(), StoreError> {
        let mut state = self.write();
        if !state.purchases.contains_key(&approval.purchase_id.0) {
            return Err(StoreError::not_found("purchase", &approval.purchase_id.0));
        }
        state.approvals.push(approval.clone());
        Ok(())
    }

    async fn commit_decision(
        &self,
        id: &PurchaseId,
        update: &StatusUpdate,
        expected: PurchaseStatus,
        prior_decisions: usize,
        approval: &PurchaseApproval,
    ) -> Result<(), StoreError> {
        let mut state = self.write();
        let recorded = state.approvals.iter().filter(|existing| &existing.purchase_id == id).count();
        if recorded != prior_decisions {
            if let Some(purchase) = state.purchases.get(&id.0) {
                if purchase.status != expected {
                    return Err(StoreError::Conflict { purchase_id: id.clone(), current: purchase.status });
                }
            }
            return Err(StoreError::HistoryChanged {
                purchase_id: id.clone(),
                expected: prior_decisions,
                found: recorded,
            });
        }
        apply_conditional(&mut state, id, update, expected)?;
        state.approvals.push(approval.clone());
        Ok(())
    }
}

#[async_trait]
impl BudgetStore for InMemoryStore {
    async fn get_categories_with_purchases(
        &self,
        project_id: &ProjectId,
    ) -> Result<Vec<CategoryLoad>, StoreError> {
        let state = self.read();
        if !state.projects.contains_key(&project_id.0) {
            return Err(StoreError::not_found("project", &project_id.0));
        }

        Ok(state
            .categories
            .values()
            .filter(|category| category.is_active && &category.project_id == project_id)
            .map(|category| {
                if state.unreadable_categories.contains(&category.id.0) {
                    return CategoryLoad::unreadable(
                        category,
                        StoreError::Decode(format!(
                            "purchases for category `{}` could not be read",
                            category.id.0
                        )),
                    );
                }
                let purchases = state
                    .purchases
                    .values()
                    .filter(|purchase| purchase.category_id == category.id)
                    .cloned()
                    .collect();
                CategoryLoad::Loaded { category: category.clone(), purchases }
            })
            .collect())
    }

    async fn upsert_alert(&self, alert: &BudgetAlert) -> Result<AlertChange, StoreError> {
        let mut state = self.write();
        let category_key = alert.category_id.0.clone();

        let mut previous = None;
        let mut notified = false;
        for severity in AlertSeverity::ALL {
            if let Some(stored) = state.alerts.get_mut(&(category_key.clone(), severity)) {
                if stored.live {
                    previous = Some(severity);
                    notified = stored.notified;
                }
                stored.live = false;
            }
        }

        let change = match previous {
            None => AlertChange::Raised,
            Some(previous) if previous == alert.severity && notified => AlertChange::Unchanged,
            Some(previous) if previous == alert.severity => AlertChange::Unnotified,
            Some(previous) => AlertChange::Changed { previous },
        };
        state.alerts.insert(
            (category_key, alert.severity),
            StoredAlert { alert: alert.clone(), live: true, notified: change == AlertChange::Unchanged },
        );
        Ok(change)
    }

    async fn mark_alert_notified(
        &self,
        category_id: &CategoryId,
        severity: AlertSeverity,
    ) -> Result<(), StoreError> {
        match self.write().alerts.get_mut(&(category_id.0.clone(), severity)) {
            Some(stored) if stored.live => {
                stored.notified = true;
                Ok(())
            }
            _ => Err(StoreError::not_found("budget alert", &category_id.0)),
        }
    }

    async fn clear_alerts(&self, category_id: &CategoryId) -> Result<usize, StoreError> {
        let mut state = self.write();
        let mut cleared = 0;
        for severity in AlertSeverity::ALL {
            if let Some(stored) = state.alerts.get_mut(&(category_id.0.clone(), severity)) {
                if stored.live {
                    stored.live = false;
                    cleared += 1;
                }
            }
        }
        Ok(cleared)
    }

    async fn list_live_alerts(
        &self,
        project_id: &ProjectId,
    ) -> Result<Vec<BudgetAlert>, StoreError> {
        Ok(self
            .read()
            .alerts
            .values()
            .filter(|stored| stored.live && &stored.alert.project_id == project_id)
            .map(|stored| stored.alert.clone())
            .collect())
    }

    async fn refresh_spent_amount(
        &self,
        category_id: &CategoryId,
        spent: Decimal,
    ) -> Result<(), StoreError> {
        let mut state = self.write();
        let category = state
            .categories
            .get_mut(&category_id.0)
            .ok_or_else(|| StoreError::not_found("budget category", &category_id.0))?;
        category.spent_amount = spent;
        Ok(())
    }
}
