//! Persistence contracts the engines are written against.
//!
//! Row-level authorization is enforced upstream of these traits; implementations only
//! guarantee the atomicity and compare-and-swap semantics documented on each method.

pub mod memory;

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::domain::alert::{AlertChange, AlertSeverity, BudgetAlert};
use crate::domain::approval::PurchaseApproval;
use crate::domain::category::{BudgetCategory, CategoryId};
use crate::domain::project::{Project, ProjectId};
use crate::domain::purchase::{Purchase, PurchaseId, PurchaseStatus, StatusUpdate};
use crate::domain::rule::ApprovalRule;

pub use memory::InMemoryStore;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("{entity} `{id}` was not found")]
    NotFound { entity: &'static str, id: String },
    #[error("purchase `{}` status changed concurrently (now {current:?})", .purchase_id.0)]
    Conflict { purchase_id: PurchaseId, current: PurchaseStatus },
    #[error(
        "purchase `{}` decision history changed concurrently (expected {expected} decisions, found {found})",
        .purchase_id.0
    )]
    HistoryChanged { purchase_id: PurchaseId, expected: usize, found: usize },
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("decode error: {0}")]
    Decode(String),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { entity, id: id.into() }
    }
}

/// One active category of a project as loaded for evaluation.
///
/// Loads are reported per category so one unreadable row does not poison the rest of a
/// project evaluation.
#[derive(Clone, Debug, PartialEq)]
pub enum CategoryLoad {
    Loaded { category: BudgetCategory, purchases: Vec<Purchase> },
    /// The category row or its purchases could not be read.
    Unreadable { category_id: CategoryId, category_name: String, error: StoreError },
}

impl CategoryLoad {
    pub fn unreadable(category: &BudgetCategory, error: StoreError) -> Self {
        Self::Unreadable {
            category_id: category.id.clone(),
            category_name: category.name.clone(),
            error,
        }
    }

    pub fn category_id(&self) -> &CategoryId {
        match self {
            Self::Loaded { category, .. } => &category.id,
            Self::Unreadable { category_id, .. } => category_id,
        }
    }
}

#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn get_project(&self, id: &ProjectId) -> Result<Project, StoreError>;

    async fn list_active_projects(&self) -> Result<Vec<Project>, StoreError>;

    async fn get_category(&self, id: &CategoryId) -> Result<BudgetCategory, StoreError>;

    /// Inserts the project and all of its categories, or nothing.
    async fn create_project(
        &self,
        project: &Project,
        categories: &[BudgetCategory],
    ) -> Result<(), StoreError>;
}

#[async_trait]
pub trait PurchaseStore: Send + Sync {
    async fn get_purchase(&self, id: &PurchaseId) -> Result<Purchase, StoreError>;

    /// Active rules for the project, project-wide and category-scoped alike.
    async fn get_approval_rules(
        &self,
        project_id: &ProjectId,
    ) -> Result<Vec<ApprovalRule>, StoreError>;

    /// Decision history, oldest first.
    async fn list_approvals(
        &self,
        purchase_id: &PurchaseId,
    ) -> Result<Vec<PurchaseApproval>, StoreError>;

    /// Applies `update` only while the purchase is still in `expected`; otherwise
    /// returns [`StoreError::Conflict`] carrying the status actually found.
    async fn update_purchase_status(
        &self,
        id: &PurchaseId,
        update: &StatusUpdate,
        expected: PurchaseStatus,
    ) -> Result<(), StoreError>;

    async fn insert_approval(&self, approval: &PurchaseApproval) -> Result<(), StoreError>;

    /// Conditional status update plus approval insert as one unit: both land or neither does.
    ///
    /// `prior_decisions` is the history length the decision was planned against. When
    /// another decision was recorded in the meantime the write is refused with
    /// [`StoreError::HistoryChanged`], even if the status itself did not move.
    async fn commit_decision(
        &self,
        id: &PurchaseId,
        update: &StatusUpdate,
        expected: PurchaseStatus,
        prior_decisions: usize,
        approval: &PurchaseApproval,
    ) -> Result<(), StoreError>;
}

#[async_trait]
pub trait BudgetStore: Send + Sync {
    async fn get_categories_with_purchases(
        &self,
        project_id: &ProjectId,
    ) -> Result<Vec<CategoryLoad>, StoreError>;

    /// Keyed by (category, severity). Makes `alert` the single live alert for its category.
    ///
    /// A tier change resets the notified mark; refreshing the live tier keeps it.
    async fn upsert_alert(&self, alert: &BudgetAlert) -> Result<AlertChange, StoreError>;

    /// Records that the live alert of this tier needs no further delivery.
    async fn mark_alert_notified(
        &self,
        category_id: &CategoryId,
        severity: AlertSeverity,
    ) -> Result<(), StoreError>;

    /// Clears every live alert for the category, returning how many were cleared.
    async fn clear_alerts(&self, category_id: &CategoryId) -> Result<usize, StoreError>;

    async fn list_live_alerts(&self, project_id: &ProjectId)
        -> Result<Vec<BudgetAlert>, StoreError>;

    /// Overwrites the cached `spent_amount` with a recomputed value.
    async fn refresh_spent_amount(
        &self,
        category_id: &CategoryId,
        spent: Decimal,
    ) -> Result<(), StoreError>;
}
