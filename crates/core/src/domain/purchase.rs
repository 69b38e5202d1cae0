use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::category::CategoryId;
use crate::domain::project::ProjectId;
use crate::domain::UserId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PurchaseId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseStatus {
    Pending,
    Approved,
    Rejected,
    Paid,
}

impl PurchaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Paid => "paid",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" | "pending_approval" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "paid" => Some(Self::Paid),
            _ => None,
        }
    }

    /// Approved and paid purchases both draw down the category budget.
    pub fn counts_toward_spend(&self) -> bool {
        matches!(self, Self::Approved | Self::Paid)
    }

    pub fn can_transition_to(&self, next: PurchaseStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Pending)
                | (Self::Pending, Self::Approved)
                | (Self::Pending, Self::Rejected)
                | (Self::Approved, Self::Paid)
        )
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchasePriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl PurchasePriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "normal" => Some(Self::Normal),
            "high" => Some(Self::High),
            "urgent" => Some(Self::Urgent),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Purchase {
    pub id: PurchaseId,
    pub project_id: ProjectId,
    pub category_id: CategoryId,
    pub description: String,
    pub supplier: Option<String>,
    pub amount: Decimal,
    pub purchase_date: NaiveDate,
    pub requested_by: UserId,
    pub status: PurchaseStatus,
    pub approved_by: Option<UserId>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub priority: PurchasePriority,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Purchase {
    pub fn is_pending(&self) -> bool {
        self.status == PurchaseStatus::Pending
    }

    pub fn validate_amount(&self) -> Result<(), DomainError> {
        if self.amount <= Decimal::ZERO {
            return Err(DomainError::validation(format!(
                "purchase `{}` amount must be positive, got {}",
                self.id.0, self.amount
            )));
        }
        Ok(())
    }

    /// Applies a status change after checking the lifecycle allows it.
    pub fn apply(&mut self, update: &StatusUpdate) -> Result<(), DomainError> {
        if !self.status.can_transition_to(update.status) {
            return Err(DomainError::InvalidPurchaseTransition {
                from: self.status,
                to: update.status,
            });
        }

        self.status = update.status;
        if update.status != PurchaseStatus::Paid {
            self.approved_by = update.approved_by.clone();
            self.approved_at = update.approved_at;
            self.rejection_reason = update.rejection_reason.clone();
        }
        self.updated_at = update.updated_at;
        Ok(())
    }
}

/// Conditional write applied to a purchase; stores compare the current status before applying it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub status: PurchaseStatus,
    pub approved_by: Option<UserId>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl StatusUpdate {
    pub fn approved(approved_by: Option<UserId>, at: DateTime<Utc>) -> Self {
        Self {
            status: PurchaseStatus::Approved,
            approved_by,
            approved_at: Some(at),
            rejection_reason: None,
            updated_at: at,
        }
    }

    pub fn rejected(reason: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            status: PurchaseStatus::Rejected,
            approved_by: None,
            approved_at: None,
            rejection_reason: Some(reason.into()),
            updated_at: at,
        }
    }

    pub fn still_pending(at: DateTime<Utc>) -> Self {
        Self {
            status: PurchaseStatus::Pending,
            approved_by: None,
            approved_at: None,
            rejection_reason: None,
            updated_at: at,
        }
    }

    pub fn paid(at: DateTime<Utc>) -> Self {
        Self {
            status: PurchaseStatus::Paid,
            approved_by: None,
            approved_at: None,
            rejection_reason: None,
            updated_at: at,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};
    use rust_decimal::Decimal;

    use super::{Purchase, PurchaseId, PurchasePriority, PurchaseStatus, StatusUpdate};
    use crate::domain::category::CategoryId;
    use crate::domain::project::ProjectId;
    use crate::domain::UserId;
    use crate::errors::DomainError;

    fn purchase(status: PurchaseStatus) -> Purchase {
        let now = Utc::now();
        Purchase {
            id: PurchaseId("pur-1".to_string()),
            project_id: ProjectId("prj-1".to_string()),
            category_id: CategoryId("cat-1".to_string()),
            description: "Tiles".to_string(),
            supplier: None,
            amount: Decimal::new(120, 0),
            purchase_date: NaiveDate::from_ymd_opt(2026, 3, 1).expect("valid date"),
            requested_by: UserId("u-req".to_string()),
            status,
            approved_by: None,
            approved_at: None,
            rejection_reason: None,
            priority: PurchasePriority::Normal,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn approved_purchase_can_be_paid_and_keeps_approver() {
        let mut purchase = purchase(PurchaseStatus::Pending);
        purchase
            .apply(&StatusUpdate::approved(Some(UserId("u-mgr".to_string())), Utc::now()))
            .expect("pending -> approved");
        purchase.apply(&StatusUpdate::paid(Utc::now())).expect("approved -> paid");

        assert_eq!(purchase.status, PurchaseStatus::Paid);
        assert_eq!(purchase.approved_by, Some(UserId("u-mgr".to_string())));
        assert!(purchase.approved_at.is_some());
    }

    #[test]
    fn resolved_purchase_never_returns_to_pending() {
        let mut purchase = purchase(PurchaseStatus::Rejected);
        let error = purchase
            .apply(&StatusUpdate::still_pending(Utc::now()))
            .expect_err("rejected -> pending should fail");

        assert_eq!(
            error,
            DomainError::InvalidPurchaseTransition {
                from: PurchaseStatus::Rejected,
                to: PurchaseStatus::Pending,
            }
        );
    }

    #[test]
    fn non_positive_amount_is_rejected() {
        let mut purchase = purchase(PurchaseStatus::Pending);
        purchase.amount = Decimal::ZERO;

        assert!(matches!(purchase.validate_amount(), Err(DomainError::Validation(_))));
    }

    #[test]
    fn legacy_pending_approval_status_reads_as_pending() {
        assert_eq!(PurchaseStatus::parse("pending_approval"), Some(PurchaseStatus::Pending));
        assert!(PurchaseStatus::Paid.counts_toward_spend());
        assert!(!PurchaseStatus::Rejected.counts_toward_spend());
    }
}
