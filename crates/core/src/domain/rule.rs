use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::category::CategoryId;
use crate::domain::project::ProjectId;
use crate::domain::UserId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ApprovalRuleId(pub String);

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRule {
    pub id: ApprovalRuleId,
    pub project_id: ProjectId,
    /// `None` applies project-wide.
    pub category_id: Option<CategoryId>,
    pub min_amount: Decimal,
    /// `None` is unbounded.
    pub max_amount: Option<Decimal>,
    pub approver_ids: Vec<UserId>,
    pub requires_sequential: bool,
    pub auto_approve_below: Decimal,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl ApprovalRule {
    /// Inclusive on both bounds.
    pub fn covers(&self, amount: Decimal) -> bool {
        amount >= self.min_amount && self.max_amount.map_or(true, |max| amount <= max)
    }

    pub fn applies_to_category(&self, category_id: &CategoryId) -> bool {
        self.category_id.as_ref().map_or(true, |scoped| scoped == category_id)
    }

    pub fn is_category_scoped(&self) -> bool {
        self.category_id.is_some()
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if self.min_amount < Decimal::ZERO {
            return Err(DomainError::validation(format!(
                "approval rule `{}` has a negative minimum amount",
                self.id.0
            )));
        }
        if let Some(max) = self.max_amount {
            if max < self.min_amount {
                return Err(DomainError::validation(format!(
                    "approval rule `{}` has max amount {max} below min amount {}",
                    self.id.0, self.min_amount
                )));
            }
        }
        if self.auto_approve_below < Decimal::ZERO {
            return Err(DomainError::validation(format!(
                "approval rule `{}` has a negative auto-approval threshold",
                self.id.0
            )));
        }
        Ok(())
    }
}
