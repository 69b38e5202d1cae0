use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::UserId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProjectId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Planning,
    Active,
    OnHold,
    Completed,
    Cancelled,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planning => "planning",
            Self::Active => "active",
            Self::OnHold => "on_hold",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "planning" => Some(Self::Planning),
            "active" => Some(Self::Active),
            "on_hold" => Some(Self::OnHold),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    pub description: Option<String>,
    pub total_budget: Decimal,
    pub owner_id: UserId,
    pub status: ProjectStatus,
    /// `None` leaves auto-approval to the rules alone; `Some(0)` disables it for the project.
    pub auto_approval_ceiling: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    pub fn settings(&self) -> ProjectSettings {
        ProjectSettings { auto_approval_ceiling: self.auto_approval_ceiling }
    }
}

/// Project-level knobs the approval resolver consults alongside the rules.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSettings {
    pub auto_approval_ceiling: Option<Decimal>,
}

impl ProjectSettings {
    /// Caps a rule's auto-approval threshold by the project ceiling.
    pub fn effective_auto_approve_below(&self, rule_threshold: Decimal) -> Decimal {
        match self.auto_approval_ceiling {
            Some(ceiling) => rule_threshold.min(ceiling),
            None => rule_threshold,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewCategory {
    pub name: String,
    pub description: Option<String>,
    pub budgeted_amount: Decimal,
    pub alert_threshold: Option<Decimal>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewProject {
    pub name: String,
    pub description: Option<String>,
    pub total_budget: Decimal,
    pub owner_id: UserId,
    pub auto_approval_ceiling: Option<Decimal>,
    pub categories: Vec<NewCategory>,
}

impl NewProject {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("project name is required"));
        }
        if self.total_budget <= Decimal::ZERO {
            return Err(DomainError::validation("project total budget must be positive"));
        }
        if self.owner_id.0.trim().is_empty() {
            return Err(DomainError::validation("project owner is required"));
        }
        if matches!(self.auto_approval_ceiling, Some(ceiling) if ceiling < Decimal::ZERO) {
            return Err(DomainError::validation("auto-approval ceiling cannot be negative"));
        }
        if self.categories.is_empty() {
            return Err(DomainError::validation("at least one budget category is required"));
        }

        for category in &self.categories {
            if category.name.trim().is_empty() {
                return Err(DomainError::validation("budget category name is required"));
            }
            if category.budgeted_amount < Decimal::ZERO {
                return Err(DomainError::validation(format!(
                    "budget category `{}` cannot have a negative budget",
                    category.name
                )));
            }
            if let Some(threshold) = category.alert_threshold {
                if threshold < Decimal::ZERO || threshold > Decimal::ONE_HUNDRED {
                    return Err(DomainError::validation(format!(
                        "alert threshold for `{}` must be within 0..=100",
                        category.name
                    )));
                }
            }
        }

        Ok(())
    }
}
