use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::category::CategoryId;
use crate::domain::project::ProjectId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Warning,
    Critical,
    Exceeded,
}

impl AlertSeverity {
    pub const ALL: [AlertSeverity; 3] = [Self::Warning, Self::Critical, Self::Exceeded];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Warning => "warning",
            Self::Critical => "critical",
            Self::Exceeded => "exceeded",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "warning" => Some(Self::Warning),
            "critical" => Some(Self::Critical),
            "exceeded" | "over_budget" => Some(Self::Exceeded),
            _ => None,
        }
    }

    /// Warnings are informational; only these tiers go to the notifier.
    pub fn is_alert_worthy(&self) -> bool {
        matches!(self, Self::Critical | Self::Exceeded)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BudgetAlert {
    pub category_id: CategoryId,
    pub category_name: String,
    pub project_id: ProjectId,
    pub severity: AlertSeverity,
    /// `None` when spend lands on a zero budget.
    pub current_percentage: Option<Decimal>,
    pub threshold_percentage: Decimal,
    pub budgeted_amount: Decimal,
    pub spent_amount: Decimal,
    pub message: String,
    pub evaluated_at: DateTime<Utc>,
}

/// What an alert upsert did to the live alert for a category.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertChange {
    Raised,
    Changed { previous: AlertSeverity },
    /// Same tier as the live alert, which was never marked notified.
    Unnotified,
    Unchanged,
}

impl AlertChange {
    pub fn is_new_severity(&self) -> bool {
        matches!(self, Self::Raised | Self::Changed { .. })
    }

    pub fn needs_notification(&self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}
