//! Budget utilisation classification. Pure functions over a category and its purchases;
//! persistence and notification live in [`crate::engine::budget`].

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::alert::{AlertSeverity, BudgetAlert};
use crate::domain::category::{BudgetCategory, CategoryId, DEFAULT_ALERT_THRESHOLD_PCT};
use crate::domain::project::ProjectId;
use crate::domain::purchase::Purchase;
use crate::errors::DomainError;
use crate::notify::DispatchFailure;

pub const DEFAULT_CRITICAL_THRESHOLD_PCT: i64 = 90;
const EXCEEDED_PCT: i64 = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertThresholds {
    /// Used for categories created without their own warning threshold.
    pub default_warning_pct: Decimal,
    pub critical_pct: Decimal,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            default_warning_pct: Decimal::from(DEFAULT_ALERT_THRESHOLD_PCT),
            critical_pct: Decimal::from(DEFAULT_CRITICAL_THRESHOLD_PCT),
        }
    }
}

impl AlertThresholds {
    pub fn validate(&self) -> Result<(), DomainError> {
        let hundred = Decimal::from(EXCEEDED_PCT);
        if self.default_warning_pct <= Decimal::ZERO
            || self.default_warning_pct > self.critical_pct
            || self.critical_pct >= hundred
        {
            return Err(DomainError::validation(format!(
                "alert thresholds must satisfy 0 < warning ({}) <= critical ({}) < 100",
                self.default_warning_pct, self.critical_pct
            )));
        }
        Ok(())
    }
}

/// Spend and classification for one category.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utilization {
    pub spent: Decimal,
    /// `None` when there is spend against a zero budget.
    pub percentage: Option<Decimal>,
    pub severity: Option<AlertSeverity>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryFailure {
    pub category_id: CategoryId,
    pub category_name: String,
    pub reason: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertSummary {
    pub warning_count: usize,
    pub critical_count: usize,
    pub exceeded_count: usize,
}

impl AlertSummary {
    pub fn from_alerts(alerts: &[BudgetAlert]) -> Self {
        alerts.iter().fold(Self::default(), |mut summary, alert| {
            match alert.severity {
                AlertSeverity::Warning => summary.warning_count += 1,
                AlertSeverity::Critical => summary.critical_count += 1,
                AlertSeverity::Exceeded => summary.exceeded_count += 1,
            }
            summary
        })
    }

    pub fn total(&self) -> usize {
        self.warning_count + self.critical_count + self.exceeded_count
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlertReport {
    pub project_id: ProjectId,
    pub alerts: Vec<BudgetAlert>,
    pub summary: AlertSummary,
    /// Categories skipped because their spend could not be recomputed.
    pub failures: Vec<CategoryFailure>,
    pub dispatch_failures: Vec<DispatchFailure>,
    pub evaluated_at: DateTime<Utc>,
}

impl AlertReport {
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }
}

#[derive(Clone, Debug, Default)]
pub struct BudgetAlertEvaluator {
    thresholds: AlertThresholds,
}

impl BudgetAlertEvaluator {
    pub fn new(thresholds: AlertThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &AlertThresholds {
        &self.thresholds
    }

    /// Authoritative spend: approved and paid purchases only.
    pub fn compute_spent(&self, category_id: &CategoryId, purchases: &[Purchase]) -> Decimal {
        purchases
            .iter()
            .filter(|purchase| &purchase.category_id == category_id)
            .filter(|purchase| purchase.status.counts_toward_spend())
            .map(|purchase| purchase.amount)
            .sum()
    }

    pub fn classify(&self, category: &BudgetCategory, spent: Decimal) -> Utilization {
        if category.budgeted_amount <= Decimal::ZERO {
            if spent > Decimal::ZERO {
                return Utilization { spent, percentage: None, severity: Some(AlertSeverity::Exceeded) };
            }
            return Utilization { spent, percentage: Some(Decimal::ZERO), severity: None };
        }

        let percentage = spent / category.budgeted_amount * Decimal::from(EXCEEDED_PCT);
        let severity = if percentage >= Decimal::from(EXCEEDED_PCT) {
            Some(AlertSeverity::Exceeded)
        } else if percentage >= self.thresholds.critical_pct {
            Some(AlertSeverity::Critical)
        } else if percentage >= category.alert_threshold {
            Some(AlertSeverity::Warning)
        } else {
            None
        };

        Utilization { spent, percentage: Some(percentage), severity }
    }

    pub fn threshold_for(&self, category: &BudgetCategory, severity: AlertSeverity) -> Decimal {
        match severity {
            AlertSeverity::Warning => category.alert_threshold,
            AlertSeverity::Critical => self.thresholds.critical_pct,
            AlertSeverity::Exceeded => Decimal::from(EXCEEDED_PCT),
        }
    }

    /// Classifies one category, returning the alert it should carry, if any.
    pub fn evaluate_category(
        &self,
        category: &BudgetCategory,
        purchases: &[Purchase],
        at: DateTime<Utc>,
    ) -> (Utilization, Option<BudgetAlert>) {
        let spent = self.compute_spent(&category.id, purchases);
        let utilization = self.classify(category, spent);
        let alert = utilization.severity.map(|severity| BudgetAlert {
            category_id: category.id.clone(),
            category_name: category.name.clone(),
            project_id: category.project_id.clone(),
            severity,
            current_percentage: utilization.percentage.map(|value| value.round_dp(2)),
            threshold_percentage: self.threshold_for(category, severity),
            budgeted_amount: category.budgeted_amount,
            spent_amount: spent,
            message: alert_message(category, severity, spent, utilization.percentage),
            evaluated_at: at,
        });
        (utilization, alert)
    }
}

fn alert_message(
    category: &BudgetCategory,
    severity: AlertSeverity,
    spent: Decimal,
    percentage: Option<Decimal>,
) -> String {
    let Some(percentage) = percentage else {
        return format!(
            "{} has spent {} against a zero budget",
            category.name,
            spent.round_dp(2)
        );
    };
    let percentage = percentage.round_dp(1);
    match severity {
        AlertSeverity::Exceeded => format!(
            "{} is over budget: {} spent of {} ({}%)",
            category.name,
            spent.round_dp(2),
            category.budgeted_amount.round_dp(2),
            percentage
        ),
        AlertSeverity::Critical => format!(
            "{} is at {}% of its {} budget",
            category.name,
            percentage,
            category.budgeted_amount.round_dp(2)
        ),
        AlertSeverity::Warning => format!(
            "{} has passed its {}% warning threshold ({}% used)",
            category.name,
            category.alert_threshold.round_dp(1),
            percentage
        ),
    }
}
