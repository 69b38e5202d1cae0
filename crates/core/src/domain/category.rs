use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::project::ProjectId;

pub const DEFAULT_ALERT_THRESHOLD_PCT: i64 = 80;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CategoryId(pub String);

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BudgetCategory {
    pub id: CategoryId,
    pub project_id: ProjectId,
    pub name: String,
    pub description: Option<String>,
    pub budgeted_amount: Decimal,
    /// Cached aggregate; evaluation always recomputes it from purchases.
    pub spent_amount: Decimal,
    pub alert_threshold: Decimal,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BudgetCategory {
    pub fn belongs_to(&self, project_id: &ProjectId) -> bool {
        &self.project_id == project_id
    }
}
