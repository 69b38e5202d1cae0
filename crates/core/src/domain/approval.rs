use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::purchase::PurchaseId;
use crate::domain::UserId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApprovalId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalAction {
    Approved,
    Rejected,
}

impl ApprovalAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "approved" | "approve" => Some(Self::Approved),
            "rejected" | "reject" => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// Append-only audit row for one approval decision.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseApproval {
    pub id: ApprovalId,
    pub purchase_id: PurchaseId,
    /// `None` marks a system decision.
    pub approver_id: Option<UserId>,
    pub action: ApprovalAction,
    pub comments: Option<String>,
    pub created_at: DateTime<Utc>,
}
