//! Approval resolution: which rule governs a purchase, whether it auto-approves, and how a
//! human decision moves it along its approver chain.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::approval::{ApprovalAction, ApprovalId, PurchaseApproval};
use crate::domain::project::ProjectSettings;
use crate::domain::purchase::{Purchase, PurchaseStatus, StatusUpdate};
use crate::domain::rule::{ApprovalRule, ApprovalRuleId};
use crate::domain::UserId;
use crate::errors::DomainError;

pub const AUTO_APPROVAL_COMMENT: &str = "Auto-approved by system based on approval rules";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ResolutionResult {
    AutoApproved {
        rule_id: ApprovalRuleId,
        threshold: Decimal,
    },
    RequiresApproval {
        rule_id: ApprovalRuleId,
        required_approvers: Vec<UserId>,
        sequential: bool,
    },
    /// Manual review with no default approvers.
    NoApplicableRule,
    AlreadyResolved {
        status: PurchaseStatus,
    },
}

impl ResolutionResult {
    pub fn auto_approved(&self) -> bool {
        matches!(self, Self::AutoApproved { .. })
    }

    pub fn required_approvers(&self) -> &[UserId] {
        match self {
            Self::RequiresApproval { required_approvers, .. } => required_approvers,
            _ => &[],
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            Self::AutoApproved { .. } => "auto_approved",
            Self::RequiresApproval { .. } => "requires_approval",
            Self::NoApplicableRule => "no_rule",
            Self::AlreadyResolved { .. } => "already_resolved",
        }
    }
}

/// The approver chain a pending purchase must clear.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRoute {
    pub rule_id: Option<ApprovalRuleId>,
    pub required_approvers: Vec<UserId>,
    pub sequential: bool,
}

impl ApprovalRoute {
    pub fn from_rule(rule: Option<&ApprovalRule>) -> Self {
        match rule {
            Some(rule) => Self {
                rule_id: Some(rule.id.clone()),
                required_approvers: dedupe_preserving_order(&rule.approver_ids),
                sequential: rule.requires_sequential,
            },
            None => Self::default(),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ApprovalResolver;

impl ApprovalResolver {
    pub fn new() -> Self {
        Self
    }

    /// Picks the single most specific active rule covering the purchase amount.
    ///
    /// Category-scoped rules outrank project-wide ones; within a scope the highest
    /// `min_amount` wins; remaining ties go to the lowest rule id so the choice never
    /// depends on row order.
    pub fn select_rule<'a>(
        &self,
        purchase: &Purchase,
        rules: &'a [ApprovalRule],
    ) -> Option<&'a ApprovalRule> {
        rules
            .iter()
            .filter(|rule| rule.is_active && rule.project_id == purchase.project_id)
            .filter(|rule| rule.applies_to_category(&purchase.category_id))
            .filter(|rule| rule.covers(purchase.amount))
            .max_by(|left, right| {
                left.is_category_scoped()
                    .cmp(&right.is_category_scoped())
                    .then(left.min_amount.cmp(&right.min_amount))
                    .then(right.id.cmp(&left.id))
            })
    }

    pub fn resolve(
        &self,
        purchase: &Purchase,
        settings: &ProjectSettings,
        rules: &[ApprovalRule],
    ) -> Result<ResolutionResult, DomainError> {
        if !purchase.is_pending() {
            return Ok(ResolutionResult::AlreadyResolved { status: purchase.status });
        }
        purchase.validate_amount()?;

        let Some(rule) = self.select_rule(purchase, rules) else {
            return Ok(ResolutionResult::NoApplicableRule);
        };

        let threshold = settings.effective_auto_approve_below(rule.auto_approve_below);
        if threshold > Decimal::ZERO && purchase.amount <= threshold {
            return Ok(ResolutionResult::AutoApproved { rule_id: rule.id.clone(), threshold });
        }

        let route = ApprovalRoute::from_rule(Some(rule));
        Ok(ResolutionResult::RequiresApproval {
            rule_id: rule.id.clone(),
            required_approvers: route.required_approvers,
            sequential: route.sequential,
        })
    }

    pub fn route(&self, purchase: &Purchase, rules: &[ApprovalRule]) -> ApprovalRoute {
        ApprovalRoute::from_rule(self.select_rule(purchase, rules))
    }
}

/// The system approval written alongside an auto-approval status change.
pub fn auto_approval_record(purchase: &Purchase, at: DateTime<Utc>) -> (StatusUpdate, PurchaseApproval) {
    let update = StatusUpdate::approved(None, at);
    let approval = PurchaseApproval {
        id: ApprovalId(Uuid::new_v4().to_string()),
        purchase_id: purchase.id.clone(),
        approver_id: None,
        action: ApprovalAction::Approved,
        comments: Some(AUTO_APPROVAL_COMMENT.to_string()),
        created_at: at,
    };
    (update, approval)
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DecisionOutcome {
    Approved,
    AwaitingApprovers { remaining: Vec<UserId> },
    Rejected { reason: String },
}

/// The writes a decision produces, to be committed atomically.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecisionPlan {
    pub update: StatusUpdate,
    pub approval: PurchaseApproval,
    pub outcome: DecisionOutcome,
}

#[derive(Clone, Debug)]
pub struct DecisionRequest<'a> {
    pub purchase: &'a Purchase,
    pub route: &'a ApprovalRoute,
    pub history: &'a [PurchaseApproval],
    pub approver_id: &'a UserId,
    pub action: ApprovalAction,
    pub comments: Option<&'a str>,
    pub at: DateTime<Utc>,
}

/// Validates a human decision against the route and history and plans its writes.
pub fn plan_decision(request: DecisionRequest<'_>) -> Result<DecisionPlan, DomainError> {
    let DecisionRequest { purchase, route, history, approver_id, action, comments, at } = request;

    if !purchase.is_pending() {
        return Err(DomainError::AlreadyResolved {
            purchase_id: purchase.id.0.clone(),
            status: purchase.status,
        });
    }
    if approver_id.0.trim().is_empty() {
        return Err(DomainError::validation("approver id is required"));
    }

    let restricted = !route.required_approvers.is_empty();
    if restricted && !route.required_approvers.contains(approver_id) {
        return Err(DomainError::validation(format!(
            "`{}` is not a required approver for purchase `{}`",
            approver_id.0, purchase.id.0
        )));
    }

    let comments = comments.map(str::trim).filter(|value| !value.is_empty());
    let record = |comments: Option<&str>| PurchaseApproval {
        id: ApprovalId(Uuid::new_v4().to_string()),
        purchase_id: purchase.id.clone(),
        approver_id: Some(approver_id.clone()),
        action,
        comments: comments.map(str::to_string),
        created_at: at,
    };

    if action == ApprovalAction::Rejected {
        let Some(reason) = comments else {
            return Err(DomainError::validation("a rejection reason is required"));
        };
        return Ok(DecisionPlan {
            update: StatusUpdate::rejected(reason, at),
            approval: record(Some(reason)),
            outcome: DecisionOutcome::Rejected { reason: reason.to_string() },
        });
    }

    let approved_so_far: HashSet<&UserId> = history
        .iter()
        .filter(|entry| entry.action == ApprovalAction::Approved)
        .filter_map(|entry| entry.approver_id.as_ref())
        .collect();

    if approved_so_far.contains(approver_id) {
        return Err(DomainError::validation(format!(
            "`{}` has already approved purchase `{}`",
            approver_id.0, purchase.id.0
        )));
    }

    let outstanding: Vec<&UserId> = route
        .required_approvers
        .iter()
        .filter(|candidate| !approved_so_far.contains(candidate))
        .collect();

    if route.sequential {
        if let Some(next) = outstanding.first() {
            if *next != approver_id {
                return Err(DomainError::OutOfSequence {
                    approver_id: approver_id.0.clone(),
                    expected: next.0.clone(),
                });
            }
        }
    }

    let remaining: Vec<UserId> =
        outstanding.into_iter().filter(|candidate| *candidate != approver_id).cloned().collect();

    if remaining.is_empty() {
        Ok(DecisionPlan {
            update: StatusUpdate::approved(Some(approver_id.clone()), at),
            approval: record(comments),
            outcome: DecisionOutcome::Approved,
        })
    } else {
        Ok(DecisionPlan {
            update: StatusUpdate::still_pending(at),
            approval: record(comments),
            outcome: DecisionOutcome::AwaitingApprovers { remaining },
        })
    }
}

fn dedupe_preserving_order(ids: &[UserId]) -> Vec<UserId> {
    let mut seen = HashSet::new();
    ids.iter().filter(|id| seen.insert((*id).clone())).cloned().collect()
}
