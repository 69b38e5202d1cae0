pub mod approvals;
pub mod audit;
pub mod budget;
pub mod config;
pub mod domain;
pub mod engine;
pub mod errors;
pub mod notify;
pub mod store;

pub use approvals::{
    plan_decision, ApprovalResolver, ApprovalRoute, DecisionOutcome, DecisionPlan,
    DecisionRequest, ResolutionResult,
};
pub use audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink};
pub use budget::{AlertReport, AlertSummary, AlertThresholds, BudgetAlertEvaluator, CategoryFailure};
pub use domain::alert::{AlertChange, AlertSeverity, BudgetAlert};
pub use domain::approval::{ApprovalAction, ApprovalId, PurchaseApproval};
pub use domain::category::{BudgetCategory, CategoryId};
pub use domain::project::{NewCategory, NewProject, Project, ProjectId, ProjectSettings, ProjectStatus};
pub use domain::purchase::{Purchase, PurchaseId, PurchasePriority, PurchaseStatus, StatusUpdate};
pub use domain::rule::{ApprovalRule, ApprovalRuleId};
pub use domain::UserId;
pub use engine::{ApprovalEngine, BudgetAlertEngine, ProjectEngine, SweepReport};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use notify::{
    DeliveryReceipt, DispatchFailure, NotificationError, NotificationEvent, NotificationKind,
    Notifier,
};
pub use store::{BudgetStore, CategoryLoad, InMemoryStore, ProjectStore, PurchaseStore, StoreError};
