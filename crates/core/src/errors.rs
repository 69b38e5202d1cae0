use thiserror::Error;

use crate::domain::purchase::PurchaseStatus;
use crate::notify::NotificationError;
use crate::store::StoreError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid purchase transition from {from:?} to {to:?}")]
    InvalidPurchaseTransition { from: PurchaseStatus, to: PurchaseStatus },
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("{entity} `{id}` was not found")]
    NotFound { entity: &'static str, id: String },
    #[error("purchase `{purchase_id}` is already resolved with status {status:?}")]
    AlreadyResolved { purchase_id: String, status: PurchaseStatus },
    #[error("approver `{approver_id}` is out of sequence; `{expected}` must approve first")]
    OutOfSequence { approver_id: String, expected: String },
    #[error("purchase `{purchase_id}` received another decision concurrently; review it again")]
    ConcurrentDecision { purchase_id: String },
}

impl DomainError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { entity, id: id.into() }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("integration failure: {0}")]
    Integration(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

impl From<StoreError> for ApplicationError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound { entity, id } => Self::Domain(DomainError::NotFound { entity, id }),
            StoreError::Conflict { purchase_id, current } => {
                Self::Domain(DomainError::AlreadyResolved { purchase_id: purchase_id.0, status: current })
            }
            StoreError::HistoryChanged { purchase_id, .. } => {
                Self::Domain(DomainError::ConcurrentDecision { purchase_id: purchase_id.0 })
            }
            StoreError::Backend(message) | StoreError::Decode(message) => Self::Persistence(message),
        }
    }
}

impl From<NotificationError> for ApplicationError {
    fn from(value: NotificationError) -> Self {
        Self::Integration(value.to_string())
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::NotFound { .. } => "The requested record does not exist.",
            Self::Conflict { .. } => {
                "The purchase has already moved on. Refresh and review its current status."
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn error_class(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => "validation",
            Self::NotFound { .. } => "not_found",
            Self::Conflict { .. } => "conflict",
            Self::ServiceUnavailable { .. } => "unavailable",
            Self::Internal { .. } => "internal",
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::Conflict { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let unassigned = || "unassigned".to_owned();
        match value {
            ApplicationError::Domain(error @ DomainError::Validation(_)) => {
                Self::BadRequest { message: error.to_string(), correlation_id: unassigned() }
            }
            ApplicationError::Domain(error @ DomainError::NotFound { .. }) => {
                Self::NotFound { message: error.to_string(), correlation_id: unassigned() }
            }
            ApplicationError::Domain(
                error @ (DomainError::AlreadyResolved { .. }
                | DomainError::OutOfSequence { .. }
                | DomainError::ConcurrentDecision { .. }
                | DomainError::InvalidPurchaseTransition { .. }),
            ) => Self::Conflict { message: error.to_string(), correlation_id: unassigned() },
            ApplicationError::Persistence(message) | ApplicationError::Integration(message) => {
                Self::ServiceUnavailable { message, correlation_id: unassigned() }
            }
            ApplicationError::Configuration(message) => {
                Self::Internal { message, correlation_id: unassigned() }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::purchase::{PurchaseId, PurchaseStatus};
    use crate::errors::{ApplicationError, DomainError, InterfaceError};
    use crate::store::StoreError;

    #[test]
    fn validation_error_maps_to_bad_request_interface_error() {
        let interface =
            ApplicationError::from(DomainError::validation("amount must be positive"))
                .into_interface("req-1");

        assert!(matches!(
            interface,
            InterfaceError::BadRequest {
                ref correlation_id,
                ..
            } if correlation_id == "req-1"
        ));
        assert_eq!(
            interface.user_message(),
            "The request could not be processed. Check inputs and try again."
        );
    }

    #[test]
    fn store_conflict_surfaces_as_already_resolved() {
        let error = ApplicationError::from(StoreError::Conflict {
            purchase_id: PurchaseId("pur-1".to_owned()),
            current: PurchaseStatus::Approved,
        });

        assert_eq!(
            error,
            ApplicationError::Domain(DomainError::AlreadyResolved {
                purchase_id: "pur-1".to_owned(),
                status: PurchaseStatus::Approved,
            })
        );
        assert_eq!(error.into_interface("req-2").error_class(), "conflict");
    }

    #[test]
    fn changed_decision_history_maps_to_conflict() {
        let error = ApplicationError::from(StoreError::HistoryChanged {
            purchase_id: PurchaseId("pur-1".to_owned()),
            expected: 0,
            found: 1,
        });

        assert_eq!(
            error,
            ApplicationError::Domain(DomainError::ConcurrentDecision { purchase_id: "pur-1".to_owned() })
        );
        assert_eq!(error.into_interface("req-6").error_class(), "conflict");
    }

    #[test]
    fn out_of_sequence_maps_to_conflict() {
        let interface = ApplicationError::from(DomainError::OutOfSequence {
            approver_id: "u-b".to_owned(),
            expected: "u-a".to_owned(),
        })
        .into_interface("req-3");

        assert!(matches!(interface, InterfaceError::Conflict { .. }));
    }

    #[test]
    fn store_not_found_maps_to_not_found() {
        let interface =
            ApplicationError::from(StoreError::not_found("purchase", "pur-missing"))
                .into_interface("req-4");

        assert!(matches!(interface, InterfaceError::NotFound { ref message, .. }
            if message.contains("pur-missing")));
    }

    #[test]
    fn persistence_error_maps_to_service_unavailable() {
        let interface = ApplicationError::Persistence("database lock timeout".to_owned())
            .into_interface("req-5");

        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
        assert_eq!(
            interface.user_message(),
            "The service is temporarily unavailable. Please retry shortly."
        );
    }
}
