use thiserror::Error;

use crate::domain::document_request::{DocumentRequestId, RequestStatus};

/// Failures of the grant workflow. Absence of access is not an error; see `check_access`.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AccessError {
    #[error("caller is not authenticated as a {expected}")]
    NotAuthenticated { expected: &'static str },
    #[error("{entity} `{id}` was not found")]
    NotFound { entity: &'static str, id: String },
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("request already decided (status {status:?})")]
    InvalidState { status: RequestStatus },
    #[error("access denied: {0}")]
    AccessDenied(String),
    #[error("download limit reached for document {document_index} of request {request_id}")]
    LimitExceeded { request_id: DocumentRequestId, document_index: u32 },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AccessError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { entity, id: id.into() }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::NotAuthenticated { .. } => "not_authenticated",
            Self::NotFound { .. } => "not_found",
            Self::Forbidden(_) => "forbidden",
            Self::Validation(_) => "validation_error",
            Self::InvalidState { .. } => "invalid_state",
            Self::AccessDenied(_) => "access_denied",
            Self::LimitExceeded { .. } => "limit_exceeded",
            Self::Store(_) => "persistence",
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("persistence failure: {0}")]
    Backend(String),
    #[error("stored record could not be decoded: {0}")]
    Decode(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("unauthorized: {message}")]
    Unauthorized { message: String, correlation_id: String },
    #[error("forbidden: {message}")]
    Forbidden { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("too many requests: {message}")]
    TooManyRequests { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::Unauthorized { .. } => "Please sign in to continue.",
            Self::Forbidden { .. } => "You do not have access to this resource.",
            Self::NotFound { .. } => "The requested resource does not exist.",
            Self::Conflict { .. } => "This request has already been decided.",
            Self::TooManyRequests { .. } => {
                "The download limit for this document has been reached."
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::Unauthorized { correlation_id, .. }
            | Self::Forbidden { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::Conflict { correlation_id, .. }
            | Self::TooManyRequests { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. } => correlation_id,
        }
    }
}

impl AccessError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let message = self.to_string();
        match self {
            Self::Validation(_) => InterfaceError::BadRequest { message, correlation_id },
            Self::NotAuthenticated { .. } => {
                InterfaceError::Unauthorized { message, correlation_id }
            }
            Self::Forbidden(_) | Self::AccessDenied(_) => {
                InterfaceError::Forbidden { message, correlation_id }
            }
            Self::NotFound { .. } => InterfaceError::NotFound { message, correlation_id },
            Self::InvalidState { .. } => InterfaceError::Conflict { message, correlation_id },
            Self::LimitExceeded { .. } => {
                InterfaceError::TooManyRequests { message, correlation_id }
            }
            Self::Store(_) => InterfaceError::ServiceUnavailable { message, correlation_id },
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::document_request::{DocumentRequestId, RequestStatus};
    use crate::errors::{AccessError, InterfaceError, StoreError};

    #[test]
    fn validation_error_maps_to_bad_request_with_correlation_id() {
        let interface = AccessError::Validation("rejection reason is required".to_owned())
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
    fn decided_request_maps_to_conflict() {
        let interface = AccessError::InvalidState { status: RequestStatus::Approved }
            .into_interface("req-2");

        assert!(matches!(interface, InterfaceError::Conflict { .. }));
        assert_eq!(interface.correlation_id(), "req-2");
    }

    #[test]
    fn limit_exceeded_is_a_blocking_notification_not_a_server_fault() {
        let error = AccessError::LimitExceeded {
            request_id: DocumentRequestId("DREQ-1".to_owned()),
            document_index: 0,
        };
        assert_eq!(error.code(), "limit_exceeded");
        assert!(matches!(error.into_interface("req-3"), InterfaceError::TooManyRequests { .. }));
    }

    #[test]
    fn store_failure_maps_to_service_unavailable() {
        let interface = AccessError::from(StoreError::Backend("database lock timeout".to_owned()))
            .into_interface("req-4");

        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
        assert_eq!(
            interface.user_message(),
            "The service is temporarily unavailable. Please retry shortly."
        );
    }
}
