//! HTTP error mapping
//!
//! Protocol and infrastructure errors become a structured `{code, message}`
//! body. Domain rejections never come through here; they travel inside a
//! `REJECTED` CoordinationResponse with status 200.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::controller::ControllerError;
use crate::engine::EngineError;
use crate::registry::RegistryError;
use crate::traces::TraceError;

/// Error body returned to callers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable error code (e.g. "DUPLICATE_AGENT", "MALFORMED_BODY")
    pub code: String,

    /// Human-readable error message
    pub message: String,

    /// Whether retrying the same request may succeed
    #[serde(default)]
    pub retryable: bool,
}

/// Error returned from HTTP handlers
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                code: code.to_string(),
                message: message.into(),
                retryable: status.is_server_error(),
            },
        }
    }

    pub fn bad_request(code: &str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &str {
        &self.body.code
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request("MALFORMED_BODY", rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::bad_request("MALFORMED_QUERY", rejection.body_text())
    }
}

impl From<TraceError> for ApiError {
    fn from(err: TraceError) -> Self {
        match &err {
            TraceError::NotFound(_) => Self::new(StatusCode::NOT_FOUND, "TRACE_NOT_FOUND", err.to_string()),
            TraceError::AlreadyFinalized(_) => {
                Self::new(StatusCode::CONFLICT, "ALREADY_FINALIZED", err.to_string())
            }
            _ => {
                error!(error = %err, "Trace store failure");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_FAILURE", err.to_string())
            }
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Registry(e @ RegistryError::DuplicateAgent(_)) => {
                Self::new(StatusCode::CONFLICT, "DUPLICATE_AGENT", e.to_string())
            }
            EngineError::Registry(e @ RegistryError::UnknownAgent(_)) => {
                Self::new(StatusCode::NOT_FOUND, "UNKNOWN_AGENT", e.to_string())
            }
            EngineError::Trace(e) | EngineError::Controller(ControllerError::Trace(e)) => e.into(),
            EngineError::Controller(e) => match &e {
                ControllerError::DuplicateWorkItem(_) => {
                    Self::new(StatusCode::CONFLICT, "DUPLICATE_WORK_ITEM", e.to_string())
                }
                ControllerError::WorkItemNotFound(_) => {
                    Self::new(StatusCode::NOT_FOUND, "WORK_ITEM_NOT_FOUND", e.to_string())
                }
                ControllerError::InvalidPhases(_) => Self::bad_request("INVALID_PHASES", e.to_string()),
                ControllerError::Rejected(reason) => {
                    Self::new(StatusCode::CONFLICT, reason.code(), e.to_string())
                }
                ControllerError::TerminalPhase(_) | ControllerError::NotTerminalPhase(_) => {
                    Self::new(StatusCode::CONFLICT, "PHASE_CONFLICT", e.to_string())
                }
                ControllerError::Trace(_) => {
                    Self::new(StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_FAILURE", e.to_string())
                }
            },
            EngineError::Config(e) => {
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "CONFIG", e.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::RejectReason;

    #[test]
    fn test_status_mapping() {
        let err: ApiError = EngineError::Registry(RegistryError::DuplicateAgent("a".into())).into();
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert_eq!(err.code(), "DUPLICATE_AGENT");

        let err: ApiError = EngineError::Trace(TraceError::NotFound("V1".into())).into();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);

        let err: ApiError =
            EngineError::Controller(ControllerError::Rejected(RejectReason::NoActiveItem)).into();
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert_eq!(err.code(), "NO_ACTIVE_ITEM");

        let err: ApiError = EngineError::Controller(ControllerError::Trace(TraceError::Storage(
            "io".into(),
        )))
        .into();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(err.body.retryable);
    }
}
