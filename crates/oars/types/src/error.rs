use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type OarsResult<T> = Result<T, OarsError>;

/// Error kinds surfaced to callers of the core.
#[derive(Debug, Error)]
pub enum OarsError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("idempotency conflict: {0}")]
    IdempotencyConflict(String),

    #[error("tenant access denied: {0}")]
    TenantScopeViolation(String),

    #[error("mTLS workload identity required: {0}")]
    MtlsRequired(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("upstream failure: {0}")]
    UpstreamFailure(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("step-up authentication required: {0}")]
    StepUpRequired(String),

    #[error("approver not authorized: {0}")]
    NotAuthorizedApprover(String),

    #[error("path traversal rejected: {0}")]
    PathTraversal(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl OarsError {
    /// Stable wire code for the error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            OarsError::Unauthorized(_) => "unauthorized",
            OarsError::Forbidden(_) => "forbidden",
            OarsError::NotFound(_) => "not_found",
            OarsError::Validation(_) => "validation_error",
            OarsError::Conflict(_) => "conflict",
            OarsError::IdempotencyConflict(_) => "idempotency_conflict",
            OarsError::TenantScopeViolation(_) => "tenant_required",
            OarsError::MtlsRequired(_) => "mtls_identity_required",
            OarsError::RateLimited(_) => "rate_limited",
            OarsError::UpstreamFailure(_) => "internal",
            OarsError::InvalidState(_) => "conflict",
            OarsError::StepUpRequired(_) => "forbidden",
            OarsError::NotAuthorizedApprover(_) => "forbidden",
            OarsError::PathTraversal(_) => "bad_request",
            OarsError::Internal(_) => "internal",
        }
    }

    /// Render as the wire envelope, with the request id when known.
    pub fn to_envelope(&self, request_id: Option<&str>) -> ErrorEnvelope {
        ErrorEnvelope {
            error: ErrorBody {
                code: self.code().to_string(),
                message: self.to_string(),
                request_id: request_id.map(|id| id.to_string()),
            },
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// Wire shape every error surfaces as: `{"error": {code, message, requestId?}}`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_carries_code_and_request_id() {
        let err = OarsError::IdempotencyConflict("body changed".into());
        let envelope = err.to_envelope(Some("req_1"));
        assert_eq!(envelope.error.code, "idempotency_conflict");
        assert_eq!(envelope.error.request_id.as_deref(), Some("req_1"));
    }

    #[test]
    fn tenant_violation_maps_to_tenant_required() {
        let err = OarsError::TenantScopeViolation("tenant_beta".into());
        assert_eq!(err.code(), "tenant_required");
    }
}
