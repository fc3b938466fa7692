//! Mapping of gateway failures onto HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::admission::{DenialReason, OperationClass};
use crate::error::TurnstileError;

/// A request that ends before (or instead of) a forwarded response.
#[derive(Debug)]
pub enum ApiError {
    /// No `X-Client-ID` header
    MissingClientId,
    /// The client id is not in the registry
    UnknownClient(String),
    /// Admission said no
    Denied {
        reason: DenialReason,
        operation: OperationClass,
    },
    /// Forwarding failed
    Upstream(TurnstileError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingClientId => StatusCode::BAD_REQUEST,
            ApiError::UnknownClient(_) => StatusCode::FORBIDDEN,
            ApiError::Denied {
                reason: DenialReason::NoQuotaConfigured,
                ..
            } => StatusCode::FORBIDDEN,
            ApiError::Denied { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Upstream(TurnstileError::UpstreamUnreachable { .. }) => {
                StatusCode::BAD_GATEWAY
            }
            ApiError::Upstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn detail(&self) -> String {
        match self {
            ApiError::MissingClientId => "X-Client-ID header is required".to_string(),
            ApiError::UnknownClient(_) => "Unknown client".to_string(),
            ApiError::Denied {
                reason: DenialReason::NoQuotaConfigured,
                operation,
            } => format!("No quota configured for {} operations", operation),
            ApiError::Denied { operation, .. } => {
                format!("Rate limit exceeded for {} operations", operation)
            }
            ApiError::Upstream(TurnstileError::UpstreamUnreachable { .. }) => {
                "Failed to connect to upstream".to_string()
            }
            ApiError::Upstream(_) => "Internal gateway error".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = json!({ "detail": self.detail() });
        if let ApiError::Denied { reason, .. } = &self {
            body["reason"] = json!(reason);
        }
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError::MissingClientId.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::UnknownClient("x".into()).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::Denied {
                reason: DenialReason::RateExceeded,
                operation: OperationClass::Write
            }
            .status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ApiError::Denied {
                reason: DenialReason::ConcurrencyExceeded,
                operation: OperationClass::Read
            }
            .status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ApiError::Denied {
                reason: DenialReason::NoQuotaConfigured,
                operation: OperationClass::Read
            }
            .status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::Upstream(TurnstileError::UpstreamUnreachable {
                retry_count: 3,
                last_error: "refused".into()
            })
            .status(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_denial_detail_names_operation() {
        let err = ApiError::Denied {
            reason: DenialReason::RateExceeded,
            operation: OperationClass::Write,
        };
        assert_eq!(err.detail(), "Rate limit exceeded for write operations");
    }
}
