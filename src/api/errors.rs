//! API Error Handling
//!
//! Structured error responses with proper HTTP status codes and request
//! tracking. The withdrawal taxonomy maps onto distinct error codes so
//! clients can branch without parsing messages.

use crate::errors::CashierError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Top-level API error response with request tracking
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub request_id: String,
    pub error: ErrorBody,
}

/// Error body with structured information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Error code (NOT_FOUND, INSUFFICIENT_BALANCE, MAINTENANCE, ...)
    pub code: String,
    /// Human-readable error message
    pub message: String,
    /// Optional additional details (can be any JSON)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// API error types with request tracking
#[derive(Debug)]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub request_id: String,
}

#[derive(Debug)]
pub enum ApiErrorKind {
    NotFound(String),
    BadRequest(String),
    Unauthorized(String),
    RateLimited(String),
    Maintenance(String),
    InsufficientBalance(String),
    SettlementUnavailable(String),
    OperationFailed(String),
    InternalError(String),
}

impl ApiError {
    pub fn not_found(request_id: String, message: String) -> Self {
        Self {
            kind: ApiErrorKind::NotFound(message),
            request_id,
        }
    }

    pub fn bad_request(request_id: String, message: String) -> Self {
        Self {
            kind: ApiErrorKind::BadRequest(message),
            request_id,
        }
    }

    pub fn unauthorized(request_id: String, message: String) -> Self {
        Self {
            kind: ApiErrorKind::Unauthorized(message),
            request_id,
        }
    }

    pub fn internal_error(request_id: String, message: String) -> Self {
        Self {
            kind: ApiErrorKind::InternalError(message),
            request_id,
        }
    }

    /// Map an engine error onto the wire taxonomy
    pub fn from_cashier(request_id: String, err: CashierError) -> Self {
        let kind = match err {
            CashierError::Validation(msg) => ApiErrorKind::BadRequest(msg),
            CashierError::Unauthorized(msg) => ApiErrorKind::Unauthorized(msg),
            CashierError::Maintenance => ApiErrorKind::Maintenance(err.to_string()),
            CashierError::InsufficientBalance { .. } => {
                ApiErrorKind::InsufficientBalance(err.to_string())
            }
            CashierError::SettlementUnavailable(msg) => {
                ApiErrorKind::SettlementUnavailable(msg)
            }
            CashierError::OperationFailed(msg) => ApiErrorKind::OperationFailed(msg),
            CashierError::NotFound(msg) => ApiErrorKind::NotFound(msg),
            CashierError::RateLimited => ApiErrorKind::RateLimited(err.to_string()),
            CashierError::Storage(e) => ApiErrorKind::InternalError(e.to_string()),
        };
        Self { kind, request_id }
    }

    fn status_code_and_body(&self) -> (StatusCode, &'static str, String) {
        match &self.kind {
            ApiErrorKind::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            ApiErrorKind::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            ApiErrorKind::Unauthorized(msg) => {
                (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.clone())
            }
            ApiErrorKind::RateLimited(msg) => {
                (StatusCode::TOO_MANY_REQUESTS, "RATE_LIMITED", msg.clone())
            }
            ApiErrorKind::Maintenance(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "MAINTENANCE", msg.clone())
            }
            ApiErrorKind::InsufficientBalance(msg) => (
                StatusCode::BAD_REQUEST,
                "INSUFFICIENT_BALANCE",
                msg.clone(),
            ),
            ApiErrorKind::SettlementUnavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "SETTLEMENT_UNAVAILABLE",
                msg.clone(),
            ),
            ApiErrorKind::OperationFailed(msg) => {
                (StatusCode::BAD_GATEWAY, "OPERATION_FAILED", msg.clone())
            }
            ApiErrorKind::InternalError(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg.clone(),
            ),
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (_, code, message) = self.status_code_and_body();
        write!(f, "[{}] {}: {}", self.request_id, code, message)
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.status_code_and_body();

        let body = Json(ErrorResponse {
            request_id: self.request_id.clone(),
            error: ErrorBody {
                code: code.to_string(),
                message,
                details: None,
            },
        });

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_balance_maps_to_distinct_code() {
        let err = ApiError::from_cashier(
            "req-1".to_string(),
            CashierError::InsufficientBalance {
                required: 5_501,
                available: 5_500,
            },
        );
        let (status, code, _) = err.status_code_and_body();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(code, "INSUFFICIENT_BALANCE");
    }

    #[test]
    fn test_maintenance_maps_to_service_unavailable() {
        let err = ApiError::from_cashier("req-1".to_string(), CashierError::Maintenance);
        let (status, code, _) = err.status_code_and_body();
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(code, "MAINTENANCE");
    }
}
