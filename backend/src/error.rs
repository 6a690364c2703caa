//! Gateway error taxonomy.
//!
//! Every failure inside the gateway is a [`GatewayError`]. At the HTTP
//! boundary it is encoded as a JSON-RPC error object; the variant decides
//! both the JSON-RPC code and, for failures that happen before a call is
//! routed to a session, the HTTP status.

use axum::http::StatusCode;
use labgate_types::jsonrpc::{error_codes, JsonRpcError};
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt;

/// Why a credential was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    Missing,
    Invalid,
}

impl fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthFailure::Missing => f.write_str("missing credential"),
            AuthFailure::Invalid => f.write_str("invalid credential"),
        }
    }
}

/// One schema violation in an operation's arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldViolation {
    pub field: String,
    pub message: String,
}

impl FieldViolation {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Coarse error class, as exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Unauthenticated,
    InvalidRequest,
    InvalidArgument,
    UpstreamError,
    Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Authentication failed: {0}")]
    Unauthenticated(AuthFailure),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Session not found")]
    SessionNotFound,

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Invalid arguments: {}", describe_violations(.0))]
    InvalidArgument(Vec<FieldViolation>),

    #[error("Upstream returned HTTP {status}")]
    Upstream { status: u16, body: Value },

    #[error("Upstream request failed: {0}")]
    UpstreamFailure(String),

    #[error("A push stream is already open for this session")]
    StreamConflict,

    #[error("Gateway is shutting down")]
    ShuttingDown,

    #[error("Internal error: {0}")]
    Internal(String),
}

fn describe_violations(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(|v| format!("{}: {}", v.field, v.message))
        .collect::<Vec<_>>()
        .join("; ")
}

impl GatewayError {
    /// Shorthand for a single-field argument violation.
    pub fn invalid_argument(field: impl Into<String>, message: impl Into<String>) -> Self {
        GatewayError::InvalidArgument(vec![FieldViolation::new(field, message)])
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::Unauthenticated(_) => ErrorKind::Unauthenticated,
            GatewayError::Parse(_)
            | GatewayError::InvalidRequest(_)
            | GatewayError::SessionNotFound
            | GatewayError::MethodNotFound(_)
            | GatewayError::StreamConflict => ErrorKind::InvalidRequest,
            GatewayError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            GatewayError::Upstream { .. } | GatewayError::UpstreamFailure(_) => {
                ErrorKind::UpstreamError
            }
            GatewayError::ShuttingDown | GatewayError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// JSON-RPC error code.
    pub fn code(&self) -> i32 {
        match self {
            GatewayError::Unauthenticated(_) => error_codes::UNAUTHENTICATED,
            GatewayError::Parse(_) => error_codes::PARSE_ERROR,
            GatewayError::InvalidRequest(_)
            | GatewayError::SessionNotFound
            | GatewayError::StreamConflict => error_codes::INVALID_REQUEST,
            GatewayError::MethodNotFound(_) => error_codes::METHOD_NOT_FOUND,
            GatewayError::InvalidArgument(_) => error_codes::INVALID_PARAMS,
            GatewayError::Upstream { .. } | GatewayError::UpstreamFailure(_) => {
                error_codes::UPSTREAM_ERROR
            }
            GatewayError::ShuttingDown | GatewayError::Internal(_) => error_codes::INTERNAL_ERROR,
        }
    }

    /// HTTP status used when the error ends a call before it reaches a session.
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            GatewayError::Parse(_)
            | GatewayError::InvalidRequest(_)
            | GatewayError::MethodNotFound(_)
            | GatewayError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            GatewayError::SessionNotFound => StatusCode::NOT_FOUND,
            GatewayError::StreamConflict => StatusCode::CONFLICT,
            GatewayError::Upstream { .. } | GatewayError::UpstreamFailure(_) => {
                StatusCode::BAD_GATEWAY
            }
            GatewayError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Encode as a JSON-RPC error object.
    ///
    /// Internal faults are reduced to a generic message; callers log the
    /// detail before encoding.
    pub fn to_rpc_error(&self) -> JsonRpcError {
        let data = match self {
            GatewayError::InvalidArgument(violations) => Some(json!({ "violations": violations })),
            GatewayError::Upstream { status, body } => {
                Some(json!({ "status": status, "body": body }))
            }
            GatewayError::UpstreamFailure(reason) => Some(json!({ "reason": reason })),
            _ => None,
        };
        let message = match self {
            GatewayError::Internal(_) => "Internal error".to_string(),
            other => other.to_string(),
        };
        JsonRpcError {
            code: self.code(),
            message,
            data,
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        GatewayError::UpstreamFailure(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_argument_lists_every_field() {
        let err = GatewayError::InvalidArgument(vec![
            FieldViolation::new("project_id", "length is lower than 1"),
            FieldViolation::new("branch", "length is lower than 1"),
        ]);
        let rpc = err.to_rpc_error();

        assert_eq!(rpc.code, error_codes::INVALID_PARAMS);
        assert!(rpc.message.contains("project_id"));
        assert!(rpc.message.contains("branch"));
        let violations = rpc.data.unwrap()["violations"].as_array().unwrap().len();
        assert_eq!(violations, 2);
    }

    #[test]
    fn test_internal_error_hides_detail() {
        let err = GatewayError::Internal("lock poisoned at session.rs:42".to_string());
        let rpc = err.to_rpc_error();

        assert_eq!(rpc.code, error_codes::INTERNAL_ERROR);
        assert_eq!(rpc.message, "Internal error");
        assert!(rpc.data.is_none());
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_upstream_error_preserves_status_and_body() {
        let err = GatewayError::Upstream {
            status: 403,
            body: json!({"message": "403 Forbidden"}),
        };
        let rpc = err.to_rpc_error();
        let data = rpc.data.unwrap();

        assert_eq!(rpc.code, error_codes::UPSTREAM_ERROR);
        assert_eq!(data["status"], 403);
        assert_eq!(data["body"]["message"], "403 Forbidden");
    }

    #[test]
    fn test_gateway_level_statuses() {
        assert_eq!(
            GatewayError::Unauthenticated(AuthFailure::Missing).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(GatewayError::SessionNotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(GatewayError::StreamConflict.status(), StatusCode::CONFLICT);
        assert_eq!(
            GatewayError::SessionNotFound.kind(),
            ErrorKind::InvalidRequest
        );
    }
}
