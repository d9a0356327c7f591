//! Error types for rinkside services
//!
//! Provides a comprehensive error handling system with:
//! - Distinct error types for different failure modes
//! - HTTP status code mapping
//! - Structured error responses
//! - Error codes for client handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using EngineError
pub type Result<T> = std::result::Result<T, EngineError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    ValidationError,
    MissingField,

    // Authorization errors (2xxx)
    PermissionDenied,
    ExpiredSession,

    // Query resolution (3xxx)
    ClarificationNeeded,

    // Tool execution errors (4xxx)
    ToolTimeout,
    ToolFailure,
    ToolUnavailable,
    DeadlineExceeded,

    // Cache errors (5xxx)
    CacheError,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            ErrorCode::ValidationError => 1001,
            ErrorCode::MissingField => 1002,

            ErrorCode::PermissionDenied => 2001,
            ErrorCode::ExpiredSession => 2002,

            ErrorCode::ClarificationNeeded => 3001,

            ErrorCode::ToolTimeout => 4001,
            ErrorCode::ToolFailure => 4002,
            ErrorCode::ToolUnavailable => 4003,
            ErrorCode::DeadlineExceeded => 4004,

            ErrorCode::CacheError => 5001,

            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum EngineError {
    // Validation errors
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Required field missing: {field}")]
    MissingField { field: String },

    // Authorization errors
    #[error("Permission denied: {message}")]
    PermissionDenied { message: String },

    #[error("Session expired")]
    ExpiredSession,

    // Query resolution
    #[error("Query is ambiguous, clarification needed")]
    ClarificationNeeded { candidates: Vec<String> },

    // Tool execution errors
    #[error("Tool '{tool}' timed out after {timeout_ms}ms")]
    ToolTimeout { tool: String, timeout_ms: u64 },

    #[error("Tool '{tool}' failed: {message}")]
    ToolFailure { tool: String, message: String },

    #[error("Tool '{tool}' temporarily unavailable: {message}")]
    ToolUnavailable { tool: String, message: String },

    #[error("Query deadline of {deadline_ms}ms exceeded")]
    DeadlineExceeded { deadline_ms: u64 },

    // Cache errors
    #[error("Cache error: {message}")]
    CacheError { message: String },

    // Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            EngineError::Validation { .. } => ErrorCode::ValidationError,
            EngineError::MissingField { .. } => ErrorCode::MissingField,
            EngineError::PermissionDenied { .. } => ErrorCode::PermissionDenied,
            EngineError::ExpiredSession => ErrorCode::ExpiredSession,
            EngineError::ClarificationNeeded { .. } => ErrorCode::ClarificationNeeded,
            EngineError::ToolTimeout { .. } => ErrorCode::ToolTimeout,
            EngineError::ToolFailure { .. } => ErrorCode::ToolFailure,
            EngineError::ToolUnavailable { .. } => ErrorCode::ToolUnavailable,
            EngineError::DeadlineExceeded { .. } => ErrorCode::DeadlineExceeded,
            EngineError::CacheError { .. } => ErrorCode::CacheError,
            EngineError::Internal { .. } => ErrorCode::InternalError,
            EngineError::Configuration { .. } => ErrorCode::ConfigurationError,
            EngineError::Serialization(_) => ErrorCode::SerializationError,
            EngineError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            EngineError::Validation { .. } | EngineError::MissingField { .. } => {
                StatusCode::BAD_REQUEST
            }

            // 401 Unauthorized
            EngineError::ExpiredSession => StatusCode::UNAUTHORIZED,

            // 403 Forbidden
            EngineError::PermissionDenied { .. } => StatusCode::FORBIDDEN,

            // 422 Unprocessable Entity - the query itself needs clarification
            EngineError::ClarificationNeeded { .. } => StatusCode::UNPROCESSABLE_ENTITY,

            // 504 Gateway Timeout
            EngineError::ToolTimeout { .. } | EngineError::DeadlineExceeded { .. } => {
                StatusCode::GATEWAY_TIMEOUT
            }

            // 502 Bad Gateway
            EngineError::ToolFailure { .. } => StatusCode::BAD_GATEWAY,

            // 503 Service Unavailable
            EngineError::ToolUnavailable { .. } | EngineError::CacheError { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }

            // 500 Internal Server Error
            EngineError::Internal { .. }
            | EngineError::Configuration { .. }
            | EngineError::Serialization(_)
            | EngineError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether a retry may succeed. Only service hiccups qualify;
    /// permission and validation failures are never retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::ToolUnavailable { .. })
    }

    /// Check if this error should be logged at error level
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Check if this error is a client error
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}

/// Structured error response for API
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidates: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let message = self.to_string();

        // Log based on severity
        if self.is_server_error() {
            tracing::error!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Server error"
            );
        } else if self.is_client_error() {
            tracing::warn!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Client error"
            );
        }

        let candidates = match self {
            EngineError::ClarificationNeeded { candidates } => Some(candidates),
            _ => None,
        };

        let body = ErrorResponse {
            error: ErrorDetails {
                code,
                message,
                candidates,
                request_id: None, // Filled by middleware
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Internal {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        let err = EngineError::PermissionDenied {
            message: "scope violation".into(),
        };
        assert_eq!(err.code(), ErrorCode::PermissionDenied);
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_validation_error() {
        let err = EngineError::Validation {
            message: "Empty query text".into(),
            field: Some("text".into()),
        };
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert!(!err.is_server_error());
        assert!(err.is_client_error());
    }

    #[test]
    fn test_transient_classification() {
        let hiccup = EngineError::ToolUnavailable {
            tool: "knowledge_search".into(),
            message: "connection reset".into(),
        };
        assert!(hiccup.is_transient());

        let denied = EngineError::PermissionDenied {
            message: "no league scope".into(),
        };
        assert!(!denied.is_transient());

        let timeout = EngineError::ToolTimeout {
            tool: "structured_query".into(),
            timeout_ms: 2500,
        };
        assert!(!timeout.is_transient());
    }

    #[test]
    fn test_server_error() {
        let err = EngineError::Internal {
            message: "Something went wrong".into(),
        };
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(err.is_server_error());
    }
}
