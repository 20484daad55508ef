//! Error Types for CONVOY API
//!
//! This module defines error handling for the API layer, including:
//! - ApiError struct for structured error responses
//! - ErrorCode enum for categorizing errors
//! - IntoResponse implementation for Axum HTTP responses
//!
//! All errors are serialized as JSON with appropriate HTTP status codes.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use convoy_core::{ConvoyError, StorageError, TransportError, ValidationError};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// ERROR CODE ENUM
// ============================================================================

/// Error codes for API responses.
///
/// Each error code maps to a specific HTTP status code and represents
/// a category of error that can occur during API operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // ========================================================================
    // Validation Errors (400)
    // ========================================================================
    /// Request validation failed
    ValidationFailed,

    /// Request contains invalid input data
    InvalidInput,

    /// Required field is missing from request
    MissingField,

    /// Field format is incorrect
    InvalidFormat,

    /// Path pattern could not be parsed or escapes the project root
    InvalidPattern,

    // ========================================================================
    // Not Found Errors (404)
    // ========================================================================
    /// Requested entity does not exist
    EntityNotFound,

    /// Requested project does not exist
    ProjectNotFound,

    /// Requested agent does not exist
    AgentNotFound,

    /// Requested message does not exist
    MessageNotFound,

    // ========================================================================
    // Conflict Errors (409)
    // ========================================================================
    /// Operation conflicts with current state
    StateConflict,

    // ========================================================================
    // Server Errors (500, 503)
    // ========================================================================
    /// Internal server error
    InternalError,

    /// Event log operation failed
    StorageError,

    /// Service is temporarily unavailable
    ServiceUnavailable,
}

impl ErrorCode {
    /// Get the HTTP status code for this error code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::ValidationFailed
            | ErrorCode::InvalidInput
            | ErrorCode::MissingField
            | ErrorCode::InvalidFormat
            | ErrorCode::InvalidPattern => StatusCode::BAD_REQUEST,

            ErrorCode::EntityNotFound
            | ErrorCode::ProjectNotFound
            | ErrorCode::AgentNotFound
            | ErrorCode::MessageNotFound => StatusCode::NOT_FOUND,

            ErrorCode::StateConflict => StatusCode::CONFLICT,

            ErrorCode::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,

            ErrorCode::InternalError | ErrorCode::StorageError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Get a default message for this error code.
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::ValidationFailed => "Request validation failed",
            ErrorCode::InvalidInput => "Invalid input data",
            ErrorCode::MissingField => "Required field is missing",
            ErrorCode::InvalidFormat => "Invalid format",
            ErrorCode::InvalidPattern => "Invalid path pattern",

            ErrorCode::EntityNotFound => "Entity not found",
            ErrorCode::ProjectNotFound => "Project not found",
            ErrorCode::AgentNotFound => "Agent not found",
            ErrorCode::MessageNotFound => "Message not found",

            ErrorCode::StateConflict => "Operation conflicts with current state",

            ErrorCode::InternalError => "Internal server error",
            ErrorCode::StorageError => "Event log operation failed",
            ErrorCode::ServiceUnavailable => "Service temporarily unavailable",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// API ERROR STRUCT
// ============================================================================

/// Structured error response for API operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    /// Error code categorizing the error
    pub code: ErrorCode,

    /// Human-readable error message
    pub message: String,

    /// Optional additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Create a new API error with the given code, using the default message.
    pub fn from_code(code: ErrorCode) -> Self {
        Self {
            code,
            message: code.default_message().to_string(),
            details: None,
        }
    }

    /// Add additional details to the error.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        self.code.status_code()
    }

    // ========================================================================
    // Convenience constructors for common errors
    // ========================================================================

    pub fn validation_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationFailed, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    pub fn missing_field(field: &str) -> Self {
        Self::new(
            ErrorCode::MissingField,
            format!("Required field '{}' is missing", field),
        )
    }

    pub fn invalid_format(field: &str, expected: &str) -> Self {
        Self::new(
            ErrorCode::InvalidFormat,
            format!("Field '{}' has invalid format, expected {}", field, expected),
        )
    }

    pub fn entity_not_found(entity_type: &str, id: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::EntityNotFound,
            format!("{} with id {} not found", entity_type, id),
        )
    }

    pub fn project_not_found(slug: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::ProjectNotFound,
            format!("Project {} not found", slug),
        )
    }

    pub fn agent_not_found(name: impl fmt::Display) -> Self {
        Self::new(ErrorCode::AgentNotFound, format!("Agent {} not found", name))
    }

    pub fn message_not_found(message_id: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::MessageNotFound,
            format!("Message {} not found", message_id),
        )
    }

    pub fn state_conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::StateConflict, message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    pub fn storage_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::StorageError, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ServiceUnavailable, message)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

// ============================================================================
// AXUM INTEGRATION
// ============================================================================

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(self);
        (status, body).into_response()
    }
}

// ============================================================================
// CONVERSIONS
// ============================================================================

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        let message = err.to_string();
        match err {
            ValidationError::RequiredFieldMissing { field } => ApiError::missing_field(&field),
            ValidationError::InvalidPattern { pattern, .. } => {
                ApiError::new(ErrorCode::InvalidPattern, message)
                    .with_details(serde_json::json!({ "pattern": pattern }))
            }
            ValidationError::MalformedPayload { event_type, .. } => {
                ApiError::invalid_input(message)
                    .with_details(serde_json::json!({ "event_type": event_type }))
            }
            ValidationError::InvalidValue { field, .. } => ApiError::validation_failed(message)
                .with_details(serde_json::json!({ "field": field })),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { entity, id } => match entity.as_str() {
                "project" => ApiError::project_not_found(id),
                "agent" => ApiError::agent_not_found(id),
                "message" => ApiError::message_not_found(id),
                _ => ApiError::entity_not_found(&entity, id),
            },
            StorageError::Unavailable { reason } => {
                tracing::warn!(%reason, "event log unavailable");
                ApiError::service_unavailable(format!("Event log unavailable: {}", reason))
            }
            other => {
                // Full detail goes to the log only.
                tracing::error!("Storage error: {:?}", other);
                ApiError::storage_error("Event log operation failed")
            }
        }
    }
}

impl From<ConvoyError> for ApiError {
    fn from(err: ConvoyError) -> Self {
        match err {
            ConvoyError::Validation(e) => e.into(),
            ConvoyError::Storage(e) => e.into(),
            ConvoyError::Transport(TransportError::Closed) => {
                ApiError::service_unavailable("Client connection closed")
            }
            ConvoyError::Transport(e) => ApiError::internal_error(e.to_string()),
            ConvoyError::Config(e) => {
                tracing::error!("Configuration error: {:?}", e);
                ApiError::internal_error(e.to_string())
            }
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        tracing::error!("JSON serialization error: {:?}", err);
        ApiError::invalid_input(format!("Invalid JSON: {}", err))
    }
}

// ============================================================================
// RESULT TYPE ALIAS
// ============================================================================

/// Result type alias for API operations.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_status_mapping() {
        assert_eq!(ErrorCode::ValidationFailed.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorCode::InvalidPattern.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorCode::EntityNotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(ErrorCode::AgentNotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(ErrorCode::StateConflict.status_code(), StatusCode::CONFLICT);
        assert_eq!(ErrorCode::InternalError.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(ErrorCode::StorageError.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(ErrorCode::ServiceUnavailable.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_convoy_error_mapping() {
        let err: ApiError = ConvoyError::not_found("agent", "BlueLake").into();
        assert_eq!(err.code, ErrorCode::AgentNotFound);
        assert!(err.message.contains("BlueLake"));

        let err: ApiError = ConvoyError::not_found("bead", "bd-1").into();
        assert_eq!(err.code, ErrorCode::EntityNotFound);

        let err: ApiError = ConvoyError::missing("paths").into();
        assert_eq!(err.code, ErrorCode::MissingField);
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);

        let err: ApiError = ConvoyError::invalid("ttl_seconds", "must be positive").into();
        assert_eq!(err.code, ErrorCode::ValidationFailed);
        assert_eq!(err.details, Some(serde_json::json!({ "field": "ttl_seconds" })));

        let err: ApiError = ConvoyError::from(StorageError::Unavailable {
            reason: "disk gone".to_string(),
        })
        .into();
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);

        let err: ApiError = ConvoyError::from(StorageError::LockPoisoned).into();
        assert_eq!(err.code, ErrorCode::StorageError);
        assert_eq!(err.message, "Event log operation failed");
    }

    #[test]
    fn test_invalid_pattern_carries_pattern() {
        let err: ApiError = ValidationError::InvalidPattern {
            pattern: "../etc".to_string(),
            reason: "escapes the project root".to_string(),
        }
        .into();
        assert_eq!(err.code, ErrorCode::InvalidPattern);
        assert_eq!(err.details, Some(serde_json::json!({ "pattern": "../etc" })));
    }

    #[test]
    fn test_error_serialization() -> Result<(), serde_json::Error> {
        let err = ApiError::agent_not_found("RedFox");
        let json = serde_json::to_string(&err)?;

        assert!(json.contains("AGENT_NOT_FOUND"));
        assert!(json.contains("RedFox"));
        assert!(!json.contains("details"));

        let deserialized: ApiError = serde_json::from_str(&json)?;
        assert_eq!(deserialized, err);
        Ok(())
    }

    #[test]
    fn test_error_display() {
        let err = ApiError::storage_error("append failed");
        let display = format!("{}", err);

        assert!(display.contains("StorageError"));
        assert!(display.contains("append failed"));
    }
}
