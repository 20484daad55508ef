//! Error types for CONVOY operations

use crate::Offset;
use thiserror::Error;

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Event log unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Serialization failed: {reason}")]
    Serialization { reason: String },

    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    #[error("Out-of-order event for project {project_key}: expected offset {expected}, got {got}")]
    OutOfOrder {
        project_key: String,
        expected: Offset,
        got: Offset,
    },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Validation errors. Raised before any offset is assigned.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Invalid path pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Malformed payload for event type {event_type}: {reason}")]
    MalformedPayload { event_type: String, reason: String },
}

/// Transport errors. Always scoped to a single stream client.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Client connection closed")]
    Closed,

    #[error("Send failed: {reason}")]
    SendFailed { reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all CONVOY errors.
#[derive(Debug, Clone, Error)]
pub enum ConvoyError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl ConvoyError {
    /// Shorthand for a `StorageError::NotFound`.
    pub fn not_found(entity: &str, id: impl ToString) -> Self {
        ConvoyError::Storage(StorageError::NotFound {
            entity: entity.to_string(),
            id: id.to_string(),
        })
    }

    /// Shorthand for a `ValidationError::RequiredFieldMissing`.
    pub fn missing(field: &str) -> Self {
        ConvoyError::Validation(ValidationError::RequiredFieldMissing {
            field: field.to_string(),
        })
    }

    /// Shorthand for a `ValidationError::InvalidValue`.
    pub fn invalid(field: &str, reason: impl Into<String>) -> Self {
        ConvoyError::Validation(ValidationError::InvalidValue {
            field: field.to_string(),
            reason: reason.into(),
        })
    }
}

/// Result type alias for CONVOY operations.
pub type ConvoyResult<T> = Result<T, ConvoyError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_display_out_of_order() {
        let err = StorageError::OutOfOrder {
            project_key: "/repo".to_string(),
            expected: 4,
            got: 6,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("expected offset 4"));
        assert!(msg.contains("got 6"));
    }

    #[test]
    fn test_validation_error_display_pattern() {
        let err = ValidationError::InvalidPattern {
            pattern: "../etc".to_string(),
            reason: "escapes the project root".to_string(),
        };
        assert!(format!("{}", err).contains("escapes the project root"));
    }

    #[test]
    fn test_convoy_error_from_storage() {
        let err: ConvoyError = StorageError::LockPoisoned.into();
        assert!(matches!(err, ConvoyError::Storage(StorageError::LockPoisoned)));
        assert!(format!("{}", err).starts_with("Storage error"));
    }

    #[test]
    fn test_convoy_error_shorthands() {
        assert!(matches!(
            ConvoyError::not_found("Agent", "BlueLake"),
            ConvoyError::Storage(StorageError::NotFound { .. })
        ));
        assert!(matches!(
            ConvoyError::missing("paths"),
            ConvoyError::Validation(ValidationError::RequiredFieldMissing { .. })
        ));
        assert!(matches!(
            ConvoyError::invalid("ttl_seconds", "must be positive"),
            ConvoyError::Validation(ValidationError::InvalidValue { .. })
        ));
    }
}
