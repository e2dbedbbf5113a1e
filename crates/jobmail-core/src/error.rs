//! Domain-specific error types following panic-free policy.

use thiserror::Error;

/// Errors that can occur when constructing domain values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A required field was empty
    #[error("Missing {field}")]
    MissingField { field: String },

    /// Invalid field value
    #[error("Invalid {field}: {value} (expected {expected})")]
    InvalidFieldValue {
        field: String,
        value: String,
        expected: String,
    },
}

impl DomainError {
    pub(crate) fn missing(field: &str) -> Self {
        Self::MissingField {
            field: field.to_string(),
        }
    }

    pub(crate) fn invalid(field: &str, value: &str, expected: &str) -> Self {
        Self::InvalidFieldValue {
            field: field.to_string(),
            value: value.to_string(),
            expected: expected.to_string(),
        }
    }
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
