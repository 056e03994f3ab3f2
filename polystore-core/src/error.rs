//! Core Errors
//!
//! TigerStyle: Explicit error types with context.

use thiserror::Error;

/// Errors raised by addresses, records and the query algebra.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    /// Path cannot be decomposed into (collection, uid) pairs
    #[error("malformed path '{path}': {reason}")]
    MalformedPath {
        /// Offending path
        path: String,
        /// Why it was rejected
        reason: String,
    },

    /// Address path was assigned twice
    #[error("path already set to '{path}'")]
    PathAlreadySet {
        /// Path that was already assigned
        path: String,
    },

    /// Property is not declared on the model
    #[error("unknown property '{property}' on model {model}")]
    UnknownProperty {
        /// Model name
        model: String,
        /// Property name
        property: String,
    },

    /// Value rejected by a property
    #[error("validation error on '{property}': {message}")]
    Validation {
        /// Property name
        property: String,
        /// Validation message
        message: String,
    },

    /// Operator or sort literal could not be parsed
    #[error("invalid query: {message}")]
    InvalidQuery {
        /// Error message
        message: String,
    },
}

impl CoreError {
    /// Create a malformed path error.
    #[must_use]
    pub fn malformed_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a path already set error.
    #[must_use]
    pub fn path_already_set(path: impl Into<String>) -> Self {
        Self::PathAlreadySet { path: path.into() }
    }

    /// Create an unknown property error.
    #[must_use]
    pub fn unknown_property(model: impl Into<String>, property: impl Into<String>) -> Self {
        Self::UnknownProperty {
            model: model.into(),
            property: property.into(),
        }
    }

    /// Create a validation error.
    #[must_use]
    pub fn validation(property: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            property: property.into(),
            message: message.into(),
        }
    }

    /// Create an invalid query error.
    #[must_use]
    pub fn invalid_query(message: impl Into<String>) -> Self {
        Self::InvalidQuery {
            message: message.into(),
        }
    }
}

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_constructors() {
        let err = CoreError::malformed_path("a/b/c", "odd segment count");
        assert!(matches!(err, CoreError::MalformedPath { ref path, .. } if path == "a/b/c"));

        let err = CoreError::unknown_property("User", "nickname");
        assert_eq!(err.to_string(), "unknown property 'nickname' on model User");
    }
}
