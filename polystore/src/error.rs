//! Backend Errors
//!
//! TigerStyle: Explicit error types with context. Driver failures are
//! wrapped with the operation and path or SQL that failed; `NotFound` stays
//! distinguishable so callers can turn it into "no result".

use polystore_core::CoreError;
use thiserror::Error;

/// Errors from adapter operations.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// No stored data at the address
    #[error("not found: {path}")]
    NotFound {
        /// Address that was looked up
        path: String,
    },

    /// Record was soft-deleted
    #[error("resource gone: {path}")]
    Gone {
        /// Address of the deleted record
        path: String,
    },

    /// Identifier already taken
    #[error("already exists: {path}")]
    AlreadyExists {
        /// Conflicting address
        path: String,
    },

    /// Record already carries an address on create
    #[error("record is already persisted at {path}")]
    AlreadyPersisted {
        /// Existing address
        path: String,
    },

    /// Record has no identifier
    #[error("record has no identifier, {operation} needs one")]
    MissingIdentifier {
        /// Operation that was attempted
        operation: String,
    },

    /// Malformed adapter configuration
    #[error("configuration error: {message}")]
    Config {
        /// Error message
        message: String,
    },

    /// Collection or table cannot be resolved
    #[error("cannot resolve collection: {message}")]
    UnresolvableCollection {
        /// Error message
        message: String,
    },

    /// Query cannot be translated
    #[error("query error: {message}")]
    Query {
        /// Error message
        message: String,
    },

    /// Middleware of the same type registered twice
    #[error("middleware already registered: {name}")]
    DuplicateMiddleware {
        /// Middleware type name
        name: String,
    },

    /// Middleware aborted the operation
    #[error("middleware {name} failed: {message}")]
    Middleware {
        /// Middleware name
        name: String,
        /// Error message
        message: String,
    },

    /// No adapter registered under the alias
    #[error("unknown backend alias '{alias}'")]
    UnknownBackend {
        /// Requested alias
        alias: String,
    },

    /// Underlying driver failure
    #[error("{operation} failed on {context}: {message}")]
    Driver {
        /// Operation that failed
        operation: String,
        /// Path or SQL being executed
        context: String,
        /// Driver message
        message: String,
        /// Whether a retry may succeed
        transient: bool,
    },

    /// Address, record or query algebra error
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl BackendError {
    /// Create a not found error.
    #[must_use]
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    /// Create a gone error.
    #[must_use]
    pub fn gone(path: impl Into<String>) -> Self {
        Self::Gone { path: path.into() }
    }

    /// Create an already exists error.
    #[must_use]
    pub fn already_exists(path: impl Into<String>) -> Self {
        Self::AlreadyExists { path: path.into() }
    }

    /// Create a missing identifier error.
    #[must_use]
    pub fn missing_identifier(operation: impl Into<String>) -> Self {
        Self::MissingIdentifier {
            operation: operation.into(),
        }
    }

    /// Create a configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an unresolvable collection error.
    #[must_use]
    pub fn unresolvable(message: impl Into<String>) -> Self {
        Self::UnresolvableCollection {
            message: message.into(),
        }
    }

    /// Create a query error.
    #[must_use]
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
        }
    }

    /// Create a middleware error.
    #[must_use]
    pub fn middleware(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Middleware {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Wrap a driver failure with the operation and path or SQL.
    #[must_use]
    pub fn driver(
        operation: impl Into<String>,
        context: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Driver {
            operation: operation.into(),
            context: context.into(),
            message: message.into(),
            transient: false,
        }
    }

    /// Mark a driver failure as retryable.
    #[must_use]
    pub fn transient(self) -> Self {
        match self {
            Self::Driver {
                operation,
                context,
                message,
                ..
            } => Self::Driver {
                operation,
                context,
                message,
                transient: true,
            },
            other => other,
        }
    }

    /// Check if this is a not found error.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if this is a transient error (can be retried).
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Driver { transient: true, .. })
    }
}

/// Result type for adapter operations.
pub type BackendResult<T> = Result<T, BackendError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_constructors() {
        let err = BackendError::not_found("user/u1");
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "not found: user/u1");

        let err = BackendError::driver("find", "SELECT 1", "boom");
        assert!(!err.is_transient());
        assert!(err.clone().transient().is_transient());
        assert_eq!(err.to_string(), "find failed on SELECT 1: boom");
    }

    #[test]
    fn test_core_errors_convert() {
        let err: BackendError = CoreError::unknown_property("User", "nick").into();
        assert!(matches!(err, BackendError::Core(CoreError::UnknownProperty { .. })));
        assert!(!err.is_not_found());
    }
}
