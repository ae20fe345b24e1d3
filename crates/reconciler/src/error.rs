//! Error types for the reconciler crate.
//!
//! Validation failures of a group (cycles, duplicate item names, invalid
//! fields) are not errors: they are pass outcomes recorded in the group's status. Everything
//! here aborts the current pass.

use thiserror::Error;

/// Result type alias for reconciler operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Reconciler error types.
#[derive(Debug, Error)]
pub enum Error {
    /// A store read or write failed.
    #[error("store operation '{operation}' on '{object}' failed: {reason}")]
    StoreFailed {
        operation: String,
        object: String,
        reason: String,
    },

    /// The object changed since it was read.
    #[error("conflict updating '{object}': object was modified")]
    Conflict { object: String },

    /// A store call did not complete in time.
    #[error("store operation '{operation}' on '{object}' timed out after {timeout_ms}ms")]
    Timeout {
        operation: String,
        object: String,
        timeout_ms: u64,
    },

    /// The pass was cancelled between store calls.
    #[error("reconciliation pass cancelled")]
    Cancelled,

    /// Invalid configuration.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}

impl Error {
    /// Create a store failed error.
    pub fn store_failed(
        operation: impl Into<String>,
        object: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        Self::StoreFailed {
            operation: operation.into(),
            object: object.to_string(),
            reason: reason.into(),
        }
    }

    /// Create a conflict error.
    pub fn conflict(object: impl ToString) -> Self {
        Self::Conflict {
            object: object.to_string(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, object: impl ToString, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            object: object.to_string(),
            timeout_ms,
        }
    }

    /// Create an invalid config error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Whether re-running the pass after a backoff can succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::StoreFailed { .. } | Self::Conflict { .. } | Self::Timeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::store_failed("get", "prod/db", "connection reset");
        assert!(err.to_string().contains("prod/db"));
        assert!(err.to_string().contains("connection reset"));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(Error::conflict("prod/api").is_retryable());
        assert!(Error::timeout("set_capacity", "prod/api", 5000).is_retryable());
        assert!(Error::store_failed("get", "prod/api", "boom").is_retryable());
        assert!(!Error::Cancelled.is_retryable());
        assert!(!Error::invalid_config("requeue_after must be positive").is_retryable());
    }
}
