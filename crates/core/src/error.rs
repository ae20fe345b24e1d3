//! Error types for schema parsing and validation.
//!
//! All errors are explicit and typed - no panics allowed.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for schema operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Schema error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read manifest '{path}': {reason}")]
    ManifestReadFailed { path: PathBuf, reason: String },

    #[error("JSON parse error: {reason}")]
    JsonParseFailed { reason: String },

    #[error("YAML parse error: {reason}")]
    YamlParseFailed { reason: String },

    #[error("invalid item '{name}': {reason}")]
    InvalidItem { name: String, reason: String },

    #[error("invalid metadata: {reason}")]
    InvalidMetadata { reason: String },
}

impl Error {
    /// Create a manifest read error.
    pub fn manifest_read_failed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::ManifestReadFailed {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a JSON parse error.
    pub fn json_parse_failed(reason: impl Into<String>) -> Self {
        Self::JsonParseFailed {
            reason: reason.into(),
        }
    }

    /// Create a YAML parse error.
    pub fn yaml_parse_failed(reason: impl Into<String>) -> Self {
        Self::YamlParseFailed {
            reason: reason.into(),
        }
    }

    /// Create an invalid item error.
    pub fn invalid_item(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidItem {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid metadata error.
    pub fn invalid_metadata(reason: impl Into<String>) -> Self {
        Self::InvalidMetadata {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::invalid_item("api", "name must not be empty");
        assert!(err.to_string().contains("api"));
        assert!(err.to_string().contains("must not be empty"));
    }

    #[test]
    fn test_manifest_read_failed_names_path() {
        let err = Error::manifest_read_failed("/tmp/group.yaml", "permission denied");
        assert!(err.to_string().contains("/tmp/group.yaml"));
    }
}
