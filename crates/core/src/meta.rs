//! Object identity and versioning metadata.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Namespace used when a manifest omits one.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Maximum length of an object name (DNS-1123 label).
pub const MAX_NAME_LENGTH: usize = 63;

/// Namespaced name of a stored object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    /// Create a new object key.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of a sibling object in the same namespace.
    #[must_use]
    pub fn sibling(&self, name: impl Into<String>) -> Self {
        Self::new(self.namespace.clone(), name)
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Metadata common to every stored object.
///
/// `generation` is bumped by the store whenever the declared spec changes;
/// `resource_version` is bumped on every write (spec or status) and is used
/// as the optimistic-concurrency precondition for updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default)]
    pub generation: u64,
    #[serde(default)]
    pub resource_version: u64,
}

impl ObjectMeta {
    /// Create metadata for a fresh object.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            generation: 1,
            resource_version: 1,
        }
    }

    /// The namespaced key of this object.
    #[must_use]
    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.namespace.clone(), self.name.clone())
    }

    /// Check the name and namespace are usable object names.
    ///
    /// # Errors
    /// Returns `Error::InvalidMetadata` when either is empty or too long.
    pub fn validate(&self) -> Result<()> {
        validate_name(&self.name)
            .map_err(|reason| Error::invalid_metadata(format!("name: {reason}")))?;
        validate_name(&self.namespace)
            .map_err(|reason| Error::invalid_metadata(format!("namespace: {reason}")))
    }
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

/// Check a name is a non-empty lowercase DNS-1123 label.
pub(crate) fn validate_name(name: &str) -> std::result::Result<(), String> {
    if name.is_empty() {
        return Err("must not be empty".to_string());
    }
    if name.len() > MAX_NAME_LENGTH {
        return Err(format!("exceeds {MAX_NAME_LENGTH} characters"));
    }
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if !valid_chars {
        return Err("must consist of lowercase alphanumerics or '-'".to_string());
    }
    if name.starts_with('-') || name.ends_with('-') {
        return Err("must start and end with an alphanumeric character".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_display() {
        let key = ObjectKey::new("prod", "shop");
        assert_eq!(key.to_string(), "prod/shop");
        assert_eq!(key.sibling("db"), ObjectKey::new("prod", "db"));
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("api-v2").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("Api").is_err());
        assert!(validate_name("-api").is_err());
        assert!(validate_name(&"a".repeat(64)).is_err());
    }

    #[test]
    fn test_meta_defaults_namespace() -> std::result::Result<(), serde_json::Error> {
        let meta: ObjectMeta = serde_json::from_str(r#"{"name":"shop"}"#)?;
        assert_eq!(meta.namespace, DEFAULT_NAMESPACE);
        assert_eq!(meta.generation, 0);
        Ok(())
    }
}
