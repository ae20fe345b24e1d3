//! Live workload state as seen through the workload store.

use serde::{Deserialize, Serialize};

use crate::meta::ObjectKey;

/// Live state of one workload.
///
/// Owned by the workload store. The engine reads it once per pass and never
/// caches it across passes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workload {
    pub namespace: String,
    pub name: String,
    /// Requested capacity; `None` when never set.
    #[serde(default)]
    pub current_capacity: Option<u32>,
    /// Instances currently serving.
    #[serde(default)]
    pub available_capacity: u32,
    /// Bumped by the store on every spec change.
    #[serde(default = "initial_version")]
    pub declared_version: u64,
    /// Last declared version the capacity manager has acted on.
    #[serde(default = "initial_version")]
    pub observed_version: u64,
    /// Optimistic-concurrency token, bumped on every write.
    #[serde(default = "initial_version")]
    pub resource_version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority_class_name: Option<String>,
}

impl Workload {
    /// A freshly created, converged workload with no capacity set.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            current_capacity: None,
            available_capacity: 0,
            declared_version: initial_version(),
            observed_version: initial_version(),
            resource_version: initial_version(),
            priority_class_name: None,
        }
    }

    /// Set requested and available capacity as if fully rolled out.
    #[must_use]
    pub const fn running(mut self, capacity: u32) -> Self {
        self.current_capacity = Some(capacity);
        self.available_capacity = capacity;
        self
    }

    /// Set the available capacity only.
    #[must_use]
    pub const fn with_available(mut self, available: u32) -> Self {
        self.available_capacity = available;
        self
    }

    /// Mark the observed state as lagging behind the declared state.
    #[must_use]
    pub const fn stale(mut self) -> Self {
        self.observed_version = self.declared_version.saturating_sub(1);
        self
    }

    /// The namespaced key of this workload.
    #[must_use]
    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.namespace.clone(), self.name.clone())
    }

    /// Whether the capacity manager has caught up with the latest declared change.
    #[must_use]
    pub const fn is_observed(&self) -> bool {
        self.observed_version == self.declared_version
    }
}

const fn initial_version() -> u64 {
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_workload_is_observed() {
        let workload = Workload::new("default", "db");
        assert!(workload.is_observed());
        assert_eq!(workload.current_capacity, None);
    }

    #[test]
    fn test_stale_workload_is_not_observed() {
        let workload = Workload::new("default", "db").running(2).stale();
        assert!(!workload.is_observed());
        assert_eq!(workload.available_capacity, 2);
    }

    #[test]
    fn test_parse_workload_list() {
        let yaml = concat!(
            "- {namespace: default, name: db, currentCapacity: 1, availableCapacity: 1}\n",
            "- {namespace: default, name: api}\n",
        );
        let workloads: Vec<Workload> = serde_yaml::from_str(yaml).unwrap_or_default();
        assert_eq!(workloads.len(), 2);
        assert_eq!(workloads.first().and_then(|w| w.current_capacity), Some(1));
        assert!(workloads.iter().all(Workload::is_observed));
    }
}
