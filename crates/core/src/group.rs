//! Group schema: the declarative unit listing workload items and their
//! dependency edges, plus the observed status written back by the engine.

use std::path::Path;

use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::meta::{ObjectKey, ObjectMeta, validate_name};

/// API version written into manifests.
pub const API_VERSION: &str = "depgroup.io/v1alpha1";

/// Kind written into manifests.
pub const KIND: &str = "DeploymentGroup";

/// Capacity used when an item does not declare a target.
pub const DEFAULT_TARGET_CAPACITY: u32 = 1;

/// Condition type summarising overall group health.
pub const CONDITION_READY: &str = "Ready";

/// Condition reasons written by the engine.
pub mod reason {
    pub const ALL_ITEMS_READY: &str = "AllItemsReady";
    pub const PROGRESSING: &str = "Progressing";
    pub const CYCLE_DETECTED: &str = "CycleDetected";
    pub const DUPLICATE_ITEM: &str = "DuplicateItem";
    pub const INVALID_FIELD: &str = "InvalidField";
}

/// One workload reference inside a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    /// Name of the workload, resolved in the group's namespace.
    pub name: String,
    /// Capacity requested once every dependency is ready.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_capacity: Option<u32>,
    /// Names of other items in the group that must be ready first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    /// Priority class copied onto the workload's pod template.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority_class_name: Option<String>,
}

impl Item {
    /// Create an item with no target and no dependencies.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target_capacity: None,
            depends_on: Vec::new(),
            priority_class_name: None,
        }
    }

    /// Set the target capacity.
    #[must_use]
    pub const fn with_target(mut self, target: u32) -> Self {
        self.target_capacity = Some(target);
        self
    }

    /// Add dependencies.
    #[must_use]
    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on.extend(deps.into_iter().map(Into::into));
        self
    }

    /// Set the priority class.
    #[must_use]
    pub fn with_priority_class(mut self, class: impl Into<String>) -> Self {
        self.priority_class_name = Some(class.into());
        self
    }

    /// Declared target, or 1 when unset.
    #[must_use]
    pub fn effective_target(&self) -> u32 {
        self.target_capacity.unwrap_or(DEFAULT_TARGET_CAPACITY)
    }

    /// Field-level validation. Graph-level problems (cycles, duplicates,
    /// dangling references) are left to the engine.
    ///
    /// # Errors
    /// Returns `Error::InvalidItem` for an unusable name or dependency name.
    pub fn validate(&self) -> Result<()> {
        validate_name(&self.name).map_err(|reason| Error::invalid_item(&self.name, reason))?;
        if let Some(dep) = self.depends_on.iter().find(|dep| dep.is_empty()) {
            return Err(Error::invalid_item(
                &self.name,
                format!("dependsOn entry '{dep}' must not be empty"),
            ));
        }
        if let Some(class) = &self.priority_class_name {
            if class.is_empty() {
                return Err(Error::invalid_item(
                    &self.name,
                    "priorityClassName must not be empty when set",
                ));
            }
        }
        Ok(())
    }
}

/// Desired state of a group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupSpec {
    #[serde(default)]
    pub items: Vec<Item>,
}

impl GroupSpec {
    /// Look up an item by name. The first declaration wins.
    #[must_use]
    pub fn item(&self, name: &str) -> Option<&Item> {
        self.items.iter().find(|item| item.name == name)
    }

    /// Item names declared more than once, in first-seen order.
    #[must_use]
    pub fn duplicate_names(&self) -> Vec<&str> {
        self.items
            .iter()
            .map(|item| item.name.as_str())
            .duplicates()
            .collect()
    }

    /// Validate every item.
    ///
    /// # Errors
    /// Returns the first item validation error.
    pub fn validate(&self) -> Result<()> {
        self.items.iter().try_for_each(Item::validate)
    }
}

/// Condition status tri-state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// Observed condition on a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    pub reason: String,
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Create a condition stamped with the current time.
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }
}

/// Observed state of a group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<u64>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub ready_items: Vec<String>,
}

impl GroupStatus {
    /// Find a condition by type.
    #[must_use]
    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    /// Insert or replace a condition by type.
    ///
    /// The previous transition time is kept when the status value did not
    /// change.
    pub fn set_condition(&mut self, mut condition: Condition) {
        match self.conditions.iter_mut().find(|c| c.type_ == condition.type_) {
            Some(existing) => {
                if existing.status == condition.status {
                    condition.last_transition_time = existing.last_transition_time;
                }
                *existing = condition;
            }
            None => self.conditions.push(condition),
        }
    }
}

/// The declarative group object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_kind")]
    pub kind: String,
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: GroupSpec,
    #[serde(default)]
    pub status: GroupStatus,
}

impl Group {
    /// Create an empty group.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            api_version: default_api_version(),
            kind: default_kind(),
            metadata: ObjectMeta::new(namespace, name),
            spec: GroupSpec::default(),
            status: GroupStatus::default(),
        }
    }

    /// Append an item to the spec.
    #[must_use]
    pub fn with_item(mut self, item: Item) -> Self {
        self.spec.items.push(item);
        self
    }

    /// The namespaced key of this group.
    #[must_use]
    pub fn key(&self) -> ObjectKey {
        self.metadata.key()
    }

    /// Validate metadata and item fields.
    ///
    /// # Errors
    /// Returns the first metadata or item error.
    pub fn validate(&self) -> Result<()> {
        self.metadata.validate()?;
        self.spec.validate()
    }

    /// Parse a group from a YAML manifest.
    ///
    /// # Errors
    /// Returns `Error::YamlParseFailed` on malformed input.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|e| Error::yaml_parse_failed(e.to_string()))
    }

    /// Parse a group from a JSON manifest.
    ///
    /// # Errors
    /// Returns `Error::JsonParseFailed` on malformed input.
    pub fn from_json_str(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| Error::json_parse_failed(e.to_string()))
    }

    /// Load a manifest from disk; `.json` files are parsed as JSON,
    /// everything else as YAML.
    ///
    /// # Errors
    /// Returns a read or parse error.
    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::manifest_read_failed(path, e.to_string()))?;
        if path.extension().is_some_and(|ext| ext == "json") {
            Self::from_json_str(&content)
        } else {
            Self::from_yaml_str(&content)
        }
    }
}

fn default_api_version() -> String {
    API_VERSION.to_string()
}

fn default_kind() -> String {
    KIND.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestResult = std::result::Result<(), Box<dyn std::error::Error>>;

    const MANIFEST: &str = r"
apiVersion: depgroup.io/v1alpha1
kind: DeploymentGroup
metadata:
  name: shop
  namespace: prod
spec:
  items:
    - name: db
      targetCapacity: 1
    - name: api
      targetCapacity: 3
      dependsOn: [db]
      priorityClassName: high
    - name: worker
      dependsOn: [api, db]
";

    #[test]
    fn test_parse_yaml_manifest() -> TestResult {
        let group = Group::from_yaml_str(MANIFEST)?;
        assert_eq!(group.key(), ObjectKey::new("prod", "shop"));
        assert_eq!(group.spec.items.len(), 3);
        assert_eq!(group.spec.item("api").map(Item::effective_target), Some(3));
        assert_eq!(
            group.spec.item("api").and_then(|i| i.priority_class_name.as_deref()),
            Some("high")
        );
        assert!(group.status.ready_items.is_empty());
        assert!(group.validate().is_ok());
        Ok(())
    }

    #[test]
    fn test_effective_target_defaults_to_one() {
        assert_eq!(Item::new("worker").effective_target(), 1);
        assert_eq!(Item::new("worker").with_target(0).effective_target(), 0);
    }

    #[test]
    fn test_duplicate_names() {
        let spec = GroupSpec {
            items: vec![Item::new("a"), Item::new("b"), Item::new("a"), Item::new("a")],
        };
        assert_eq!(spec.duplicate_names(), vec!["a"]);
        assert_eq!(spec.item("a"), Some(&Item::new("a")));
    }

    #[test]
    fn test_item_validation_rejects_bad_names() {
        assert!(Item::new("").validate().is_err());
        assert!(Item::new("Api").validate().is_err());
        assert!(Item::new("api").depends_on([""]).validate().is_err());
        assert!(Item::new("api").with_priority_class("").validate().is_err());
    }

    #[test]
    fn test_negative_target_is_a_parse_error() {
        let manifest =
            "metadata: {name: shop}\nspec:\n  items:\n    - {name: db, targetCapacity: -1}\n";
        assert!(Group::from_yaml_str(manifest).is_err());
    }

    #[test]
    fn test_set_condition_keeps_transition_time_when_status_unchanged() {
        let mut status = GroupStatus::default();
        let first =
            Condition::new(CONDITION_READY, ConditionStatus::False, reason::PROGRESSING, "0/2");
        let stamp = first.last_transition_time;
        status.set_condition(first);

        let second =
            Condition::new(CONDITION_READY, ConditionStatus::False, reason::PROGRESSING, "1/2");
        status.set_condition(second);

        let current = status.condition(CONDITION_READY);
        assert_eq!(status.conditions.len(), 1);
        assert_eq!(current.map(|c| c.last_transition_time), Some(stamp));
        assert_eq!(current.map(|c| c.message.as_str()), Some("1/2"));
    }

    #[test]
    fn test_status_serializes_camel_case() {
        let status = GroupStatus {
            observed_generation: Some(2),
            conditions: Vec::new(),
            ready_items: vec!["db".to_string()],
        };
        let json = serde_json::to_string(&status).unwrap_or_default();
        assert!(json.contains("readyItems"));
        assert!(json.contains("observedGeneration"));
    }

    #[test]
    fn test_from_path_reads_json() -> TestResult {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("group.json");
        let group = Group::new("default", "shop").with_item(Item::new("db"));
        std::fs::write(&path, serde_json::to_string(&group)?)?;

        let loaded = Group::from_path(&path)?;
        assert_eq!(loaded, group);
        Ok(())
    }
}
