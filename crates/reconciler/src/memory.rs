//! In-memory stores for testing and simulation.
//!
//! Both stores implement optimistic concurrency with a per-object
//! `resource_version`, record every call they receive, and accept one-shot
//! injected faults.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use depgroup_core::{Group, GroupSpec, GroupStatus, ObjectKey, Workload};
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::store::{GroupStore, WorkloadStore};

/// Store operations a fault can be injected into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Get,
    SetCapacity,
    SetPriorityClass,
    UpdateStatus,
}

/// Failure returned by an injected fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Answer with `Error::Conflict`.
    Conflict,
    /// Answer with `Error::StoreFailed`.
    Unavailable,
    /// Never answer (until the caller's timeout fires).
    Hang,
}

/// A call received by a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    GetGroup(ObjectKey),
    UpdateStatus(ObjectKey),
    GetWorkload(ObjectKey),
    SetCapacity { key: ObjectKey, capacity: u32 },
    SetPriorityClass { key: ObjectKey, class: String },
}

impl StoreCall {
    /// Whether the call mutates a workload.
    #[must_use]
    pub const fn is_workload_mutation(&self) -> bool {
        matches!(self, Self::SetCapacity { .. } | Self::SetPriorityClass { .. })
    }
}

#[derive(Default)]
struct Faults {
    pending: RwLock<HashMap<(Operation, ObjectKey), Fault>>,
}

impl Faults {
    async fn arm(&self, operation: Operation, key: ObjectKey, fault: Fault) {
        self.pending.write().await.insert((operation, key), fault);
    }

    /// Fire the fault armed for this call, if any.
    async fn fire(&self, operation: Operation, key: &ObjectKey) -> Result<()> {
        let fault = self.pending.write().await.remove(&(operation, key.clone()));
        match fault {
            None => Ok(()),
            Some(Fault::Conflict) => Err(Error::conflict(key)),
            Some(Fault::Unavailable) => Err(Error::store_failed(
                format!("{operation:?}"),
                key,
                "injected failure",
            )),
            Some(Fault::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(Error::store_failed(format!("{operation:?}"), key, "hung"))
            }
        }
    }
}

/// In-memory group store.
#[derive(Default)]
pub struct InMemoryGroupStore {
    groups: RwLock<HashMap<ObjectKey, Group>>,
    calls: RwLock<Vec<StoreCall>>,
    faults: Faults,
}

impl InMemoryGroupStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store wrapped in an Arc.
    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Insert or replace a group as-is.
    pub async fn insert(&self, group: Group) {
        self.groups.write().await.insert(group.key(), group);
    }

    /// Delete a group.
    pub async fn remove(&self, key: &ObjectKey) -> Option<Group> {
        self.groups.write().await.remove(key)
    }

    /// Replace a group's spec, bumping its generation.
    ///
    /// # Errors
    /// Returns `Error::StoreFailed` when the group does not exist.
    pub async fn update_spec(&self, key: &ObjectKey, spec: GroupSpec) -> Result<()> {
        let mut groups = self.groups.write().await;
        let group = groups
            .get_mut(key)
            .ok_or_else(|| Error::store_failed("update_spec", key, "not found"))?;
        group.spec = spec;
        group.metadata.generation = group.metadata.generation.saturating_add(1);
        group.metadata.resource_version = group.metadata.resource_version.saturating_add(1);
        Ok(())
    }

    /// Snapshot of a stored group.
    pub async fn group(&self, key: &ObjectKey) -> Option<Group> {
        self.groups.read().await.get(key).cloned()
    }

    /// Every call received so far.
    pub async fn calls(&self) -> Vec<StoreCall> {
        self.calls.read().await.clone()
    }

    /// Number of status writes received so far.
    pub async fn status_writes(&self) -> usize {
        self.calls
            .read()
            .await
            .iter()
            .filter(|call| matches!(call, StoreCall::UpdateStatus(_)))
            .count()
    }

    /// Fail the next `operation` on `key` with `fault`.
    pub async fn fail_next(&self, operation: Operation, key: &ObjectKey, fault: Fault) {
        self.faults.arm(operation, key.clone(), fault).await;
    }
}

#[async_trait]
impl GroupStore for InMemoryGroupStore {
    async fn get(&self, key: &ObjectKey) -> Result<Option<Group>> {
        self.calls.write().await.push(StoreCall::GetGroup(key.clone()));
        self.faults.fire(Operation::Get, key).await?;
        Ok(self.groups.read().await.get(key).cloned())
    }

    async fn list(&self) -> Result<Vec<ObjectKey>> {
        let mut keys: Vec<ObjectKey> = self.groups.read().await.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    async fn update_status(
        &self,
        key: &ObjectKey,
        status: GroupStatus,
        resource_version: u64,
    ) -> Result<()> {
        self.calls.write().await.push(StoreCall::UpdateStatus(key.clone()));
        self.faults.fire(Operation::UpdateStatus, key).await?;

        let mut groups = self.groups.write().await;
        let group = groups
            .get_mut(key)
            .ok_or_else(|| Error::store_failed("update_status", key, "not found"))?;
        if group.metadata.resource_version != resource_version {
            return Err(Error::conflict(key));
        }
        group.status = status;
        group.metadata.resource_version = group.metadata.resource_version.saturating_add(1);
        Ok(())
    }
}

/// In-memory workload store.
#[derive(Default)]
pub struct InMemoryWorkloadStore {
    workloads: RwLock<HashMap<ObjectKey, Workload>>,
    calls: RwLock<Vec<StoreCall>>,
    faults: Faults,
}

impl InMemoryWorkloadStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store wrapped in an Arc.
    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Insert or replace a workload as-is.
    pub async fn insert(&self, workload: Workload) {
        self.workloads.write().await.insert(workload.key(), workload);
    }

    /// Delete a workload.
    pub async fn remove(&self, key: &ObjectKey) -> Option<Workload> {
        self.workloads.write().await.remove(key)
    }

    /// Snapshot of a stored workload.
    pub async fn workload(&self, key: &ObjectKey) -> Option<Workload> {
        self.workloads.read().await.get(key).cloned()
    }

    /// Every call received so far.
    pub async fn calls(&self) -> Vec<StoreCall> {
        self.calls.read().await.clone()
    }

    /// Mutation calls received so far, successful or not.
    pub async fn mutation_calls(&self) -> Vec<StoreCall> {
        self.calls
            .read()
            .await
            .iter()
            .filter(|call| call.is_workload_mutation())
            .cloned()
            .collect()
    }

    /// Forget recorded calls.
    pub async fn clear_calls(&self) {
        self.calls.write().await.clear();
    }

    /// Fail the next `operation` on `key` with `fault`.
    pub async fn fail_next(&self, operation: Operation, key: &ObjectKey, fault: Fault) {
        self.faults.arm(operation, key.clone(), fault).await;
    }

    /// Simulate the capacity manager catching up with one workload: the
    /// latest declared change is observed and every requested instance
    /// becomes available.
    pub async fn settle(&self, key: &ObjectKey) {
        if let Some(workload) = self.workloads.write().await.get_mut(key) {
            settle_workload(workload);
        }
    }

    /// Settle every workload.
    pub async fn settle_all(&self) {
        self.workloads
            .write()
            .await
            .values_mut()
            .for_each(settle_workload);
    }

    /// Apply a spec change under the optimistic-concurrency precondition.
    async fn mutate<F>(&self, key: &ObjectKey, resource_version: u64, change: F) -> Result<()>
    where
        F: FnOnce(&mut Workload),
    {
        let mut workloads = self.workloads.write().await;
        let workload = workloads
            .get_mut(key)
            .ok_or_else(|| Error::store_failed("update", key, "not found"))?;
        if workload.resource_version != resource_version {
            return Err(Error::conflict(key));
        }
        change(workload);
        workload.declared_version = workload.declared_version.saturating_add(1);
        workload.resource_version = workload.resource_version.saturating_add(1);
        Ok(())
    }
}

fn settle_workload(workload: &mut Workload) {
    let requested = workload.current_capacity.unwrap_or(0);
    if workload.is_observed() && workload.available_capacity == requested {
        return;
    }
    workload.observed_version = workload.declared_version;
    workload.available_capacity = requested;
    workload.resource_version = workload.resource_version.saturating_add(1);
}

#[async_trait]
impl WorkloadStore for InMemoryWorkloadStore {
    async fn get(&self, key: &ObjectKey) -> Result<Option<Workload>> {
        self.calls.write().await.push(StoreCall::GetWorkload(key.clone()));
        self.faults.fire(Operation::Get, key).await?;
        Ok(self.workloads.read().await.get(key).cloned())
    }

    async fn set_capacity(
        &self,
        key: &ObjectKey,
        capacity: u32,
        resource_version: u64,
    ) -> Result<()> {
        self.calls.write().await.push(StoreCall::SetCapacity {
            key: key.clone(),
            capacity,
        });
        self.faults.fire(Operation::SetCapacity, key).await?;
        self.mutate(key, resource_version, |workload| {
            workload.current_capacity = Some(capacity);
        })
        .await
    }

    async fn set_priority_class(
        &self,
        key: &ObjectKey,
        class: &str,
        resource_version: u64,
    ) -> Result<()> {
        self.calls.write().await.push(StoreCall::SetPriorityClass {
            key: key.clone(),
            class: class.to_string(),
        });
        self.faults.fire(Operation::SetPriorityClass, key).await?;
        self.mutate(key, resource_version, |workload| {
            workload.priority_class_name = Some(class.to_string());
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use depgroup_core::Item;

    #[tokio::test]
    async fn test_set_capacity_bumps_versions() {
        let store = InMemoryWorkloadStore::new();
        let key = ObjectKey::new("default", "db");
        store.insert(Workload::new("default", "db")).await;

        let result = store.set_capacity(&key, 2, 1).await;
        assert!(result.is_ok());

        let workload = store.workload(&key).await;
        assert_eq!(workload.as_ref().and_then(|w| w.current_capacity), Some(2));
        assert_eq!(workload.as_ref().map(|w| w.declared_version), Some(2));
        assert_eq!(workload.as_ref().map(Workload::is_observed), Some(false));
    }

    #[tokio::test]
    async fn test_stale_resource_version_conflicts() {
        let store = InMemoryWorkloadStore::new();
        let key = ObjectKey::new("default", "db");
        store.insert(Workload::new("default", "db")).await;

        assert!(store.set_capacity(&key, 2, 1).await.is_ok());
        let result = store.set_capacity(&key, 3, 1).await;
        assert!(matches!(result, Err(Error::Conflict { .. })));
    }

    #[tokio::test]
    async fn test_settle_makes_capacity_available() {
        let store = InMemoryWorkloadStore::new();
        let key = ObjectKey::new("default", "api");
        store.insert(Workload::new("default", "api")).await;
        assert!(store.set_capacity(&key, 3, 1).await.is_ok());

        store.settle_all().await;

        let workload = store.workload(&key).await;
        assert_eq!(workload.as_ref().map(|w| w.available_capacity), Some(3));
        assert_eq!(workload.as_ref().map(Workload::is_observed), Some(true));
    }

    #[tokio::test]
    async fn test_injected_fault_fires_once() {
        let store = InMemoryWorkloadStore::new();
        let key = ObjectKey::new("default", "db");
        store.insert(Workload::new("default", "db")).await;
        store
            .fail_next(Operation::Get, &key, Fault::Unavailable)
            .await;

        assert!(store.get(&key).await.is_err());
        assert!(store.get(&key).await.is_ok());
        assert_eq!(store.calls().await.len(), 2);
    }

    #[tokio::test]
    async fn test_group_status_update_requires_current_version() {
        let store = InMemoryGroupStore::new();
        let group = depgroup_core::Group::new("default", "shop").with_item(Item::new("db"));
        let key = group.key();
        store.insert(group).await;

        let status = GroupStatus {
            ready_items: vec!["db".to_string()],
            ..Default::default()
        };
        assert!(store.update_status(&key, status.clone(), 1).await.is_ok());
        assert!(matches!(
            store.update_status(&key, status, 1).await,
            Err(Error::Conflict { .. })
        ));
        assert_eq!(store.status_writes().await, 2);
    }

    #[tokio::test]
    async fn test_update_spec_bumps_generation() {
        let store = InMemoryGroupStore::new();
        let group = depgroup_core::Group::new("default", "shop");
        let key = group.key();
        store.insert(group).await;

        let spec = GroupSpec {
            items: vec![Item::new("db")],
        };
        assert!(store.update_spec(&key, spec).await.is_ok());
        assert_eq!(store.group(&key).await.map(|g| g.metadata.generation), Some(2));
    }
}
