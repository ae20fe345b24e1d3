//! Reconciler implementation: one pass over one group.
//!
//! A pass walks `Loading → Validating → Evaluating → Applying → Reporting`
//! and returns to `Idle`. It keeps no state between passes, so replaying a
//! pass against the same live state issues no further mutations.

use std::collections::HashMap;
use std::sync::Arc;

use depgroup_core::{Group, GroupStatus, ObjectKey};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ReconcilerConfig;
use crate::error::{Error, Result};
use crate::graph::DependencyGraph;
use crate::store::{GroupStore, WorkloadStore, bounded};
use crate::types::{InvalidGroup, PassOutcome, PassPhase, ReconcileResult};
use crate::{policy, readiness, status};

/// Per-group exclusion: at most one pass per group is in flight.
#[derive(Default)]
struct GroupLocks {
    locks: Mutex<HashMap<ObjectKey, Arc<Mutex<()>>>>,
}

impl GroupLocks {
    async fn acquire(&self, key: &ObjectKey) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            Arc::clone(locks.entry(key.clone()).or_default())
        };
        lock.lock_owned().await
    }

    /// Drop the entry for `key` while still holding its guard, unless another
    /// pass holds or waits on the same mutex.
    async fn forget(&self, key: &ObjectKey, guard: OwnedMutexGuard<()>) {
        let mut locks = self.locks.lock().await;
        let idle = locks.get(key).is_some_and(|lock| {
            Arc::ptr_eq(lock, OwnedMutexGuard::mutex(&guard)) && Arc::strong_count(lock) <= 2
        });
        if idle {
            locks.remove(key);
        }
        drop(guard);
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }
}

/// Dependency-ordered scaling reconciler.
pub struct Reconciler {
    groups: Arc<dyn GroupStore>,
    workloads: Arc<dyn WorkloadStore>,
    config: ReconcilerConfig,
    locks: GroupLocks,
}

impl Reconciler {
    /// Create a new reconciler.
    pub fn new(
        groups: Arc<dyn GroupStore>,
        workloads: Arc<dyn WorkloadStore>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            groups,
            workloads,
            config,
            locks: GroupLocks::default(),
        }
    }

    /// Run one pass for a group.
    ///
    /// Passes for the same group are serialized; passes for different groups
    /// run independently. Cancellation takes effect before the next store
    /// call; mutations already issued stay applied.
    ///
    /// # Errors
    /// Returns a store failure, conflict, timeout or `Error::Cancelled`. A
    /// cycle, duplicate item or invalid field is not an error: it is reported
    /// in the outcome and in the group's status.
    pub async fn reconcile(
        &self,
        key: &ObjectKey,
        cancel: &CancellationToken,
    ) -> Result<ReconcileResult> {
        let guard = self.locks.acquire(key).await;
        let result = self.pass(key, cancel).await;
        enter(key, PassPhase::Idle);

        match &result {
            Ok(r) if r.outcome == PassOutcome::GroupNotFound => {
                self.locks.forget(key, guard).await;
            }
            Ok(r) => info!(
                group = %key,
                outcome = ?r.outcome,
                mutations = r.mutations.len(),
                ready = r.ready_items.len(),
                status_written = r.status_written,
                "Pass complete"
            ),
            Err(Error::Cancelled) => debug!(group = %key, "Pass cancelled"),
            Err(e) => warn!(
                group = %key,
                error = %e,
                retryable = e.is_retryable(),
                "Pass aborted"
            ),
        }
        result
    }

    async fn pass(&self, key: &ObjectKey, cancel: &CancellationToken) -> Result<ReconcileResult> {
        enter(key, PassPhase::Loading);
        let loaded = bounded(
            "get group",
            key,
            self.config.store_timeout,
            cancel,
            self.groups.get(key),
        )
        .await?;
        let Some(group) = loaded else {
            info!(group = %key, "Group not found, dropping");
            return Ok(ReconcileResult::group_not_found());
        };

        enter(key, PassPhase::Validating);
        let graph = match validated_graph(&group) {
            Ok(graph) => graph,
            Err(invalid) => return self.report_invalid(key, &group, &invalid, cancel).await,
        };
        for (item, dep) in graph.dangling() {
            warn!(
                group = %key,
                item = %item,
                dependency = %dep,
                "Dependency names no item in the group"
            );
        }

        enter(key, PassPhase::Evaluating);
        let items = &group.spec.items;
        let observation =
            readiness::evaluate(self.workloads.as_ref(), key, items, &self.config, cancel).await?;
        let decisions = policy::decide(items, &observation.readiness);

        enter(key, PassPhase::Applying);
        let mutations = policy::apply(
            self.workloads.as_ref(),
            key,
            &decisions,
            &observation,
            &self.config,
            cancel,
        )
        .await?;

        enter(key, PassPhase::Reporting);
        let ready_items = policy::ready_items(&decisions);
        let next = status::completed(
            &group.status,
            group.metadata.generation,
            items,
            ready_items.clone(),
        );
        let status_written = self.write_status(key, &group, next, cancel).await?;

        Ok(ReconcileResult {
            outcome: PassOutcome::CompletedClean,
            mutations,
            ready_items,
            status_written,
            requeue_after: Some(self.config.requeue_after),
        })
    }

    async fn report_invalid(
        &self,
        key: &ObjectKey,
        group: &Group,
        invalid: &InvalidGroup,
        cancel: &CancellationToken,
    ) -> Result<ReconcileResult> {
        error!(group = %key, error = %invalid, "Group failed validation, holding all items");

        enter(key, PassPhase::Reporting);
        let next = status::invalid(&group.status, group.metadata.generation, invalid);
        let status_written = self.write_status(key, group, next, cancel).await?;

        Ok(ReconcileResult {
            outcome: invalid.outcome(),
            mutations: Vec::new(),
            ready_items: Vec::new(),
            status_written,
            requeue_after: Some(self.config.requeue_after),
        })
    }

    /// Persist `next` unless the stored status already matches.
    async fn write_status(
        &self,
        key: &ObjectKey,
        group: &Group,
        next: GroupStatus,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        if !status::needs_write(&group.status, &next) {
            debug!(group = %key, "Status unchanged");
            return Ok(false);
        }
        bounded(
            "update status",
            key,
            self.config.store_timeout,
            cancel,
            self.groups.update_status(key, next, group.metadata.resource_version),
        )
        .await?;
        Ok(true)
    }

    /// Get the group store.
    pub fn group_store(&self) -> &Arc<dyn GroupStore> {
        &self.groups
    }

    /// Get the configuration.
    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }
}

fn enter(key: &ObjectKey, phase: PassPhase) {
    debug!(group = %key, phase = %phase, "Entering phase");
}

fn validated_graph(group: &Group) -> std::result::Result<DependencyGraph, InvalidGroup> {
    group
        .validate()
        .map_err(|e| InvalidGroup::Field(e.to_string()))?;
    let graph = DependencyGraph::build(&group.spec.items)?;
    graph.validate_acyclic()?;
    Ok(graph)
}

/// Builder for Reconciler.
pub struct ReconcilerBuilder {
    groups: Option<Arc<dyn GroupStore>>,
    workloads: Option<Arc<dyn WorkloadStore>>,
    config: ReconcilerConfig,
}

impl ReconcilerBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            groups: None,
            workloads: None,
            config: ReconcilerConfig::default(),
        }
    }

    /// Set the group store.
    pub fn with_group_store(mut self, groups: Arc<dyn GroupStore>) -> Self {
        self.groups = Some(groups);
        self
    }

    /// Set the workload store.
    pub fn with_workload_store(mut self, workloads: Arc<dyn WorkloadStore>) -> Self {
        self.workloads = Some(workloads);
        self
    }

    /// Set the configuration.
    pub fn with_config(mut self, config: ReconcilerConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the reconciler.
    ///
    /// # Errors
    /// Returns `Error::InvalidConfig` when a store is missing or the
    /// configuration is unusable.
    pub fn build(self) -> Result<Reconciler> {
        let groups = self
            .groups
            .ok_or_else(|| Error::invalid_config("group store is required"))?;
        let workloads = self
            .workloads
            .ok_or_else(|| Error::invalid_config("workload store is required"))?;
        self.config.validate()?;
        Ok(Reconciler::new(groups, workloads, self.config))
    }
}

impl Default for ReconcilerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
