//! Readiness evaluation.
//!
//! Reads every item's workload once per pass and classifies it. A workload
//! that does not exist is simply not ready; any other read failure aborts the
//! pass so that a transient error can never look like "not ready" and drive a
//! scale-down.

use std::collections::HashMap;

use depgroup_core::{Item, ObjectKey, Workload};
use futures::stream::{self, StreamExt, TryStreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::ReconcilerConfig;
use crate::error::Result;
use crate::store::{WorkloadStore, bounded};
use crate::types::ReadinessMap;

/// Snapshot of live state taken after every read of the pass completed.
#[derive(Debug, Clone, Default)]
pub struct Observation {
    pub readiness: ReadinessMap,
    /// Live workloads by item name; absent items are missing here too.
    pub workloads: HashMap<String, Workload>,
}

impl Observation {
    /// Live workload backing an item, if it exists.
    #[must_use]
    pub fn workload(&self, name: &str) -> Option<&Workload> {
        self.workloads.get(name)
    }
}

/// Point-in-time readiness of one item against its live workload.
#[must_use]
pub fn is_ready(item: &Item, workload: &Workload) -> bool {
    workload.available_capacity >= item.effective_target() && workload.is_observed()
}

/// Read every item's workload and build the pass snapshot.
///
/// Reads run concurrently up to `max_concurrent_reads`; results keep
/// declaration order.
///
/// # Errors
/// Returns the first store failure, timeout or cancellation.
pub async fn evaluate(
    store: &dyn WorkloadStore,
    group: &ObjectKey,
    items: &[Item],
    config: &ReconcilerConfig,
    cancel: &CancellationToken,
) -> Result<Observation> {
    let pending: Vec<_> = items
        .iter()
        .map(|item| read_one(store, group, item, config, cancel))
        .collect();
    let reads: Vec<(&Item, Option<Workload>)> = stream::iter(pending)
        .buffered(config.max_concurrent_reads.max(1))
        .try_collect()
        .await?;

    let mut observation = Observation::default();
    for (item, live) in reads {
        match live {
            None => {
                warn!(
                    group = %group,
                    item = %item.name,
                    "Workload not found, treating as not ready"
                );
                observation.readiness.record(&item.name, false);
            }
            Some(workload) => {
                let ready = is_ready(item, &workload);
                debug!(
                    group = %group,
                    item = %item.name,
                    ready,
                    available = workload.available_capacity,
                    target = item.effective_target(),
                    observed = workload.is_observed(),
                    "Evaluated readiness"
                );
                observation.readiness.record(&item.name, ready);
                observation.workloads.insert(item.name.clone(), workload);
            }
        }
    }

    Ok(observation)
}

async fn read_one<'a>(
    store: &dyn WorkloadStore,
    group: &ObjectKey,
    item: &'a Item,
    config: &ReconcilerConfig,
    cancel: &CancellationToken,
) -> Result<(&'a Item, Option<Workload>)> {
    let key = group.sibling(&item.name);
    let live = bounded(
        "get workload",
        &key,
        config.store_timeout,
        cancel,
        store.get(&key),
    )
    .await?;
    Ok((item, live))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::memory::{Fault, InMemoryWorkloadStore, Operation};

    fn group_key() -> ObjectKey {
        ObjectKey::new("default", "shop")
    }

    #[test]
    fn test_ready_needs_target_and_observed_version() {
        let item = Item::new("api").with_target(3);
        assert!(is_ready(&item, &Workload::new("default", "api").running(3)));
        assert!(!is_ready(&item, &Workload::new("default", "api").running(2)));
        assert!(!is_ready(&item, &Workload::new("default", "api").running(3).stale()));
    }

    #[test]
    fn test_unset_target_means_one() {
        let item = Item::new("db");
        assert!(is_ready(&item, &Workload::new("default", "db").running(1)));
        assert!(!is_ready(&item, &Workload::new("default", "db")));
    }

    #[tokio::test]
    async fn test_missing_workload_is_not_ready() {
        let store = InMemoryWorkloadStore::new();
        store.insert(Workload::new("default", "db").running(1)).await;
        let items = vec![Item::new("db"), Item::new("cache")];

        let observation = evaluate(
            &store,
            &group_key(),
            &items,
            &ReconcilerConfig::default(),
            &CancellationToken::new(),
        )
        .await;

        let observation = observation.ok();
        assert!(observation.as_ref().is_some_and(|o| o.readiness.is_ready("db")));
        assert!(observation.as_ref().is_some_and(|o| !o.readiness.is_ready("cache")));
        assert!(observation.as_ref().is_some_and(|o| o.workload("cache").is_none()));
    }

    #[tokio::test]
    async fn test_read_failure_aborts() {
        let store = InMemoryWorkloadStore::new();
        store.insert(Workload::new("default", "db").running(1)).await;
        store
            .fail_next(Operation::Get, &group_key().sibling("db"), Fault::Unavailable)
            .await;

        let result = evaluate(
            &store,
            &group_key(),
            &[Item::new("db")],
            &ReconcilerConfig::default(),
            &CancellationToken::new(),
        )
        .await;

        assert!(matches!(result, Err(Error::StoreFailed { .. })));
    }

    #[tokio::test]
    async fn test_cancelled_pass_reads_nothing() {
        let store = InMemoryWorkloadStore::new();
        store.insert(Workload::new("default", "db").running(1)).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = evaluate(
            &store,
            &group_key(),
            &[Item::new("db")],
            &ReconcilerConfig::default(),
            &cancel,
        )
        .await;

        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(store.calls().await.is_empty());
    }
}
