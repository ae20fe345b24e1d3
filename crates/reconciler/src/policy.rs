//! Scale decision policy.
//!
//! Hold-down rule: an item runs at its effective target only while every
//! dependency is ready, and is pinned to zero otherwise. Mutations are issued
//! in declaration order and stop at the first failure; whatever was applied
//! before the failure stays applied.

use depgroup_core::{Item, ObjectKey, Workload};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::ReconcilerConfig;
use crate::error::Result;
use crate::readiness::Observation;
use crate::store::{WorkloadStore, bounded};
use crate::types::{Mutation, ReadinessMap};

/// What the policy wants for one item this pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision<'a> {
    pub item: &'a Item,
    /// Every `dependsOn` name is ready (vacuously true for none).
    pub deps_ready: bool,
    /// The item's own workload is ready.
    pub self_ready: bool,
    /// Capacity to request.
    pub desired: u32,
}

impl Decision<'_> {
    /// Ready for reporting: self-ready and dependency-ready.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        self.deps_ready && self.self_ready
    }
}

/// Decide every item against one readiness snapshot.
#[must_use]
pub fn decide<'a>(items: &'a [Item], readiness: &ReadinessMap) -> Vec<Decision<'a>> {
    items
        .iter()
        .map(|item| {
            let deps_ready = readiness.all_ready(&item.depends_on);
            Decision {
                item,
                deps_ready,
                self_ready: readiness.is_ready(&item.name),
                desired: if deps_ready { item.effective_target() } else { 0 },
            }
        })
        .collect()
}

/// Names of the items that are ready this pass, in declaration order.
#[must_use]
pub fn ready_items(decisions: &[Decision<'_>]) -> Vec<String> {
    decisions
        .iter()
        .filter(|d| d.is_ready())
        .map(|d| d.item.name.clone())
        .collect()
}

/// Issue the mutations the decisions call for.
///
/// Items whose workload is absent are skipped. A priority class change goes
/// out before the capacity change of the same item.
///
/// # Errors
/// Returns the first store failure, conflict, timeout or cancellation.
pub async fn apply(
    store: &dyn WorkloadStore,
    group: &ObjectKey,
    decisions: &[Decision<'_>],
    observation: &Observation,
    config: &ReconcilerConfig,
    cancel: &CancellationToken,
) -> Result<Vec<Mutation>> {
    let mut mutations = Vec::new();

    for decision in decisions {
        let name = &decision.item.name;
        let Some(observed) = observation.workload(name) else {
            debug!(group = %group, item = %name, "Skipping absent workload");
            continue;
        };
        let key = group.sibling(name);
        let mut live = observed.clone();

        if let Some(class) = priority_change(decision.item, &live) {
            bounded(
                "set priority class",
                &key,
                config.store_timeout,
                cancel,
                store.set_priority_class(&key, class, live.resource_version),
            )
            .await?;
            let mutation = Mutation::SetPriorityClass {
                name: name.clone(),
                class: class.to_string(),
            };
            info!(
                group = %group,
                item = %mutation.name(),
                action = %mutation.description(),
                "Set priority class"
            );
            mutations.push(mutation);

            // The write moved the resource version on.
            match bounded("get workload", &key, config.store_timeout, cancel, store.get(&key))
                .await?
            {
                Some(refreshed) => live = refreshed,
                None => continue,
            }
        }

        if live.current_capacity != Some(decision.desired) {
            bounded(
                "set capacity",
                &key,
                config.store_timeout,
                cancel,
                store.set_capacity(&key, decision.desired, live.resource_version),
            )
            .await?;
            let mutation = Mutation::ScaleWorkload {
                name: name.clone(),
                from: live.current_capacity,
                to: decision.desired,
            };
            info!(
                group = %group,
                item = %mutation.name(),
                action = %mutation.description(),
                current = ?live.current_capacity,
                desired = decision.desired,
                deps_ready = decision.deps_ready,
                "Scaled workload"
            );
            mutations.push(mutation);
        }
    }

    Ok(mutations)
}

fn priority_change<'a>(item: &'a Item, live: &Workload) -> Option<&'a str> {
    item.priority_class_name
        .as_deref()
        .filter(|class| live.priority_class_name.as_deref() != Some(*class))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::memory::{Fault, InMemoryWorkloadStore, Operation, StoreCall};
    use crate::readiness::evaluate;

    fn group_key() -> ObjectKey {
        ObjectKey::new("default", "shop")
    }

    fn readiness(entries: &[(&str, bool)]) -> ReadinessMap {
        entries
            .iter()
            .map(|(name, ready)| ((*name).to_string(), *ready))
            .collect()
    }

    async fn run(store: &InMemoryWorkloadStore, items: &[Item]) -> Result<Vec<Mutation>> {
        let config = ReconcilerConfig::default();
        let cancel = CancellationToken::new();
        let observation = evaluate(store, &group_key(), items, &config, &cancel).await?;
        let decisions = decide(items, &observation.readiness);
        apply(store, &group_key(), &decisions, &observation, &config, &cancel).await
    }

    #[test]
    fn test_no_dependencies_is_vacuously_ready() {
        let items = vec![Item::new("db").with_target(2)];
        let decisions = decide(&items, &ReadinessMap::new());
        let db = decisions.first();
        assert!(db.is_some_and(|d| d.deps_ready));
        assert_eq!(db.map(|d| d.desired), Some(2));
        assert!(db.is_some_and(|d| !d.is_ready()));
    }

    #[test]
    fn test_unready_dependency_holds_down() {
        let items = vec![Item::new("db"), Item::new("api").with_target(3).depends_on(["db"])];
        let decisions = decide(&items, &readiness(&[("db", false), ("api", true)]));
        assert_eq!(decisions.get(1).map(|d| d.desired), Some(0));
        assert!(ready_items(&decisions).is_empty());
    }

    #[test]
    fn test_dangling_dependency_holds_down() {
        let items = vec![Item::new("api").with_target(3).depends_on(["ghost"])];
        let decisions = decide(&items, &readiness(&[("api", true)]));
        assert!(decisions.first().is_some_and(|d| !d.deps_ready));
        assert_eq!(decisions.first().map(|d| d.desired), Some(0));
    }

    #[test]
    fn test_ready_items_requires_both_conditions() {
        let items = vec![Item::new("db"), Item::new("api").depends_on(["db"])];
        let decisions = decide(&items, &readiness(&[("db", true), ("api", true)]));
        assert_eq!(ready_items(&decisions), vec!["db", "api"]);
    }

    #[tokio::test]
    async fn test_unset_capacity_is_always_written() {
        let store = InMemoryWorkloadStore::new();
        store.insert(Workload::new("default", "db")).await;

        let mutations = run(&store, &[Item::new("db")]).await;

        assert_eq!(
            mutations.ok(),
            Some(vec![Mutation::ScaleWorkload {
                name: "db".to_string(),
                from: None,
                to: 1,
            }])
        );
    }

    #[tokio::test]
    async fn test_matching_capacity_is_left_alone() {
        let store = InMemoryWorkloadStore::new();
        store.insert(Workload::new("default", "db").running(1)).await;

        let mutations = run(&store, &[Item::new("db")]).await;

        assert_eq!(mutations.ok(), Some(Vec::new()));
        assert!(store.mutation_calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_priority_class_precedes_capacity() {
        let store = InMemoryWorkloadStore::new();
        store.insert(Workload::new("default", "db")).await;
        let items = vec![Item::new("db").with_target(2).with_priority_class("critical")];

        let mutations = run(&store, &items).await;

        assert_eq!(mutations.as_ref().map(Vec::len).ok(), Some(2));
        let calls = store.mutation_calls().await;
        assert!(matches!(
            calls.first(),
            Some(StoreCall::SetPriorityClass { class, .. }) if class == "critical"
        ));
        assert!(matches!(calls.get(1), Some(StoreCall::SetCapacity { capacity: 2, .. })));
    }

    #[tokio::test]
    async fn test_failure_stops_remaining_items() {
        let store = InMemoryWorkloadStore::new();
        store.insert(Workload::new("default", "a")).await;
        store.insert(Workload::new("default", "b")).await;
        store.insert(Workload::new("default", "c")).await;
        store
            .fail_next(Operation::SetCapacity, &group_key().sibling("b"), Fault::Conflict)
            .await;
        let items = vec![Item::new("a"), Item::new("b"), Item::new("c")];

        let result = run(&store, &items).await;

        assert!(matches!(result, Err(Error::Conflict { .. })));
        let a = store.workload(&group_key().sibling("a")).await;
        let c = store.workload(&group_key().sibling("c")).await;
        assert_eq!(a.and_then(|w| w.current_capacity), Some(1));
        assert_eq!(c.and_then(|w| w.current_capacity), None);
    }
}
