//! BDD tests: the controller loop scheduling passes per group.

use std::sync::Arc;
use std::time::Duration;

use depgroup_core::{Group, Item, ObjectKey, Workload};
use depgroup_reconciler::{
    Controller, ControllerConfig, ControllerHandle, Fault, InMemoryGroupStore,
    InMemoryWorkloadStore, Operation, Reconciler, ReconcilerConfig,
};
use tokio::task::JoinHandle;

type TestResult = Result<(), Box<dyn std::error::Error>>;

struct Running {
    groups: Arc<InMemoryGroupStore>,
    workloads: Arc<InMemoryWorkloadStore>,
    handle: ControllerHandle,
    task: JoinHandle<()>,
}

async fn seeded(
    groups: Vec<Group>,
    workloads: Vec<Workload>,
) -> (Arc<InMemoryGroupStore>, Arc<InMemoryWorkloadStore>) {
    let group_store = InMemoryGroupStore::new_arc();
    let workload_store = InMemoryWorkloadStore::new_arc();
    for group in groups {
        group_store.insert(group).await;
    }
    for workload in workloads {
        workload_store.insert(workload).await;
    }
    (group_store, workload_store)
}

async fn start(
    groups: Vec<Group>,
    workloads: Vec<Workload>,
) -> Result<Running, Box<dyn std::error::Error>> {
    let (group_store, workload_store) = seeded(groups, workloads).await;
    start_with(group_store, workload_store)
}

/// Start a controller whose requeue delay is long enough that only triggers
/// and retries cause extra passes.
fn start_with(
    group_store: Arc<InMemoryGroupStore>,
    workload_store: Arc<InMemoryWorkloadStore>,
) -> Result<Running, Box<dyn std::error::Error>> {
    let reconciler = Reconciler::new(
        group_store.clone(),
        workload_store.clone(),
        ReconcilerConfig::default().requeue_after(Duration::from_secs(3600)),
    );
    let config = ControllerConfig {
        resync_interval: Duration::from_secs(3600),
        backoff_base: Duration::from_millis(10),
        backoff_max: Duration::from_millis(100),
        backoff_jitter: false,
    };
    let controller = Controller::new(Arc::new(reconciler), config)?;
    let handle = controller.handle();
    let task = tokio::spawn(controller.run());

    Ok(Running {
        groups: group_store,
        workloads: workload_store,
        handle,
        task,
    })
}

const ATTEMPTS: usize = 200;
const POLL: Duration = Duration::from_millis(10);

/// Wait up to two seconds for a workload to reach `want`.
async fn wait_for_capacity(store: &InMemoryWorkloadStore, key: &ObjectKey, want: u32) -> bool {
    for _ in 0..ATTEMPTS {
        if store.workload(key).await.and_then(|w| w.current_capacity) == Some(want) {
            return true;
        }
        tokio::time::sleep(POLL).await;
    }
    false
}

/// Wait up to two seconds for the first status write.
async fn wait_for_status_write(store: &InMemoryGroupStore) -> bool {
    for _ in 0..ATTEMPTS {
        if store.status_writes().await >= 1 {
            return true;
        }
        tokio::time::sleep(POLL).await;
    }
    false
}

/// Wait up to two seconds for the controller to drop its worker for `key`.
async fn wait_until_forgotten(handle: &ControllerHandle, key: &ObjectKey) -> bool {
    for _ in 0..ATTEMPTS {
        if !handle.trigger(key).await {
            return true;
        }
        tokio::time::sleep(POLL).await;
    }
    false
}

fn shop() -> Group {
    Group::new("default", "shop")
        .with_item(Item::new("db"))
        .with_item(Item::new("api").with_target(2).depends_on(["db"]))
}

#[tokio::test]
async fn given_new_group_when_controller_starts_then_first_pass_runs() -> TestResult {
    // GIVEN / WHEN
    let running = start(vec![shop()], vec![Workload::new("default", "db")]).await?;
    let db = ObjectKey::new("default", "db");

    // THEN
    assert!(wait_for_capacity(&running.workloads, &db, 1).await);

    running.handle.shutdown();
    running.task.await?;
    Ok(())
}

#[tokio::test]
async fn given_settled_dependency_when_triggered_then_dependent_scales_without_waiting()
-> TestResult {
    // GIVEN: the first pass has requested db, api is held down
    let running = start(
        vec![shop()],
        vec![Workload::new("default", "db"), Workload::new("default", "api")],
    )
    .await?;
    let key = ObjectKey::new("default", "shop");
    let db = key.sibling("db");
    let api = key.sibling("api");
    assert!(wait_for_capacity(&running.workloads, &api, 0).await);

    // WHEN: db comes up and the group is triggered
    running.workloads.settle(&db).await;
    assert!(running.handle.trigger(&key).await);

    // THEN: api scales long before the hour-long requeue
    assert!(wait_for_capacity(&running.workloads, &api, 2).await);

    running.handle.shutdown();
    running.task.await?;
    Ok(())
}

#[tokio::test]
async fn given_failing_store_when_pass_fails_then_worker_retries_with_backoff() -> TestResult {
    // GIVEN: the first group read fails
    let group = shop();
    let key = group.key();
    let (groups, workloads) = seeded(vec![group], vec![Workload::new("default", "db")]).await;
    groups.fail_next(Operation::Get, &key, Fault::Unavailable).await;

    let running = start_with(groups, workloads)?;

    // WHEN / THEN: a retry after the backoff writes the status
    assert!(wait_for_status_write(&running.groups).await);

    running.handle.shutdown();
    running.task.await?;
    Ok(())
}

#[tokio::test]
async fn given_deleted_group_when_triggered_then_worker_exits() -> TestResult {
    // GIVEN: a running worker
    let running = start(vec![shop()], vec![Workload::new("default", "db")]).await?;
    let key = ObjectKey::new("default", "shop");
    assert!(wait_for_status_write(&running.groups).await);

    // WHEN: the group is deleted and its worker woken
    running.groups.remove(&key).await;
    assert!(running.handle.trigger(&key).await);

    // THEN: the worker forgets the group
    assert!(wait_until_forgotten(&running.handle, &key).await);

    running.handle.shutdown();
    running.task.await?;
    Ok(())
}

#[tokio::test]
async fn given_group_added_later_when_triggered_then_resync_picks_it_up() -> TestResult {
    // GIVEN: a controller with no groups
    let running = start(Vec::new(), vec![Workload::new("default", "db")]).await?;
    let group = shop();
    let key = group.key();

    // WHEN: an unknown key is triggered, which starts a resync
    running.groups.insert(group).await;
    running.handle.trigger(&key).await;

    // THEN: the resync spawns a worker for the new group
    let db = key.sibling("db");
    assert!(wait_for_capacity(&running.workloads, &db, 1).await);

    running.handle.shutdown();
    running.task.await?;
    Ok(())
}

#[tokio::test]
async fn given_running_controller_when_shutdown_then_run_returns() -> TestResult {
    // GIVEN
    let running = start(vec![shop()], Vec::new()).await?;

    // WHEN
    running.handle.shutdown();

    // THEN
    let joined = tokio::time::timeout(Duration::from_secs(2), running.task).await;
    assert!(joined.is_ok_and(|r| r.is_ok()));
    Ok(())
}
