//! CLI command handlers.
//!
//! All commands follow functional patterns:
//! - Zero unwraps, zero panics
//! - Result<T, Error> for all operations

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use depgroup_core::{Group, Workload};
use depgroup_reconciler::{
    Config, Controller, DependencyGraph, InMemoryGroupStore, InMemoryWorkloadStore,
    ReconcilerBuilder,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cli::Commands;

/// Execute a CLI command.
///
/// This is the main command dispatcher that routes to the appropriate handler.
pub async fn execute_command(command: Commands) -> Result<()> {
    match command {
        Commands::Validate { manifest } => cmd_validate(&manifest),

        Commands::Simulate {
            manifest,
            workloads,
            passes,
        } => cmd_simulate(&manifest, workloads.as_deref(), passes).await,

        Commands::Run {
            manifests,
            config,
            settle_secs,
        } => cmd_run(&manifests, config.as_deref(), Duration::from_secs(settle_secs)).await,
    }
}

fn load_group(path: &Path) -> Result<Group> {
    Group::from_path(path).with_context(|| format!("failed to load '{}'", path.display()))
}

/// Check a manifest the way a pass would, without touching any workload.
fn cmd_validate(manifest: &Path) -> Result<()> {
    let group = load_group(manifest)?;
    group
        .validate()
        .with_context(|| format!("group '{}' has invalid fields", group.key()))?;

    let duplicates = group.spec.duplicate_names();
    if !duplicates.is_empty() {
        bail!(
            "group '{}' declares {} more than once",
            group.key(),
            duplicates.join(", ")
        );
    }

    let graph = DependencyGraph::build(&group.spec.items)
        .with_context(|| format!("group '{}' is invalid", group.key()))?;
    let order = graph
        .rollout_order()
        .with_context(|| format!("group '{}' is invalid", group.key()))?;

    for (item, dep) in graph.dangling() {
        println!("warning: {item} depends on '{dep}', which is not an item of this group");
    }
    println!(
        "{}: {} items, {} dependencies, rollout order {}",
        group.key(),
        graph.node_count(),
        graph.edge_count(),
        order.join(" -> ")
    );
    for item in &order {
        let deps = graph.dependencies(item);
        if deps.is_empty() {
            println!("  {item}");
        } else {
            println!("  {item} <- {}", deps.join(", "));
        }
    }
    Ok(())
}

fn load_workloads(path: &Path) -> Result<Vec<Workload>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read '{}'", path.display()))?;
    serde_yaml::from_str(&content)
        .with_context(|| format!("failed to parse workloads in '{}'", path.display()))
}

/// Every item of the group as a fresh workload with no capacity set.
fn default_workloads(group: &Group) -> Vec<Workload> {
    group
        .spec
        .items
        .iter()
        .map(|item| Workload::new(&group.metadata.namespace, &item.name))
        .collect()
}

/// Run passes against in-memory stores, settling workloads in between.
async fn cmd_simulate(manifest: &Path, workloads: Option<&Path>, passes: u32) -> Result<()> {
    if passes == 0 {
        bail!("--passes must be at least 1");
    }
    let group = load_group(manifest)?;
    let key = group.key();
    let live = match workloads {
        Some(path) => load_workloads(path)?,
        None => default_workloads(&group),
    };

    let groups = InMemoryGroupStore::new_arc();
    let workload_store = InMemoryWorkloadStore::new_arc();
    groups.insert(group).await;
    for workload in live {
        workload_store.insert(workload).await;
    }

    let reconciler = ReconcilerBuilder::new()
        .with_group_store(groups.clone())
        .with_workload_store(workload_store.clone())
        .build()?;
    let cancel = CancellationToken::new();

    for pass in 1..=passes {
        let result = reconciler
            .reconcile(&key, &cancel)
            .await
            .with_context(|| format!("pass {pass} failed"))?;
        let report = json!({ "pass": pass, "result": result });
        println!("{}", serde_json::to_string_pretty(&report)?);

        if result.outcome.is_validation_failure() {
            break;
        }
        workload_store.settle_all().await;
    }

    if let Some(stored) = groups.group(&key).await {
        println!("{}", serde_json::to_string_pretty(&stored.status)?);
    }
    Ok(())
}

/// Run the controller with a simulated capacity manager until Ctrl+C.
async fn cmd_run(manifests: &[PathBuf], config: Option<&Path>, settle: Duration) -> Result<()> {
    let config = match config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    }
    .with_env_overrides()
    .context("invalid configuration")?;
    debug!(?config, "Loaded configuration");

    let groups = InMemoryGroupStore::new_arc();
    let workloads = InMemoryWorkloadStore::new_arc();
    for manifest in manifests {
        let group = load_group(manifest)?;
        for workload in default_workloads(&group) {
            if workloads.workload(&workload.key()).await.is_none() {
                workloads.insert(workload).await;
            }
        }
        info!(group = %group.key(), items = group.spec.items.len(), "Loaded group");
        groups.insert(group).await;
    }

    let reconciler = ReconcilerBuilder::new()
        .with_group_store(groups)
        .with_workload_store(workloads.clone())
        .with_config(config.reconciler)
        .build()?;
    let controller = Controller::new(Arc::new(reconciler), config.controller)?;
    let handle = controller.handle();

    let stop_manager = CancellationToken::new();
    let manager = tokio::spawn(capacity_manager(workloads, settle, stop_manager.clone()));
    let running = tokio::spawn(controller.run());

    info!("depgroup is running. Press Ctrl+C to stop.");
    wait_for_shutdown().await;

    handle.shutdown();
    running.await.context("controller task failed")?;
    stop_manager.cancel();
    manager.await.context("capacity manager task failed")?;
    info!("depgroup stopped gracefully");
    Ok(())
}

/// Stand-in for the external capacity manager: periodically brings every
/// workload's availability in line with its requested capacity.
async fn capacity_manager(
    workloads: Arc<InMemoryWorkloadStore>,
    every: Duration,
    stop: CancellationToken,
) {
    loop {
        tokio::select! {
            () = stop.cancelled() => break,
            () = tokio::time::sleep(every) => {
                workloads.settle_all().await;
                debug!("Capacity manager settled workloads");
            }
        }
    }
}

/// Wait for shutdown signal (Ctrl+C).
async fn wait_for_shutdown() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, initiating graceful shutdown"),
        Err(err) => warn!("Failed to listen for shutdown signal: {}", err),
    }
}
