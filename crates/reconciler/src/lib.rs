//! Dependency-ordered scaling reconciler.
//!
//! This crate implements a reconciliation pattern inspired by Kubernetes:
//! a group declares workload items and the items each one depends on, and
//! every pass drives each workload toward its target only while all of its
//! dependencies are ready.
//!
//! # Key Concepts
//!
//! ## Pass
//!
//! One invocation of [`Reconciler::reconcile`] for one group:
//! 1. Load the group
//! 2. Validate the dependency graph (duplicates, cycles)
//! 3. Read every workload and judge its readiness
//! 4. Scale each item to its target, or hold it at zero
//! 5. Write the group's status
//!
//! A cycle or duplicate item stops the pass before any workload is touched
//! and is reported through the group's `Ready` condition.
//!
//! ## Controller
//!
//! [`Controller`] runs passes for every group in the store, requeueing after
//! a fixed delay and backing off after failures.
//!
//! # Example
//!
//! ```ignore
//! use depgroup_reconciler::{
//!     Controller, ControllerConfig, InMemoryGroupStore, InMemoryWorkloadStore,
//!     ReconcilerBuilder,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> depgroup_reconciler::Result<()> {
//!     let reconciler = ReconcilerBuilder::new()
//!         .with_group_store(InMemoryGroupStore::new_arc())
//!         .with_workload_store(InMemoryWorkloadStore::new_arc())
//!         .build()?;
//!
//!     let controller = Controller::new(Arc::new(reconciler), ControllerConfig::default())?;
//!     let handle = controller.handle();
//!     tokio::spawn(async move {
//!         let _ = tokio::signal::ctrl_c().await;
//!         handle.shutdown();
//!     });
//!     controller.run().await;
//!     Ok(())
//! }
//! ```

#![forbid(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod config;
pub mod error;
pub mod graph;
pub mod r#loop;
pub mod memory;
pub mod policy;
pub mod readiness;
pub mod reconciler;
pub mod status;
pub mod store;
pub mod types;

// Re-export main types
pub use config::{Config, ControllerConfig, ReconcilerConfig};
pub use error::{Error, Result};
pub use graph::{DependencyGraph, GraphError};
pub use memory::{Fault, InMemoryGroupStore, InMemoryWorkloadStore, Operation, StoreCall};
pub use r#loop::{Controller, ControllerHandle};
pub use readiness::Observation;
pub use reconciler::{Reconciler, ReconcilerBuilder};
pub use store::{GroupStore, WorkloadStore};
pub use types::{InvalidGroup, Mutation, PassOutcome, PassPhase, ReadinessMap, ReconcileResult};
