//! # depgroup-core
//!
//! Declarative schema for dependency-ordered workload groups.
//!
//! A [`Group`] lists workload [`Item`]s, each with an optional target
//! capacity and the names of the items it depends on. The reconciliation
//! engine reads groups and live [`Workload`]s and writes a [`GroupStatus`]
//! back. This crate holds only the data model, manifest parsing and
//! field-level validation; graph-level checks live in the engine.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod group;
pub mod meta;
pub mod workload;

pub use error::{Error, Result};
pub use group::{
    CONDITION_READY, Condition, ConditionStatus, DEFAULT_TARGET_CAPACITY, Group, GroupSpec,
    GroupStatus, Item, reason,
};
pub use meta::{DEFAULT_NAMESPACE, ObjectKey, ObjectMeta};
pub use workload::Workload;
