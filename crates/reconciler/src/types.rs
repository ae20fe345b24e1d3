//! Core types for the reconciler.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use depgroup_core::reason;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::graph::GraphError;

/// Pass-scoped readiness judgement per item name.
///
/// Rebuilt from scratch every pass. A name that is absent from the map
/// (a dangling dependency, or a workload that was never found) reads as not
/// ready.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadinessMap {
    ready: HashMap<String, bool>,
}

impl ReadinessMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an item's readiness. The first record for a name wins.
    pub fn record(&mut self, name: impl Into<String>, ready: bool) {
        self.ready.entry(name.into()).or_insert(ready);
    }

    /// Whether the named item is ready.
    #[must_use]
    pub fn is_ready(&self, name: &str) -> bool {
        self.ready.get(name).copied().unwrap_or(false)
    }

    /// Whether every named dependency is ready. Vacuously true for none.
    #[must_use]
    pub fn all_ready<'a, I>(&self, names: I) -> bool
    where
        I: IntoIterator<Item = &'a String>,
    {
        names.into_iter().all(|name| self.is_ready(name))
    }
}

impl FromIterator<(String, bool)> for ReadinessMap {
    fn from_iter<T: IntoIterator<Item = (String, bool)>>(iter: T) -> Self {
        let mut map = Self::new();
        for (name, ready) in iter {
            map.record(name, ready);
        }
        map
    }
}

/// A workload mutation issued during a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Mutation {
    /// Capacity changed from `from` (None = never set) to `to`.
    ScaleWorkload {
        name: String,
        from: Option<u32>,
        to: u32,
    },
    /// Priority class copied onto the workload.
    SetPriorityClass { name: String, class: String },
}

impl Mutation {
    /// Name of the workload this mutation targets.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::ScaleWorkload { name, .. } | Self::SetPriorityClass { name, .. } => name,
        }
    }

    /// Get a description of the mutation.
    #[must_use]
    pub fn description(&self) -> String {
        match self {
            Self::ScaleWorkload { name, from, to } => match from {
                Some(from) => format!("scale {name} from {from} to {to}"),
                None => format!("scale {name} to {to}"),
            },
            Self::SetPriorityClass { name, class } => {
                format!("set priority class of {name} to {class}")
            }
        }
    }
}

/// How a pass ended when it did not abort on an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PassOutcome {
    /// Every phase ran.
    CompletedClean,
    /// The dependency graph has a cycle; nothing was mutated.
    CompletedWithCycle,
    /// A field is unusable or an item name is declared twice; nothing was
    /// mutated.
    CompletedInvalid,
    /// The group no longer exists.
    GroupNotFound,
}

impl PassOutcome {
    /// Whether the group failed validation.
    #[must_use]
    pub const fn is_validation_failure(self) -> bool {
        matches!(self, Self::CompletedWithCycle | Self::CompletedInvalid)
    }
}

/// Why a stored group cannot be rolled out. Recorded in status, never
/// returned as an error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidGroup {
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// Metadata or item field rejected by schema validation.
    #[error("{0}")]
    Field(String),
}

impl InvalidGroup {
    /// Condition reason written to status.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::Graph(GraphError::CycleDetected { .. }) => reason::CYCLE_DETECTED,
            Self::Graph(GraphError::DuplicateItem(_)) => reason::DUPLICATE_ITEM,
            Self::Field(_) => reason::INVALID_FIELD,
        }
    }

    /// Outcome reported for the pass.
    #[must_use]
    pub const fn outcome(&self) -> PassOutcome {
        match self {
            Self::Graph(GraphError::CycleDetected { .. }) => PassOutcome::CompletedWithCycle,
            Self::Graph(GraphError::DuplicateItem(_)) | Self::Field(_) => {
                PassOutcome::CompletedInvalid
            }
        }
    }
}

/// Phases of a single pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassPhase {
    Idle,
    Loading,
    Validating,
    Evaluating,
    Applying,
    Reporting,
}

impl fmt::Display for PassPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Loading => "loading",
            Self::Validating => "validating",
            Self::Evaluating => "evaluating",
            Self::Applying => "applying",
            Self::Reporting => "reporting",
        };
        f.write_str(name)
    }
}

/// Result of one reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileResult {
    pub outcome: PassOutcome,
    /// Workload mutations issued, in order.
    pub mutations: Vec<Mutation>,
    /// Items both self-ready and dependency-ready this pass.
    pub ready_items: Vec<String>,
    /// Whether the status was written.
    pub status_written: bool,
    /// When the next pass should run; `None` to stop.
    #[serde(with = "optional_millis")]
    pub requeue_after: Option<Duration>,
}

impl ReconcileResult {
    /// Result for a group that no longer exists.
    #[must_use]
    pub const fn group_not_found() -> Self {
        Self {
            outcome: PassOutcome::GroupNotFound,
            mutations: Vec::new(),
            ready_items: Vec::new(),
            status_written: false,
            requeue_after: None,
        }
    }

    /// Whether the pass found nothing to change.
    #[must_use]
    pub fn converged(&self) -> bool {
        self.mutations.is_empty() && !self.status_written
    }
}

/// Serialization helper for an optional Duration as milliseconds.
mod optional_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        duration: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        duration
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}
