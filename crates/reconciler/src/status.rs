//! Status aggregation.
//!
//! Every pass recomputes the whole status from the pass's own results; nothing
//! is merged from the stored value except the condition transition time.

use depgroup_core::{CONDITION_READY, Condition, ConditionStatus, GroupStatus, Item, reason};
use itertools::Itertools;

use crate::types::InvalidGroup;

/// Status after a pass that ran every phase.
#[must_use]
pub fn completed(
    current: &GroupStatus,
    generation: u64,
    items: &[Item],
    ready_items: Vec<String>,
) -> GroupStatus {
    let waiting: Vec<&str> = items
        .iter()
        .map(|item| item.name.as_str())
        .filter(|name| !ready_items.iter().any(|ready| ready == name))
        .collect();

    let condition = if waiting.is_empty() {
        Condition::new(
            CONDITION_READY,
            ConditionStatus::True,
            reason::ALL_ITEMS_READY,
            format!("{} of {} items ready", ready_items.len(), items.len()),
        )
    } else {
        Condition::new(
            CONDITION_READY,
            ConditionStatus::False,
            reason::PROGRESSING,
            format!(
                "{} of {} items ready, waiting on {}",
                ready_items.len(),
                items.len(),
                waiting.iter().join(", ")
            ),
        )
    };

    next_status(current, generation, ready_items, condition)
}

/// Status after a pass stopped by a validation failure. Ready items are
/// cleared.
#[must_use]
pub fn invalid(current: &GroupStatus, generation: u64, error: &InvalidGroup) -> GroupStatus {
    let condition = Condition::new(
        CONDITION_READY,
        ConditionStatus::False,
        error.reason(),
        error.to_string(),
    );
    next_status(current, generation, Vec::new(), condition)
}

/// Whether `next` differs from what the store already holds.
#[must_use]
pub fn needs_write(current: &GroupStatus, next: &GroupStatus) -> bool {
    current != next
}

fn next_status(
    current: &GroupStatus,
    generation: u64,
    ready_items: Vec<String>,
    condition: Condition,
) -> GroupStatus {
    let mut next = current.clone();
    next.observed_generation = Some(generation);
    next.ready_items = ready_items;
    next.set_condition(condition);
    next
}
