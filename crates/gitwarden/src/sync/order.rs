//! Apply ordering by kind rank.

use std::cmp::Ordering;

use super::planner::SyncAction;

fn compare(a: &SyncAction, b: &SyncAction) -> Ordering {
    a.id.rank()
        .cmp(&b.id.rank())
        .then_with(|| a.id.name().cmp(b.id.name()))
        .then_with(|| a.id.namespace().cmp(b.id.namespace()))
        .then_with(|| a.id.kind().cmp(b.id.kind()))
}

/// Sorts applies: lower ranks first, ties broken by name.
pub fn apply_order(mut actions: Vec<SyncAction>) -> Vec<SyncAction> {
    actions.sort_by(compare);
    actions
}

/// Sorts deletes in the exact reverse of [`apply_order`].
pub fn delete_order(mut actions: Vec<SyncAction>) -> Vec<SyncAction> {
    actions.sort_by(|a, b| compare(b, a));
    actions
}
