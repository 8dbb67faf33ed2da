//! Full-state set difference between declared and observed resources.

use crate::cluster::Verb;
use crate::resource::{Resource, ResourceId, ResourceSet};

/// One resource-level operation sent to the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncAction {
    pub verb: Verb,
    pub id: ResourceId,
    /// Manifest path, or `cluster` for deletes of exported objects.
    pub source: String,
    pub payload: Vec<u8>,
}

impl SyncAction {
    pub fn apply(resource: &Resource) -> Self {
        Self {
            verb: Verb::Apply,
            id: resource.id().clone(),
            source: resource.source().to_string(),
            payload: resource.bytes().to_vec(),
        }
    }

    pub fn delete(resource: &Resource) -> Self {
        Self {
            verb: Verb::Delete,
            id: resource.id().clone(),
            source: resource.source().to_string(),
            payload: resource.identity_document(),
        }
    }
}

/// Unordered deletes and applies for one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub deletes: Vec<SyncAction>,
    pub applies: Vec<SyncAction>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.deletes.is_empty() && self.applies.is_empty()
    }

    pub fn len(&self) -> usize {
        self.deletes.len() + self.applies.len()
    }
}

/// Stages a delete for every observed resource that is no longer declared and
/// an apply for every declared resource.
///
/// Addons and ignored resources are left alone, whichever side they show up on.
pub fn plan(declared: &ResourceSet, observed: &ResourceSet) -> ChangeSet {
    let mut changes = ChangeSet::default();

    for resource in observed.iter() {
        if declared.contains(resource.id()) {
            continue;
        }
        if resource.is_excluded() {
            tracing::debug!(resource = %resource.id(), "not deleting externally owned resource");
            continue;
        }
        changes.deletes.push(SyncAction::delete(resource));
    }

    for resource in declared.iter() {
        let observed_excluded = observed
            .get(resource.id())
            .is_some_and(Resource::is_excluded);
        if resource.is_excluded() || observed_excluded {
            tracing::debug!(resource = %resource.id(), "not applying excluded resource");
            continue;
        }
        changes.applies.push(SyncAction::apply(resource));
    }

    changes
}
