//! Resource-level failures. These never abort a cycle.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::resource::ResourceId;

/// A failure attributed to a single resource or manifest document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceError {
    /// Absent when the document could not be parsed far enough to identify it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<ResourceId>,
    /// Manifest path or other origin of the resource.
    pub source: String,
    pub error: String,
}

impl ResourceError {
    pub fn new(resource_id: ResourceId, source: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            resource_id: Some(resource_id),
            source: source.into(),
            error: error.into(),
        }
    }

    /// A document that failed to parse.
    pub fn unidentified(source: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            resource_id: None,
            source: source.into(),
            error: error.into(),
        }
    }
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.resource_id {
            Some(id) => write!(f, "{} ({}): {}", id, self.source, self.error),
            None => write!(f, "{}: {}", self.source, self.error),
        }
    }
}

/// Per-resource errors from one apply run, keyed by resource ID.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncError {
    errors: BTreeMap<ResourceId, ResourceError>,
}

impl SyncError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: ResourceId, error: ResourceError) {
        self.errors.insert(id, error);
    }

    pub fn get(&self, id: &ResourceId) -> Option<&ResourceError> {
        self.errors.get(id)
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.errors.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &ResourceId> {
        self.errors.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResourceError> {
        self.errors.values()
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} resource(s) failed to sync", self.errors.len())?;
        for err in self.errors.values() {
            write!(f, "\n  {}", err)?;
        }
        Ok(())
    }
}

impl std::error::Error for SyncError {}
