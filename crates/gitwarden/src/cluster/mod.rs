//! Cluster collaborator: declared/observed state and the apply transport.

pub mod kubectl;

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

pub use kubectl::Kubectl;

use crate::manifest::{self, LoadedManifests, ManifestError};
use crate::resource::ResourceSet;

/// Direction of a sync action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Verb {
    Apply,
    Delete,
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verb::Apply => write!(f, "apply"),
            Verb::Delete => write!(f, "delete"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The cluster refused the payload; isolated per resource by the caller.
    #[error("{verb} rejected: {message}")]
    Rejected { verb: Verb, message: String },

    /// The cluster could not be reached at all.
    #[error("cluster unavailable: {0}")]
    Unavailable(String),
}

impl TransportError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, TransportError::Unavailable(_))
    }
}

#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("Failed to run kubectl: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("kubectl {command} timed out after {secs}s")]
    Timeout { command: String, secs: u64 },

    #[error("kubectl {command} failed: {message}")]
    Command { command: String, message: String },

    #[error("Unexpected kubectl output: {0}")]
    Output(String),

    #[error(transparent)]
    Manifest(#[from] ManifestError),
}

/// Sends multi-document payloads to the cluster.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, verb: Verb, payload: &[u8]) -> Result<(), TransportError>;
}

/// Declared and observed state, plus the transport used to converge them.
#[async_trait]
pub trait Cluster: Send + Sync {
    /// Parses manifests from a checkout.
    fn load_declared(&self, base: &Path, dirs: &[PathBuf]) -> Result<LoadedManifests, ManifestError> {
        manifest::load_manifests(base, dirs)
    }

    /// Raw dump of the objects considered observed state.
    async fn export(&self) -> Result<Vec<u8>, ClusterError>;

    fn parse_exported(&self, bytes: &[u8]) -> Result<ResourceSet, ClusterError> {
        Ok(manifest::parse_exported(bytes)?)
    }

    fn transport(&self) -> &dyn Transport;
}

/// Coordinates of a single cluster object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRef {
    pub namespace: String,
    pub kind: String,
    pub name: String,
}

impl ObjectRef {
    pub fn new(namespace: impl Into<String>, kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            kind: kind.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.namespace, self.kind, self.name)
    }
}

/// Annotations of an object together with the version they were read at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnnotatedObject {
    pub resource_version: String,
    pub annotations: BTreeMap<String, String>,
}

/// A JSON merge patch touching only annotations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnnotationPatch {
    /// When set, the patch only applies if the object is still at this version.
    pub resource_version: Option<String>,
    /// `None` removes the annotation.
    pub annotations: BTreeMap<String, Option<String>>,
}

impl AnnotationPatch {
    pub fn set(key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut patch = Self::default();
        patch.annotations.insert(key.into(), Some(value.into()));
        patch
    }

    pub fn remove(key: impl Into<String>) -> Self {
        let mut patch = Self::default();
        patch.annotations.insert(key.into(), None);
        patch
    }

    pub fn at_version(mut self, resource_version: impl Into<String>) -> Self {
        self.resource_version = Some(resource_version.into());
        self
    }

    /// Renders the merge patch body.
    pub fn to_json(&self) -> serde_json::Value {
        let mut metadata = serde_json::Map::new();
        if let Some(rv) = &self.resource_version {
            metadata.insert("resourceVersion".to_string(), serde_json::Value::from(rv.clone()));
        }
        let annotations: serde_json::Map<String, serde_json::Value> = self
            .annotations
            .iter()
            .map(|(k, v)| {
                (
                    k.clone(),
                    v.clone()
                        .map(serde_json::Value::from)
                        .unwrap_or(serde_json::Value::Null),
                )
            })
            .collect();
        metadata.insert("annotations".to_string(), serde_json::Value::Object(annotations));
        serde_json::json!({ "metadata": metadata })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    Applied,
    /// The object changed since the version the patch was conditioned on.
    Conflict,
}

/// Reads and merge-patches object annotations.
#[async_trait]
pub trait AnnotationStore: Send + Sync {
    /// `None` when the object does not exist.
    async fn read_annotations(&self, target: &ObjectRef) -> Result<Option<AnnotatedObject>, ClusterError>;

    async fn patch_annotations(
        &self,
        target: &ObjectRef,
        patch: &AnnotationPatch,
    ) -> Result<PatchOutcome, ClusterError>;
}
