//! Git notes that jobs attach to the commits they push.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::events::{EventType, IncludeKind};
use crate::resource::ResourceId;

/// A note recorded by a job on the commit it produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub job_id: String,
    #[serde(flatten)]
    pub spec: NoteOperation,
    #[serde(default)]
    pub cause: NoteCause,
    /// Per-workload outcome of the job.
    #[serde(default)]
    pub result: BTreeMap<ResourceId, WorkloadResult>,
}

/// What the job did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum NoteOperation {
    /// User-requested image release.
    Image(ImageRelease),
    /// Release triggered by a new image appearing in a registry.
    Auto(AutomatedRelease),
    /// Policy changes on one or more workloads.
    Policy(BTreeMap<ResourceId, PolicyChange>),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteCause {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub user: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRelease {
    #[serde(default)]
    pub services: Vec<ResourceId>,
    pub image: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomatedRelease {
    #[serde(default)]
    pub changes: Vec<ImageChange>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageChange {
    pub resource_id: ResourceId,
    pub container: String,
    pub image: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyChange {
    #[serde(default)]
    pub add: BTreeMap<String, String>,
    #[serde(default)]
    pub remove: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadResult {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Note {
    pub fn decode(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw.trim())
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Workloads the job targeted.
    pub fn resource_ids(&self) -> BTreeSet<ResourceId> {
        match &self.spec {
            NoteOperation::Image(release) => release.services.iter().cloned().collect(),
            NoteOperation::Auto(release) => release
                .changes
                .iter()
                .map(|c| c.resource_id.clone())
                .collect(),
            NoteOperation::Policy(changes) => changes.keys().cloned().collect(),
        }
    }

    pub fn event_type(&self) -> EventType {
        match self.spec {
            NoteOperation::Image(_) => EventType::Release,
            NoteOperation::Auto(_) => EventType::AutoRelease,
            NoteOperation::Policy(_) => EventType::Policy,
        }
    }

    pub fn include_kind(&self) -> IncludeKind {
        match self.spec {
            NoteOperation::Image(_) => IncludeKind::Release,
            NoteOperation::Auto(_) => IncludeKind::AutoRelease,
            NoteOperation::Policy(_) => IncludeKind::Policy,
        }
    }

    /// Whether any workload in the result failed.
    pub fn has_failures(&self) -> bool {
        self.result.values().any(|r| r.error.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_image_release() {
        let raw = r#"{
            "jobId": "6c1a",
            "kind": "image",
            "payload": {"services": ["default:deployment/web"], "image": "registry/web:1.2"},
            "cause": {"message": "ship it", "user": "alice"},
            "result": {"default:deployment/web": {"status": "success"}}
        }"#;
        let note = Note::decode(raw).unwrap();
        assert_eq!(note.job_id, "6c1a");
        assert_eq!(note.event_type(), EventType::Release);
        assert_eq!(note.include_kind(), IncludeKind::Release);
        assert_eq!(note.cause.user, "alice");
        assert!(note
            .resource_ids()
            .contains(&ResourceId::new("default", "deployment", "web")));
        assert!(!note.has_failures());
    }

    #[test]
    fn test_decode_automated_release_without_optional_fields() {
        let raw = r#"{
            "jobId": "7d2b",
            "kind": "auto",
            "payload": {"changes": [
                {"resourceId": "apps:deployment/api", "container": "api", "image": "registry/api:2.0"}
            ]}
        }"#;
        let note = Note::decode(raw).unwrap();
        assert_eq!(note.event_type(), EventType::AutoRelease);
        assert_eq!(note.cause, NoteCause::default());
        assert!(note.result.is_empty());
        assert_eq!(note.resource_ids().len(), 1);
    }

    #[test]
    fn test_decode_policy_change() {
        let raw = r#"{
            "jobId": "8e3c",
            "kind": "policy",
            "payload": {"default:deployment/web": {"add": {"automated": "true"}}},
            "result": {"default:deployment/web": {"status": "failed", "error": "no such file"}}
        }"#;
        let note = Note::decode(raw).unwrap();
        assert_eq!(note.event_type(), EventType::Policy);
        assert!(note.has_failures());
    }

    #[test]
    fn test_decode_rejects_unknown_kind() {
        assert!(Note::decode(r#"{"jobId": "x", "kind": "sync", "payload": {}}"#).is_err());
        assert!(Note::decode("not json").is_err());
    }

    #[test]
    fn test_encode_keeps_tagged_layout() {
        let note = Note {
            job_id: "j1".to_string(),
            spec: NoteOperation::Image(ImageRelease {
                services: vec![ResourceId::new("default", "deployment", "web")],
                image: "web:2".to_string(),
            }),
            cause: NoteCause::default(),
            result: BTreeMap::new(),
        };
        let value: serde_json::Value = serde_json::from_str(&note.encode().unwrap()).unwrap();
        assert_eq!(value["kind"], "image");
        assert_eq!(value["payload"]["image"], "web:2");
        assert_eq!(Note::decode(&note.encode().unwrap()).unwrap(), note);
    }
}
