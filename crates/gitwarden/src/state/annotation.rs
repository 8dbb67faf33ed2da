//! Sync marker kept as an annotation on a cluster object.

use std::sync::Arc;

use async_trait::async_trait;

use super::{MarkerUpdate, StateError, SyncStateProvider};
use crate::cluster::{AnnotatedObject, AnnotationPatch, AnnotationStore, ObjectRef, PatchOutcome};
use crate::config::SYNC_POINT_ANNOTATION;

/// Reads and moves the marker with merge patches only, so nothing else on the
/// object is ever overwritten.
pub struct AnnotationState {
    store: Arc<dyn AnnotationStore>,
    target: ObjectRef,
    key: String,
}

impl AnnotationState {
    pub fn new(store: Arc<dyn AnnotationStore>, target: ObjectRef) -> Self {
        Self {
            store,
            target,
            key: SYNC_POINT_ANNOTATION.to_string(),
        }
    }

    async fn read(&self) -> Result<AnnotatedObject, StateError> {
        self.store
            .read_annotations(&self.target)
            .await?
            .ok_or_else(|| StateError::MissingObject(self.target.to_string()))
    }
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value.filter(|v| !v.is_empty()).cloned()
}

#[async_trait]
impl SyncStateProvider for AnnotationState {
    async fn get_revision(&self) -> Result<Option<String>, StateError> {
        let object = self.read().await?;
        match object.annotations.get(&self.key) {
            Some(value) => Ok(non_empty(Some(value))),
            None => {
                tracing::info!(object = %self.target, "initialising sync point annotation");
                let patch = AnnotationPatch::set(&self.key, "");
                if self.store.patch_annotations(&self.target, &patch).await? == PatchOutcome::Conflict {
                    tracing::debug!(object = %self.target, "sync point initialised concurrently");
                }
                Ok(None)
            }
        }
    }

    async fn update_marker(
        &self,
        expected_old: Option<&str>,
        new: &str,
    ) -> Result<MarkerUpdate, StateError> {
        let object = self.read().await?;
        let current = non_empty(object.annotations.get(&self.key));
        if current.as_deref() != expected_old {
            tracing::info!(
                object = %self.target,
                expected = expected_old.unwrap_or("<none>"),
                observed = current.as_deref().unwrap_or("<none>"),
                "sync point moved by another writer"
            );
            return Ok(MarkerUpdate::LostRace { observed: current });
        }

        let patch = AnnotationPatch::set(&self.key, new).at_version(object.resource_version);
        match self.store.patch_annotations(&self.target, &patch).await? {
            PatchOutcome::Applied => {
                tracing::info!(object = %self.target, revision = %new, "moved sync point");
                Ok(MarkerUpdate::Moved)
            }
            PatchOutcome::Conflict => {
                let observed = self
                    .store
                    .read_annotations(&self.target)
                    .await?
                    .and_then(|o| non_empty(o.annotations.get(&self.key)));
                Ok(MarkerUpdate::LostRace { observed })
            }
        }
    }

    async fn delete_marker(&self) -> Result<(), StateError> {
        let patch = AnnotationPatch::remove(&self.key);
        self.store.patch_annotations(&self.target, &patch).await?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("annotation {} on {}", self.key, self.target)
    }
}
