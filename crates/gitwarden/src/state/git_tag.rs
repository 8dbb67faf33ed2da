//! Sync marker kept as an annotated tag in the upstream repository.

use std::sync::Arc;

use async_trait::async_trait;

use super::{MarkerUpdate, StateError, SyncStateProvider};
use crate::git::{GitRepository, TagPush};

pub struct GitTagState {
    repo: Arc<GitRepository>,
    tag: String,
    message: String,
}

impl GitTagState {
    pub fn new(repo: Arc<GitRepository>, tag: impl Into<String>) -> Self {
        Self {
            repo,
            tag: tag.into(),
            message: "Sync pointer".to_string(),
        }
    }

    /// Annotation message written on every move.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

#[async_trait]
impl SyncStateProvider for GitTagState {
    async fn get_revision(&self) -> Result<Option<String>, StateError> {
        Ok(self.repo.tag_revision(&self.tag).await?)
    }

    async fn update_marker(
        &self,
        expected_old: Option<&str>,
        new: &str,
    ) -> Result<MarkerUpdate, StateError> {
        let current = self.repo.remote_tag(&self.tag).await?;
        let observed = current.as_ref().map(|t| t.commit.as_str());
        if observed != expected_old {
            tracing::info!(
                tag = %self.tag,
                expected = expected_old.unwrap_or("<none>"),
                observed = observed.unwrap_or("<none>"),
                "sync tag moved by another writer"
            );
            return Ok(MarkerUpdate::LostRace {
                observed: observed.map(str::to_string),
            });
        }

        let lease = current.as_ref().map(|t| t.object.as_str());
        match self.repo.push_tag(&self.tag, new, &self.message, lease).await? {
            TagPush::Pushed => {
                tracing::info!(tag = %self.tag, revision = %new, "moved sync tag");
                Ok(MarkerUpdate::Moved)
            }
            TagPush::Rejected => {
                let observed = self.repo.remote_tag(&self.tag).await?.map(|t| t.commit);
                tracing::info!(tag = %self.tag, "sync tag push lost the race");
                Ok(MarkerUpdate::LostRace { observed })
            }
        }
    }

    async fn delete_marker(&self) -> Result<(), StateError> {
        Ok(self.repo.delete_remote_tag(&self.tag).await?)
    }

    fn describe(&self) -> String {
        format!("tag {} in {}", self.tag, self.repo.settings().url)
    }
}
