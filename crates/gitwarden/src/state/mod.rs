//! Where the last successfully synced revision is recorded.

pub mod annotation;
pub mod git_tag;

use async_trait::async_trait;
use thiserror::Error;

pub use annotation::AnnotationState;
pub use git_tag::GitTagState;

use crate::cluster::ClusterError;
use crate::git::GitError;

#[derive(Error, Debug)]
pub enum StateError {
    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error("Sync marker object {0} does not exist")]
    MissingObject(String),
}

/// Result of a compare-and-swap on the marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkerUpdate {
    Moved,
    /// Someone else moved the marker first; `observed` is where it was found.
    LostRace { observed: Option<String> },
}

/// Storage for the sync marker.
///
/// Implementations do not lock; callers serialize access.
#[async_trait]
pub trait SyncStateProvider: Send + Sync {
    /// `None` when nothing has been synced yet.
    async fn get_revision(&self) -> Result<Option<String>, StateError>;

    /// Moves the marker to `new` only if it is still at `expected_old`.
    async fn update_marker(
        &self,
        expected_old: Option<&str>,
        new: &str,
    ) -> Result<MarkerUpdate, StateError>;

    async fn delete_marker(&self) -> Result<(), StateError>;

    /// Human-readable location of the marker.
    fn describe(&self) -> String;
}
