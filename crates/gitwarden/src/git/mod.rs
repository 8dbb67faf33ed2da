//! Git collaborator: a local mirror of the upstream repository plus
//! short-lived checkouts.

pub mod auth;
pub mod error;
pub mod parse;
pub mod repository;
pub mod types;

use std::collections::HashSet;

use async_trait::async_trait;

pub use error::{classify_git_error, GitError, Result};
pub use repository::GitRepository;
pub use types::*;

/// Read access to the repository, as the reconciliation loop needs it.
#[async_trait]
pub trait GitSource: Send + Sync {
    /// Fetches the upstream into the local mirror.
    async fn refresh(&self) -> Result<()>;

    /// Revision at the tip of the configured branch.
    async fn head_revision(&self) -> Result<String>;

    /// Fresh working copy pinned at `revision`.
    async fn checkout(&self, revision: &str) -> Result<Checkout>;

    /// Commits in `old..new` touching `paths`, oldest first.
    async fn commits_between(&self, old: &str, new: &str, paths: &[String]) -> Result<Vec<Commit>>;

    /// Every commit reachable from `new` touching `paths`, oldest first.
    async fn commits_before(&self, new: &str, paths: &[String]) -> Result<Vec<Commit>>;

    /// Files under `paths` that differ between `since` and `to`.
    async fn changed_files(&self, since: &str, to: &str, paths: &[String]) -> Result<Vec<String>>;

    /// Revisions that carry a note under the configured notes ref.
    async fn note_revisions(&self) -> Result<HashSet<String>>;

    /// Raw note attached to `revision`, if any.
    async fn get_note(&self, revision: &str) -> Result<Option<String>>;
}
