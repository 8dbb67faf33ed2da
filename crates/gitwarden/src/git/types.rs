//! Data types for git operations.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// A commit summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Commit {
    /// Full commit hash.
    pub revision: String,
    /// Subject line.
    pub message: String,
}

impl Commit {
    pub fn new(revision: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            revision: revision.into(),
            message: message.into(),
        }
    }
}

/// The commits a cycle covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitRange {
    /// Marker position before the cycle; `None` when never synced.
    pub old_revision: Option<String>,
    /// Branch head the cycle syncs to.
    pub new_revision: String,
    /// Oldest first.
    pub commits: Vec<Commit>,
    /// No previous marker existed.
    pub initial_sync: bool,
}

impl CommitRange {
    /// Most recent commit first.
    pub fn newest_first(&self) -> impl Iterator<Item = &Commit> {
        self.commits.iter().rev()
    }

    /// Whether the marker would move.
    pub fn advances(&self) -> bool {
        self.old_revision.as_deref() != Some(self.new_revision.as_str())
    }
}

/// Remote position of a tag as reported by `git ls-remote`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTag {
    /// Object the ref points at; a tag object for annotated tags.
    pub object: String,
    /// Commit the tag resolves to.
    pub commit: String,
}

/// Outcome of a lease-protected tag push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagPush {
    Pushed,
    /// The remote ref no longer matched the lease.
    Rejected,
}

/// A working copy pinned at one revision.
///
/// Checkouts created by the repository are removed from disk when dropped.
#[derive(Debug)]
pub struct Checkout {
    dir: PathBuf,
    revision: String,
    remove_on_drop: bool,
}

impl Checkout {
    pub(crate) fn owned(dir: PathBuf, revision: impl Into<String>) -> Self {
        Self {
            dir,
            revision: revision.into(),
            remove_on_drop: true,
        }
    }

    /// Wraps an existing directory that outlives the checkout.
    pub fn borrowed(dir: impl Into<PathBuf>, revision: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            revision: revision.into(),
            remove_on_drop: false,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn revision(&self) -> &str {
        &self.revision
    }

    /// Manifest directories for `paths`, relative to the checkout root.
    pub fn manifest_dirs(&self, paths: &[String]) -> Vec<PathBuf> {
        paths
            .iter()
            .map(|p| p.trim_matches('/'))
            .filter(|p| !p.is_empty() && *p != ".")
            .map(PathBuf::from)
            .collect()
    }
}

impl Drop for Checkout {
    fn drop(&mut self) {
        if !self.remove_on_drop {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(dir = %self.dir.display(), error = %e, "failed to clean up checkout");
            }
        }
    }
}
