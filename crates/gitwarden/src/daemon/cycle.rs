//! One reconciliation cycle: sync the cluster to the branch head, report what
//! changed, then move the sync marker.

use std::collections::{BTreeSet, HashSet};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{info_span, Instrument};

use super::coordinator::Workspace;
use crate::cluster::{ClusterError, TransportError};
use crate::events::{Event, EventError, EventSink, IncludeKind, SyncEventMetadata};
use crate::git::{Checkout, Commit, CommitRange, GitError, GitSource};
use crate::manifest::{self, LoadedManifests, ManifestError};
use crate::notes::Note;
use crate::resource::ResourceId;
use crate::state::{MarkerUpdate, StateError};
use crate::sync::{self, ResourceError, SyncReport};

#[derive(Error, Debug)]
pub enum CycleError {
    #[error("Git error: {0}")]
    Git(#[from] GitError),

    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),

    #[error("Sync aborted: {0}")]
    Transport(#[from] TransportError),

    #[error("Sync state error: {0}")]
    State(#[from] StateError),

    #[error("Event error: {0}")]
    Event(#[from] EventError),

    #[error("Blocking task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: &'static str, secs: u64 },
}

/// What happened to the marker at the end of a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerOutcome {
    Advanced,
    /// Already at the branch head.
    Unchanged,
    /// Another writer moved it first.
    LostRace,
}

/// Result of a completed cycle.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleOutcome {
    pub range: CommitRange,
    pub report: SyncReport,
    /// Apply failures followed by manifest parse failures.
    pub errors: Vec<ResourceError>,
    /// Resources touched by the synced commits that applied cleanly.
    pub changed: BTreeSet<ResourceId>,
    pub marker: MarkerOutcome,
}

/// Runs cycles against a [`Workspace`] the caller holds exclusively.
pub struct SyncCycle {
    paths: Vec<String>,
    git_timeout: Duration,
    sync_timeout: Duration,
    sink: Arc<dyn EventSink>,
}

async fn deadline<T, E, F>(operation: &'static str, limit: Duration, fut: F) -> Result<T, CycleError>
where
    F: Future<Output = Result<T, E>>,
    CycleError: From<E>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(CycleError::from),
        Err(_) => Err(CycleError::Timeout {
            operation,
            secs: limit.as_secs(),
        }),
    }
}

impl SyncCycle {
    pub fn new(paths: Vec<String>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            paths,
            git_timeout: Duration::from_secs(20),
            sync_timeout: Duration::from_secs(120),
            sink,
        }
    }

    pub fn with_timeouts(mut self, git_timeout: Duration, sync_timeout: Duration) -> Self {
        self.git_timeout = git_timeout;
        self.sync_timeout = sync_timeout;
        self
    }

    /// Runs one cycle. Any error leaves the marker where it was.
    pub async fn run(&self, ws: &mut Workspace) -> Result<CycleOutcome, CycleError> {
        self.execute(ws).instrument(info_span!("sync_cycle")).await
    }

    async fn execute(&self, ws: &mut Workspace) -> Result<CycleOutcome, CycleError> {
        let started_at = Utc::now();
        let git = Arc::clone(&ws.git);

        deadline("git fetch", self.git_timeout, git.refresh()).await?;
        let head = deadline("git rev-parse", self.git_timeout, git.head_revision()).await?;
        let checkout = git.checkout(&head).await?;

        let old = ws.state.get_revision().await?;
        let range = self.commit_range(git.as_ref(), old, &head).await?;
        tracing::debug!(
            old = range.old_revision.as_deref().unwrap_or("<none>"),
            new = %range.new_revision,
            commits = range.commits.len(),
            "computed commit range"
        );

        let cluster = Arc::clone(&ws.cluster);
        let base = checkout.dir().to_path_buf();
        let dirs = checkout.manifest_dirs(&self.paths);
        let loaded = deadline("manifest load", self.sync_timeout, async move {
            let loaded = tokio::task::spawn_blocking(move || cluster.load_declared(&base, &dirs)).await??;
            Ok::<_, CycleError>(loaded)
        })
        .await?;

        let exported = deadline("cluster export", self.sync_timeout, ws.cluster.export()).await?;
        let observed = ws.cluster.parse_exported(&exported)?;
        let mut changes = sync::plan(&loaded.resources, &observed);
        if !loaded.errors.is_empty() && !changes.deletes.is_empty() {
            // An unreadable document may still declare something that is live.
            tracing::warn!(
                parse_errors = loaded.errors.len(),
                skipped_deletes = changes.deletes.len(),
                "manifests failed to parse, skipping deletes this cycle"
            );
            changes.deletes.clear();
        }
        let changes_len = changes.len();
        let report = ws
            .engine
            .sync(ws.cluster.transport(), changes)
            .instrument(info_span!("apply", actions = changes_len))
            .await?;

        let mut changed = self.changed_resources(git.as_ref(), &range, &checkout, &loaded).await?;
        changed.retain(|id| !report.errors.contains(id));

        let errors: Vec<ResourceError> = report
            .errors
            .iter()
            .cloned()
            .chain(loaded.errors.iter().cloned())
            .collect();

        if !range.commits.is_empty() {
            let (includes, note_events) = self
                .collect_notes(git.as_ref(), &range, started_at)
                .instrument(info_span!("collect_events"))
                .await?;
            let metadata = SyncEventMetadata {
                commits: range.commits.clone(),
                includes,
                initial_sync: range.initial_sync,
                errors: errors.clone(),
            };
            self.sink
                .log_event(Event::sync(changed.clone(), started_at, metadata))
                .await?;
            for event in note_events {
                self.sink.log_event(event).await?;
            }
        }

        let marker = if range.advances() {
            match ws
                .state
                .update_marker(range.old_revision.as_deref(), &range.new_revision)
                .await?
            {
                MarkerUpdate::Moved => MarkerOutcome::Advanced,
                MarkerUpdate::LostRace { observed } => {
                    tracing::info!(
                        marker = %ws.state.describe(),
                        observed = observed.as_deref().unwrap_or("<none>"),
                        "sync marker moved concurrently, leaving it"
                    );
                    MarkerOutcome::LostRace
                }
            }
        } else {
            MarkerOutcome::Unchanged
        };

        drop(checkout);
        if let Err(e) = deadline("git fetch", self.git_timeout, git.refresh()).await {
            tracing::warn!(error = %e, "failed to refresh mirror after sync");
        }

        tracing::info!(
            revision = %range.new_revision,
            commits = range.commits.len(),
            applied = report.applied.len(),
            deleted = report.deleted.len(),
            errors = errors.len(),
            marker = ?marker,
            "sync cycle finished"
        );

        Ok(CycleOutcome {
            range,
            report,
            errors,
            changed,
            marker,
        })
    }

    async fn commit_range(
        &self,
        git: &dyn GitSource,
        old: Option<String>,
        head: &str,
    ) -> Result<CommitRange, CycleError> {
        let (commits, initial_sync) = match &old {
            Some(old) => (
                deadline("git log", self.git_timeout, git.commits_between(old, head, &self.paths))
                    .await?,
                false,
            ),
            None => (
                deadline("git log", self.git_timeout, git.commits_before(head, &self.paths)).await?,
                true,
            ),
        };
        Ok(CommitRange {
            old_revision: old,
            new_revision: head.to_string(),
            commits,
            initial_sync,
        })
    }

    /// Every declared resource on an initial sync, otherwise the resources in
    /// files that changed and still exist.
    async fn changed_resources(
        &self,
        git: &dyn GitSource,
        range: &CommitRange,
        checkout: &Checkout,
        loaded: &LoadedManifests,
    ) -> Result<BTreeSet<ResourceId>, CycleError> {
        if range.initial_sync {
            return Ok(loaded.resources.ids().cloned().collect());
        }
        let Some(old) = range.old_revision.as_deref() else {
            return Ok(BTreeSet::new());
        };
        if !range.advances() {
            return Ok(BTreeSet::new());
        }

        let files = deadline(
            "git diff",
            self.git_timeout,
            git.changed_files(old, &range.new_revision, &self.paths),
        )
        .await?;
        let existing: Vec<PathBuf> = files
            .iter()
            .map(|f| checkout.dir().join(f))
            .filter(|p| p.is_file() && manifest::is_manifest_file(p))
            .collect();
        let reparsed = manifest::load_files(checkout.dir(), &existing)?;
        Ok(reparsed.resources.ids().cloned().collect())
    }

    /// Classifies every synced commit and decodes the job notes among them.
    async fn collect_notes(
        &self,
        git: &dyn GitSource,
        range: &CommitRange,
        started_at: DateTime<Utc>,
    ) -> Result<(BTreeSet<IncludeKind>, Vec<Event>), CycleError> {
        let mut includes = BTreeSet::new();
        let mut events = Vec::new();
        let noted: HashSet<String> = git.note_revisions().await?;

        if range.initial_sync {
            if range.commits.iter().any(|c| noted.contains(&c.revision)) {
                tracing::warn!("initial sync covers commits with job notes; not reporting them");
            }
            if !range.commits.is_empty() {
                includes.insert(IncludeKind::Other);
            }
            return Ok((includes, events));
        }

        for commit in range.newest_first() {
            match self.read_note(git, commit, &noted).await? {
                Some(note) => {
                    includes.insert(note.include_kind());
                    events.push(Event::from_note(commit.revision.clone(), note, started_at));
                }
                None => {
                    includes.insert(IncludeKind::Other);
                }
            }
        }
        Ok((includes, events))
    }

    async fn read_note(
        &self,
        git: &dyn GitSource,
        commit: &Commit,
        noted: &HashSet<String>,
    ) -> Result<Option<Note>, CycleError> {
        if !noted.contains(&commit.revision) {
            return Ok(None);
        }
        let Some(raw) = deadline("git notes", self.git_timeout, git.get_note(&commit.revision)).await? else {
            return Ok(None);
        };
        match Note::decode(&raw) {
            Ok(note) => Ok(Some(note)),
            Err(e) => {
                tracing::warn!(revision = %commit.revision, error = %e, "ignoring malformed job note");
                Ok(None)
            }
        }
    }
}
