//! Test harness wiring the fakes into a workspace.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use gitwarden::config::JobSettings;
use gitwarden::{CycleError, CycleOutcome, Daemon, SyncCycle, Workspace};

use super::fakes::{FakeCluster, FakeGit, MemoryState, RecordingSink};

/// Directory under the repository root that holds manifests.
pub const MANIFEST_DIR: &str = "deploy";

/// One git repository, one cluster and one sync marker, all in memory.
pub struct TestHarness {
    /// Checkouts are written here; dropped with the harness.
    pub temp_dir: TempDir,
    pub git: Arc<FakeGit>,
    pub cluster: Arc<FakeCluster>,
    pub state: Arc<MemoryState>,
    pub sink: Arc<RecordingSink>,
    pub cycle: SyncCycle,
    pub workspace: Workspace,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let git = Arc::new(FakeGit::new(temp_dir.path()));
        let cluster = Arc::new(FakeCluster::new());
        let state = Arc::new(MemoryState::new());
        let sink = Arc::new(RecordingSink::new());

        let cycle = SyncCycle::new(vec![MANIFEST_DIR.to_string()], sink.clone())
            .with_timeouts(Duration::from_secs(5), Duration::from_secs(5));
        let workspace = Workspace::new(git.clone(), cluster.clone(), state.clone());

        Self {
            temp_dir,
            git,
            cluster,
            state,
            sink,
            cycle,
            workspace,
        }
    }

    /// Commits manifest files under the manifest directory.
    pub fn commit(&self, message: &str, files: &[(&str, Option<&str>)]) -> String {
        let paths: Vec<(String, Option<&str>)> = files
            .iter()
            .map(|(name, content)| (format!("{}/{}", MANIFEST_DIR, name), *content))
            .collect();
        let borrowed: Vec<(&str, Option<&str>)> =
            paths.iter().map(|(p, c)| (p.as_str(), *c)).collect();
        self.git.commit(message, &borrowed)
    }

    pub async fn sync(&mut self) -> Result<CycleOutcome, CycleError> {
        self.cycle.run(&mut self.workspace).await
    }

    /// Hands the workspace to a daemon; the harness keeps the fakes.
    pub fn into_daemon(self, jobs: &JobSettings) -> (Daemon, Fakes) {
        let fakes = Fakes {
            temp_dir: self.temp_dir,
            git: self.git,
            cluster: self.cluster,
            state: self.state,
            sink: self.sink,
        };
        let daemon = Daemon::new(self.workspace, self.cycle, Duration::from_secs(3600), jobs);
        (daemon, fakes)
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// The fakes behind a daemon built by [`TestHarness::into_daemon`].
pub struct Fakes {
    pub temp_dir: TempDir,
    pub git: Arc<FakeGit>,
    pub cluster: Arc<FakeCluster>,
    pub state: Arc<MemoryState>,
    pub sink: Arc<RecordingSink>,
}

/// A ConfigMap manifest with a single data entry.
pub fn config_map(name: &str, value: &str) -> String {
    format!(
        "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: {}\n  namespace: default\ndata:\n  value: {}\n",
        name, value
    )
}

/// A Deployment manifest running `image`.
pub fn deployment(name: &str, image: &str) -> String {
    format!(
        "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: {name}\n  namespace: default\nspec:\n  template:\n    spec:\n      containers:\n        - name: {name}\n          image: {image}\n",
    )
}
